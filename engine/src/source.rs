//! The source seam.
//!
//! A source is an opaque provider of queryable structured elements. The
//! engine never parses the underlying export format; whatever produced the
//! elements (an XML export, a test fixture, a cache file) sits behind
//! [`Source`].

use serde::{Deserialize, Serialize};

use crate::core::value::Element;

/// Provider of queryable structured elements.
pub trait Source {
    /// Stable identity of this source, recorded on evaluations.
    fn id(&self) -> &str;

    /// All elements of a kind, optionally scoped by name.
    ///
    /// A name matches exactly, matches the container-qualified form
    /// (`container:name`), or matches as a substring of the qualified form.
    fn elements(&self, kind: &str, name: Option<&str>) -> Vec<Element>;
}

/// In-memory parsed representation of a source: the shape the cache
/// persists and every run queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSource {
    pub id: String,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl ParsedSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            elements: Vec::new(),
        }
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }
}

impl Source for ParsedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn elements(&self, kind: &str, name: Option<&str>) -> Vec<Element> {
        self.elements
            .iter()
            .filter(|el| el.kind == kind)
            .filter(|el| match name {
                None => true,
                Some(wanted) => {
                    let qualified = el.qualified_name();
                    el.name == wanted || qualified == wanted || qualified.contains(wanted)
                }
            })
            .cloned()
            .collect()
    }
}
