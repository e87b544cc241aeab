//! Typed runtime values and type-group classification.
//!
//! Every value extracted from the data graph is one of the [`Value`]
//! variants. [`TypeGroup`] classifies values into the semantic categories
//! that drive operation applicability and free-text parsing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured element queried from a source.
///
/// Elements are the engine's view of whatever the export format contains:
/// a classified kind (e.g. `tag`, `routine`, `module`), a name, an optional
/// owning container, and a flat-to-nested field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Element {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            container: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Container-qualified name, `container:name` when scoped.
    pub fn qualified_name(&self) -> String {
        match &self.container {
            Some(container) => format!("{container}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A runtime value extracted from the data graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(DateTime<Utc>),
    Enum(String),
    List(Vec<Value>),
    Element(Element),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view across `Int`/`Float`, `None` for everything else.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The runtime kind used for property origin checks: the element kind
    /// for elements, the type-group name otherwise.
    pub fn kind_name(&self) -> String {
        match self {
            Value::Element(el) => el.kind.clone(),
            other => TypeGroup::of(other).name().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(t) => write!(f, "{t}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Enum(symbol) => write!(f, "{symbol}"),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Value::Element(el) => write!(f, "{}", el.qualified_name()),
        }
    }
}

/// Semantic category of a runtime value or argument payload.
///
/// Classification drives which operations are offered for a property and
/// how free text becomes a typed argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeGroup {
    Bool,
    Number,
    Text,
    Date,
    Enum,
    Collection,
    Element,
    Rule,
    Reference,
    Variable,
    Argument,
    Default,
}

impl TypeGroup {
    /// Classify a value. Classifiers are checked in fixed priority order
    /// (bool, number, text, date, enum, collection, element); anything left
    /// over is `Default`.
    pub fn of(value: &Value) -> TypeGroup {
        match value {
            Value::Bool(_) => TypeGroup::Bool,
            Value::Int(_) | Value::Float(_) => TypeGroup::Number,
            Value::Text(_) => TypeGroup::Text,
            Value::Date(_) => TypeGroup::Date,
            Value::Enum(_) => TypeGroup::Enum,
            Value::List(_) => TypeGroup::Collection,
            Value::Element(_) => TypeGroup::Element,
            Value::Null => TypeGroup::Default,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeGroup::Bool => "bool",
            TypeGroup::Number => "number",
            TypeGroup::Text => "text",
            TypeGroup::Date => "date",
            TypeGroup::Enum => "enum",
            TypeGroup::Collection => "collection",
            TypeGroup::Element => "element",
            TypeGroup::Rule => "rule",
            TypeGroup::Reference => "reference",
            TypeGroup::Variable => "variable",
            TypeGroup::Argument => "argument",
            TypeGroup::Default => "default",
        }
    }

    /// Best-effort parse of free text into this group. Never errors;
    /// `None` means the text has no representation in this group.
    pub fn parse(self, text: &str) -> Option<Value> {
        let trimmed = text.trim();
        match self {
            TypeGroup::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            TypeGroup::Number => {
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Some(Value::Int(i));
                }
                trimmed.parse::<f64>().ok().map(Value::Float)
            }
            TypeGroup::Text => Some(Value::Text(trimmed.to_string())),
            TypeGroup::Date => DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|d| Value::Date(d.with_timezone(&Utc))),
            TypeGroup::Enum => {
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Value::Enum(trimmed.to_string()))
                }
            }
            TypeGroup::Collection => Some(Value::List(
                trimmed
                    .split(',')
                    .map(|part| Value::Text(part.trim().to_string()))
                    .collect(),
            )),
            TypeGroup::Element
            | TypeGroup::Rule
            | TypeGroup::Reference
            | TypeGroup::Variable
            | TypeGroup::Argument
            | TypeGroup::Default => None,
        }
    }
}
