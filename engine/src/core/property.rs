//! Property graph navigation.
//!
//! A [`Property`] names a path from an origin element kind to a leaf value
//! and records the leaf's [`TypeGroup`], which drives which operations are
//! offered for it. Accessors are compiled from the path on first use and
//! cached by [`PropertyKey`] in the shared [`EvalContext`], so ad hoc
//! property instances with the same key share one compiled accessor.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::context::EvalContext;
use crate::core::value::{TypeGroup, Value};

/// Custom leaf accessor supplied at construction, bypassing compilation.
pub type CustomAccessor = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Cache key for compiled accessors: origin kind plus path string.
/// Two properties with equal keys are value-equal regardless of instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub origin: String,
    pub path: String,
}

/// One navigable path in the property graph: origin kind, path, and the
/// leaf's type group.
#[derive(Clone, Serialize, Deserialize)]
pub struct Property {
    origin: String,
    path: String,
    group: TypeGroup,
    #[serde(skip)]
    custom: Option<CustomAccessor>,
}

impl Property {
    /// A property must name a non-empty origin kind, a non-empty path, and
    /// a leaf group that values can actually take. `Rule`, `Reference`,
    /// `Variable`, and `Argument` classify argument payloads, never leaves,
    /// so they are rejected here.
    pub fn new(
        origin: impl Into<String>,
        path: impl Into<String>,
        group: TypeGroup,
    ) -> Result<Self> {
        let origin = origin.into();
        let path = path.into();
        if origin.trim().is_empty() {
            bail!("property origin must not be empty");
        }
        if path.trim().is_empty() {
            bail!("property path must not be empty");
        }
        if matches!(
            group,
            TypeGroup::Rule | TypeGroup::Reference | TypeGroup::Variable | TypeGroup::Argument
        ) {
            bail!("'{}' is not a value group a property can yield", group.name());
        }
        Ok(Self {
            origin,
            path,
            group,
            custom: None,
        })
    }

    /// Attach an explicit accessor, taking precedence over path compilation.
    pub fn with_accessor(mut self, accessor: CustomAccessor) -> Self {
        self.custom = Some(accessor);
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The recorded leaf group; see [`crate::core::operation::Operation::supporting_property`].
    pub fn group(&self) -> TypeGroup {
        self.group
    }

    pub fn key(&self) -> PropertyKey {
        PropertyKey {
            origin: self.origin.clone(),
            path: self.path.clone(),
        }
    }

    /// Extract this property's leaf value from a candidate.
    ///
    /// Errors when the candidate's runtime kind does not match the recorded
    /// origin. Null anywhere along the chain propagates to a `Null` result,
    /// never an error; so does an absent field.
    pub fn get_value(&self, candidate: &Value, ctx: &EvalContext) -> Result<Value> {
        let kind = candidate.kind_name();
        if kind != self.origin {
            bail!(
                "property '{}' expects origin '{}', got '{}'",
                self.path,
                self.origin,
                kind
            );
        }
        if let Some(custom) = &self.custom {
            return custom(candidate);
        }
        let accessor = ctx.accessor_for(&self.key(), || Accessor::compile(&self.path));
        Ok(accessor.run(candidate))
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("origin", &self.origin)
            .field("path", &self.path)
            .field("group", &self.group)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && self.path == other.path
    }
}

impl Eq for Property {}

impl Hash for Property {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.origin.hash(state);
        self.path.hash(state);
    }
}

/// One step of a compiled accessor program.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Member access on an element's field map.
    Field(String),
    /// Index access into a list; numeric path segments compile here.
    Index(usize),
}

/// Compiled accessor: a segment program walked from the origin value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    segments: Vec<Segment>,
}

impl Accessor {
    pub(crate) fn compile(path: &str) -> Self {
        let segments = path
            .split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(index) => Segment::Index(index),
                Err(_) => Segment::Field(part.to_string()),
            })
            .collect();
        Self { segments }
    }

    /// Walk the program. Null-propagating and infallible: a null or absent
    /// ancestor yields `Null`.
    pub(crate) fn run(&self, origin: &Value) -> Value {
        let mut current = origin.clone();
        for segment in &self.segments {
            if current.is_null() {
                return Value::Null;
            }
            current = match (segment, current) {
                (Segment::Field(name), Value::Element(el)) => match el.fields.get(name) {
                    Some(found) => found.clone(),
                    // Built-in pseudo-fields fall back to element metadata.
                    None => match name.as_str() {
                        "name" => Value::Text(el.name.clone()),
                        "kind" => Value::Text(el.kind.clone()),
                        "container" => el
                            .container
                            .clone()
                            .map(Value::Text)
                            .unwrap_or(Value::Null),
                        _ => Value::Null,
                    },
                },
                (Segment::Index(index), Value::List(items)) => {
                    items.get(*index).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            };
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Element;
    use std::collections::hash_map::DefaultHasher;

    fn motor() -> Value {
        Value::Element(
            Element::new("tag", "Motor_Run")
                .with_field("data_type", Value::Text("BOOL".into()))
                .with_field("value", Value::Bool(true))
                .with_field(
                    "limits",
                    Value::List(vec![Value::Int(0), Value::Int(100)]),
                )
                .with_field(
                    "producer",
                    Value::Element(
                        Element::new("connection", "remote")
                            .with_field("rpi_ms", Value::Int(20)),
                    ),
                ),
        )
    }

    fn hash_of(property: &Property) -> u64 {
        let mut hasher = DefaultHasher::new();
        property.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn construction_rejects_empty_inputs() {
        assert!(Property::new("", "value", TypeGroup::Bool).is_err());
        assert!(Property::new("tag", " ", TypeGroup::Bool).is_err());
    }

    #[test]
    fn construction_rejects_non_value_groups() {
        for group in [
            TypeGroup::Rule,
            TypeGroup::Reference,
            TypeGroup::Variable,
            TypeGroup::Argument,
        ] {
            let err = Property::new("tag", "value", group).expect_err("non-value group");
            assert!(err.to_string().contains("not a value group"));
        }
        assert!(Property::new("tag", "value", TypeGroup::Default).is_ok());
    }

    #[test]
    fn leaf_group_is_recorded() {
        let property = Property::new("tag", "value", TypeGroup::Bool).expect("property");
        assert_eq!(property.group(), TypeGroup::Bool);
    }

    #[test]
    fn equal_key_means_equal_property_and_hash() {
        let a = Property::new("tag", "value", TypeGroup::Bool).expect("property");
        let b = Property::new("tag", "value", TypeGroup::Bool).expect("property");
        let c = Property::new("tag", "data_type", TypeGroup::Text).expect("property");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn get_value_walks_fields_and_indices() {
        let ctx = EvalContext::new();
        let candidate = motor();

        let value = Property::new("tag", "value", TypeGroup::Bool).expect("property");
        assert_eq!(value.get_value(&candidate, &ctx).expect("value"), Value::Bool(true));

        let upper = Property::new("tag", "limits.1", TypeGroup::Number).expect("property");
        assert_eq!(upper.get_value(&candidate, &ctx).expect("value"), Value::Int(100));

        let rpi = Property::new("tag", "producer.rpi_ms", TypeGroup::Number).expect("property");
        assert_eq!(rpi.get_value(&candidate, &ctx).expect("value"), Value::Int(20));
    }

    #[test]
    fn absent_or_null_ancestors_yield_null() {
        let ctx = EvalContext::new();
        let candidate = motor();

        let missing = Property::new("tag", "no_such.deeper", TypeGroup::Default).expect("property");
        assert_eq!(missing.get_value(&candidate, &ctx).expect("value"), Value::Null);

        let out_of_range = Property::new("tag", "limits.9", TypeGroup::Number).expect("property");
        assert_eq!(
            out_of_range.get_value(&candidate, &ctx).expect("value"),
            Value::Null
        );
    }

    #[test]
    fn origin_mismatch_is_an_error() {
        let ctx = EvalContext::new();
        let property = Property::new("module", "value", TypeGroup::Bool).expect("property");
        let err = property.get_value(&motor(), &ctx).expect_err("mismatch");
        assert!(err.to_string().contains("expects origin 'module'"));
    }

    #[test]
    fn accessor_is_compiled_once_per_key() {
        let ctx = EvalContext::new();
        let candidate = motor();
        let first = Property::new("tag", "value", TypeGroup::Bool).expect("property");
        let second = Property::new("tag", "value", TypeGroup::Bool).expect("property");

        let a = first.get_value(&candidate, &ctx).expect("value");
        let b = second.get_value(&candidate, &ctx).expect("value");
        let c = first.get_value(&candidate, &ctx).expect("value");

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(ctx.compile_count(), 1);
    }

    #[test]
    fn custom_accessor_takes_precedence() {
        let ctx = EvalContext::new();
        let property = Property::new("tag", "value", TypeGroup::Number)
            .expect("property")
            .with_accessor(Arc::new(|_| Ok(Value::Int(7))));
        assert_eq!(
            property.get_value(&motor(), &ctx).expect("value"),
            Value::Int(7)
        );
        assert_eq!(ctx.compile_count(), 0);
    }

    #[test]
    fn pseudo_fields_expose_element_metadata() {
        let ctx = EvalContext::new();
        let candidate = Value::Element(Element::new("tag", "Motor_Run").in_container("Main"));
        let name = Property::new("tag", "name", TypeGroup::Text).expect("property");
        let container = Property::new("tag", "container", TypeGroup::Text).expect("property");
        assert_eq!(
            name.get_value(&candidate, &ctx).expect("value"),
            Value::Text("Motor_Run".into())
        );
        assert_eq!(
            container.get_value(&candidate, &ctx).expect("value"),
            Value::Text("Main".into())
        );
    }
}
