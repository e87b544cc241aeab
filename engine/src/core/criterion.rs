//! Criteria, arguments, and references.
//!
//! A [`Criterion`] is one evaluable rule: a property, an operation, ordered
//! arguments, and a negation flag. Evaluation never lets an error escape;
//! faults become errored [`Evaluation`]s.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::context::EvalContext;
use crate::core::ident::fresh_id;
use crate::core::operation::{Operation, Resolved};
use crate::core::property::Property;
use crate::core::value::{TypeGroup, Value};
use crate::core::verdict::{Evaluation, Verdict};

/// An unresolved pointer to a named variable, resolved by ancestor lookup
/// at run time. The resolved value is transient and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    #[serde(skip)]
    pub resolved: Option<Value>,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: None,
        }
    }
}

/// Payload of an argument, modeled as an explicit sum type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgumentValue {
    Literal { value: Value },
    Reference { reference: Reference },
    Rule { rule: Box<Criterion> },
    List { items: Vec<Argument> },
}

/// One ordered argument of a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub id: String,
    #[serde(flatten)]
    pub value: ArgumentValue,
}

impl Argument {
    pub fn literal(value: Value) -> Self {
        Self {
            id: fresh_id("arg"),
            value: ArgumentValue::Literal { value },
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            id: fresh_id("arg"),
            value: ArgumentValue::Reference {
                reference: Reference::new(name),
            },
        }
    }

    pub fn rule(rule: Criterion) -> Self {
        Self {
            id: fresh_id("arg"),
            value: ArgumentValue::Rule { rule: Box::new(rule) },
        }
    }

    pub fn list(items: Vec<Argument>) -> Self {
        Self {
            id: fresh_id("arg"),
            value: ArgumentValue::List { items },
        }
    }

    /// Copy with a fresh id; the payload is shallow-copied.
    pub fn duplicate(&self) -> Self {
        Self {
            id: fresh_id("arg"),
            value: self.value.clone(),
        }
    }

    /// Resolve for execution against a target group: unwrap references,
    /// pass nested rules through, resolve lists recursively, and coerce
    /// literals toward the target group.
    pub fn resolve_as(&self, target: TypeGroup) -> Result<Resolved<'_>> {
        match &self.value {
            ArgumentValue::Literal { value } => Ok(Resolved::Value(coerce(value.clone(), target)?)),
            ArgumentValue::Reference { reference } => {
                let value = reference.resolved.clone().unwrap_or(Value::Null);
                Ok(Resolved::Value(coerce(value, target)?))
            }
            ArgumentValue::Rule { rule } => Ok(Resolved::Rule(rule)),
            ArgumentValue::List { items } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item.resolve_as(target)? {
                        Resolved::Value(value) => values.push(value),
                        Resolved::Rule(_) => {
                            bail!("a nested rule is not allowed inside a list argument")
                        }
                    }
                }
                Ok(Resolved::Value(Value::List(values)))
            }
        }
    }

    /// Bind every reference in this argument tree through the resolver.
    /// An unresolved name stays `None` and later resolves to null.
    pub fn bind_references(&mut self, resolver: &dyn Fn(&str) -> Option<Value>) {
        match &mut self.value {
            ArgumentValue::Reference { reference } => {
                reference.resolved = resolver(&reference.name);
                if reference.resolved.is_none() {
                    debug!(name = %reference.name, "reference did not resolve; defaulting to null");
                }
            }
            ArgumentValue::Rule { rule } => rule.bind_references(resolver),
            ArgumentValue::List { items } => {
                for item in items {
                    item.bind_references(resolver);
                }
            }
            ArgumentValue::Literal { .. } => {}
        }
    }

    /// Whether this argument tree owns a criterion with the given id.
    pub fn contains_rule(&self, id: &str) -> bool {
        match &self.value {
            ArgumentValue::Rule { rule } => rule.id == id || rule.contains(id),
            ArgumentValue::List { items } => items.iter().any(|item| item.contains_rule(id)),
            _ => false,
        }
    }

    /// Human-readable rendering for evaluation records.
    pub fn render(&self) -> String {
        match &self.value {
            ArgumentValue::Literal { value } => value.to_string(),
            ArgumentValue::Reference { reference } => format!("@{}", reference.name),
            ArgumentValue::Rule { rule } => format!("({})", rule.render()),
            ArgumentValue::List { items } => {
                let rendered: Vec<String> = items.iter().map(Argument::render).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }
}

/// Coerce a value toward a target group: parse text against non-text
/// groups, widen numerics, render to text; otherwise pass through and let
/// the operation surface the mismatch.
fn coerce(value: Value, target: TypeGroup) -> Result<Value> {
    let group = TypeGroup::of(&value);
    if group == target || value.is_null() {
        return Ok(value);
    }
    if let Value::Text(text) = &value
        && target != TypeGroup::Text
        && !matches!(
            target,
            TypeGroup::Element
                | TypeGroup::Rule
                | TypeGroup::Reference
                | TypeGroup::Variable
                | TypeGroup::Argument
                | TypeGroup::Default
        )
    {
        return target
            .parse(text)
            .ok_or_else(|| anyhow!("cannot parse '{text}' as {}", target.name()));
    }
    if target == TypeGroup::Text {
        return Ok(Value::Text(value.to_string()));
    }
    Ok(value)
}

/// One evaluable rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    /// Type group of the value the rule expects to see.
    pub target: TypeGroup,
    /// Navigated property; `None` evaluates the candidate itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
    pub operation: Operation,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[serde(default)]
    pub invert: bool,
}

impl Criterion {
    /// Construction checks operation applicability up front; a rule whose
    /// operation cannot apply to its target group is a configuration error.
    pub fn new(target: TypeGroup, property: Option<Property>, operation: Operation) -> Result<Self> {
        if !operation.supports(target) {
            bail!(
                "operation '{}' does not support {} targets",
                operation.name(),
                target.name()
            );
        }
        Ok(Self {
            id: fresh_id("crit"),
            target,
            property,
            operation,
            arguments: Vec::new(),
            invert: false,
        })
    }

    pub fn with_argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Add an argument, refusing one whose rule tree contains this
    /// criterion. Owned boxing already forbids true cycles; this guards
    /// id-aliased self-nesting arriving through deserialized trees.
    pub fn nest(&mut self, argument: Argument) -> Result<()> {
        if argument.contains_rule(&self.id) {
            bail!("criterion '{}' must not contain itself", self.id);
        }
        self.arguments.push(argument);
        Ok(())
    }

    /// Whether the given criterion id is owned anywhere in this rule tree.
    pub fn contains(&self, id: &str) -> bool {
        self.arguments.iter().any(|arg| arg.contains_rule(id))
    }

    pub fn bind_references(&mut self, resolver: &dyn Fn(&str) -> Option<Value>) {
        for argument in &mut self.arguments {
            argument.bind_references(resolver);
        }
    }

    pub fn render(&self) -> String {
        let subject = self
            .property
            .as_ref()
            .map(|p| p.path().to_string())
            .unwrap_or_else(|| "self".to_string());
        let expected: Vec<String> = self.arguments.iter().map(Argument::render).collect();
        let negation = if self.invert { "not " } else { "" };
        format!(
            "{negation}{subject} {} [{}]",
            self.operation.name(),
            expected.join(", ")
        )
    }

    /// Evaluate against one candidate. Catches every fault from property
    /// navigation, argument resolution, and execution; nothing escapes.
    pub fn evaluate(&self, candidate: &Value, source_id: &str, ctx: &EvalContext) -> Evaluation {
        let expected: Vec<String> = self.arguments.iter().map(Argument::render).collect();
        let attempt = (|| -> Result<(bool, Value)> {
            let value = match &self.property {
                Some(property) => property.get_value(candidate, ctx)?,
                None => candidate.clone(),
            };
            let group = TypeGroup::of(&value);
            let mut resolved = Vec::with_capacity(self.arguments.len());
            for argument in &self.arguments {
                resolved.push(argument.resolve_as(group)?);
            }
            let passed = self.operation.execute(&value, &resolved, source_id, ctx)?;
            Ok((passed != self.invert, value))
        })();

        match attempt {
            Ok((passed, value)) => Evaluation {
                criterion_id: self.id.clone(),
                source_id: source_id.to_string(),
                verdict: Verdict::from_pass(passed),
                candidate: candidate.to_string(),
                criteria: self.render(),
                expected,
                actual: value.to_string(),
                error: None,
            },
            Err(err) => Evaluation {
                criterion_id: self.id.clone(),
                source_id: source_id.to_string(),
                verdict: Verdict::Errored,
                candidate: candidate.to_string(),
                criteria: self.render(),
                expected,
                actual: String::new(),
                error: Some(format!("{err:#}")),
            },
        }
    }
}
