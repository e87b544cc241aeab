//! The operation catalog.
//!
//! Operations are a closed set of named, typed predicates dispatched by
//! exhaustive match. Each declares which type groups it supports; mismatched
//! inputs surface as errors to the caller, never as a silent `false`.

use std::cmp::Ordering;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::context::EvalContext;
use crate::core::criterion::Criterion;
use crate::core::property::Property;
use crate::core::value::{TypeGroup, Value};
use crate::core::verdict::Verdict;

/// An argument resolved for execution: either a plain value, or a nested
/// rule passed through unresolved for quantifier operations to apply.
#[derive(Debug)]
pub enum Resolved<'a> {
    Value(Value),
    Rule(&'a Criterion),
}

/// A named predicate over an input value and auxiliary arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    EqualTo,
    NotEqualTo,
    /// Case-insensitive, whitespace-trimmed textual equality.
    EquivalentTo,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    IsTrue,
    IsFalse,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
    Contains,
    StartsWith,
    EndsWith,
    /// `*`/`?` wildcard match, anchored.
    Like,
    /// Regular-expression match.
    Matches,
    /// Inclusive range check; takes exactly two bounds.
    Between,
    /// Every collection item satisfies the nested rule; vacuously true.
    All,
    /// At least one collection item satisfies the nested rule; false when empty.
    Any,
}

impl Operation {
    pub const ALL: [Operation; 21] = [
        Operation::EqualTo,
        Operation::NotEqualTo,
        Operation::EquivalentTo,
        Operation::GreaterThan,
        Operation::GreaterOrEqual,
        Operation::LessThan,
        Operation::LessOrEqual,
        Operation::IsTrue,
        Operation::IsFalse,
        Operation::IsNull,
        Operation::IsNotNull,
        Operation::IsEmpty,
        Operation::IsNotEmpty,
        Operation::Contains,
        Operation::StartsWith,
        Operation::EndsWith,
        Operation::Like,
        Operation::Matches,
        Operation::Between,
        Operation::All,
        Operation::Any,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::EqualTo => "equal_to",
            Operation::NotEqualTo => "not_equal_to",
            Operation::EquivalentTo => "equivalent_to",
            Operation::GreaterThan => "greater_than",
            Operation::GreaterOrEqual => "greater_or_equal",
            Operation::LessThan => "less_than",
            Operation::LessOrEqual => "less_or_equal",
            Operation::IsTrue => "is_true",
            Operation::IsFalse => "is_false",
            Operation::IsNull => "is_null",
            Operation::IsNotNull => "is_not_null",
            Operation::IsEmpty => "is_empty",
            Operation::IsNotEmpty => "is_not_empty",
            Operation::Contains => "contains",
            Operation::StartsWith => "starts_with",
            Operation::EndsWith => "ends_with",
            Operation::Like => "like",
            Operation::Matches => "matches",
            Operation::Between => "between",
            Operation::All => "all",
            Operation::Any => "any",
        }
    }

    /// Whether this operation applies to inputs of the given group.
    pub fn supports(self, group: TypeGroup) -> bool {
        use TypeGroup as G;
        match self {
            Operation::EqualTo
            | Operation::NotEqualTo
            | Operation::EquivalentTo
            | Operation::IsNull
            | Operation::IsNotNull => true,
            Operation::GreaterThan
            | Operation::GreaterOrEqual
            | Operation::LessThan
            | Operation::LessOrEqual
            | Operation::Between => matches!(group, G::Number | G::Date | G::Text | G::Enum),
            Operation::IsTrue | Operation::IsFalse => matches!(group, G::Bool),
            Operation::IsEmpty | Operation::IsNotEmpty => {
                matches!(group, G::Text | G::Collection | G::Default)
            }
            Operation::Contains => matches!(group, G::Text | G::Enum | G::Collection),
            Operation::StartsWith
            | Operation::EndsWith
            | Operation::Like
            | Operation::Matches => matches!(group, G::Text | G::Enum),
            Operation::All | Operation::Any => matches!(group, G::Collection),
        }
    }

    /// The catalog filtered to operations supporting a group, for
    /// validation and interactive selection.
    pub fn supporting(group: TypeGroup) -> Vec<Operation> {
        Operation::ALL
            .iter()
            .copied()
            .filter(|op| op.supports(group))
            .collect()
    }

    /// The catalog filtered to what a property's recorded leaf group admits.
    pub fn supporting_property(property: &Property) -> Vec<Operation> {
        Operation::supporting(property.group())
    }

    /// Execute the predicate against an input and resolved arguments.
    pub fn execute(
        self,
        input: &Value,
        args: &[Resolved<'_>],
        source_id: &str,
        ctx: &EvalContext,
    ) -> Result<bool> {
        match self {
            Operation::EqualTo => Ok(loose_equal(input, one_value(self, args)?)),
            Operation::NotEqualTo => Ok(!loose_equal(input, one_value(self, args)?)),
            Operation::EquivalentTo => {
                let expected = one_value(self, args)?;
                Ok(canonical_text(input) == canonical_text(expected))
            }
            Operation::GreaterThan => Ok(compare(input, one_value(self, args)?)? == Ordering::Greater),
            Operation::GreaterOrEqual => Ok(compare(input, one_value(self, args)?)? != Ordering::Less),
            Operation::LessThan => Ok(compare(input, one_value(self, args)?)? == Ordering::Less),
            Operation::LessOrEqual => Ok(compare(input, one_value(self, args)?)? != Ordering::Greater),
            Operation::IsTrue => truthiness(input),
            Operation::IsFalse => Ok(!truthiness(input)?),
            Operation::IsNull => Ok(input.is_null()),
            Operation::IsNotNull => Ok(!input.is_null()),
            Operation::IsEmpty => emptiness(input),
            Operation::IsNotEmpty => Ok(!emptiness(input)?),
            Operation::Contains => {
                let needle = one_value(self, args)?;
                match input {
                    Value::Text(t) | Value::Enum(t) => Ok(t.contains(text_of(self, needle)?)),
                    Value::List(items) => Ok(items.iter().any(|item| loose_equal(item, needle))),
                    other => bail!("{} does not apply to {}", self.name(), TypeGroup::of(other).name()),
                }
            }
            Operation::StartsWith => {
                let needle = text_of(self, one_value(self, args)?)?;
                Ok(input_text(self, input)?.starts_with(needle))
            }
            Operation::EndsWith => {
                let needle = text_of(self, one_value(self, args)?)?;
                Ok(input_text(self, input)?.ends_with(needle))
            }
            Operation::Like => {
                let pattern = text_of(self, one_value(self, args)?)?;
                let regex = wildcard_regex(pattern)?;
                Ok(regex.is_match(input_text(self, input)?))
            }
            Operation::Matches => {
                let pattern = text_of(self, one_value(self, args)?)?;
                let regex = Regex::new(pattern)
                    .map_err(|err| anyhow!("invalid regex '{pattern}': {err}"))?;
                Ok(regex.is_match(input_text(self, input)?))
            }
            Operation::Between => {
                let (low, high) = two_values(self, args)?;
                Ok(compare(input, low)? != Ordering::Less
                    && compare(input, high)? != Ordering::Greater)
            }
            Operation::All => {
                let rule = one_rule(self, args)?;
                for item in collection_of(self, input)? {
                    if !apply_rule(rule, item, source_id, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Operation::Any => {
                let rule = one_rule(self, args)?;
                for item in collection_of(self, input)? {
                    if apply_rule(rule, item, source_id, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn apply_rule(
    rule: &Criterion,
    item: &Value,
    source_id: &str,
    ctx: &EvalContext,
) -> Result<bool> {
    let evaluation = rule.evaluate(item, source_id, ctx);
    match evaluation.verdict {
        Verdict::Passed => Ok(true),
        Verdict::Failed => Ok(false),
        Verdict::Errored => Err(anyhow!(
            "nested rule '{}' errored: {}",
            rule.id,
            evaluation.error.unwrap_or_default()
        )),
    }
}

/// Equality across numeric representations; strict otherwise.
fn loose_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    match (a, b) {
        (Value::Text(x), Value::Enum(y)) | (Value::Enum(x), Value::Text(y)) => x == y,
        _ => a == b,
    }
}

fn canonical_text(value: &Value) -> String {
    value.to_string().trim().to_ascii_lowercase()
}

/// Ordered comparison for mutually comparable values. Incomparable inputs
/// are an error, never a silent result.
fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| anyhow!("cannot order {x} against {y}"));
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Enum(x), Value::Enum(y)) => Ok(x.cmp(y)),
        (Value::Text(x), Value::Enum(y)) | (Value::Enum(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        _ => bail!(
            "cannot compare {} with {}",
            TypeGroup::of(a).name(),
            TypeGroup::of(b).name()
        ),
    }
}

fn truthiness(input: &Value) -> Result<bool> {
    match input {
        Value::Bool(b) => Ok(*b),
        other => bail!("truthiness does not apply to {}", TypeGroup::of(other).name()),
    }
}

fn emptiness(input: &Value) -> Result<bool> {
    match input {
        Value::Null => Ok(true),
        Value::Text(t) => Ok(t.trim().is_empty()),
        Value::List(items) => Ok(items.is_empty()),
        other => bail!("is_empty does not apply to {}", TypeGroup::of(other).name()),
    }
}

fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace("\\*", ".*").replace("\\?", ".");
    Regex::new(&format!("^{escaped}$"))
        .map_err(|err| anyhow!("invalid wildcard pattern '{pattern}': {err}"))
}

fn one_value<'a>(op: Operation, args: &'a [Resolved<'_>]) -> Result<&'a Value> {
    match args {
        [Resolved::Value(value)] => Ok(value),
        _ => bail!("{} expects exactly one value argument", op.name()),
    }
}

fn two_values<'a>(op: Operation, args: &'a [Resolved<'_>]) -> Result<(&'a Value, &'a Value)> {
    match args {
        [Resolved::Value(low), Resolved::Value(high)] => Ok((low, high)),
        [Resolved::Value(Value::List(items))] if items.len() == 2 => Ok((&items[0], &items[1])),
        _ => bail!("{} expects exactly two bound arguments", op.name()),
    }
}

fn one_rule<'a>(op: Operation, args: &'a [Resolved<'a>]) -> Result<&'a Criterion> {
    match args {
        [Resolved::Rule(rule)] => Ok(rule),
        _ => bail!("{} expects exactly one nested rule argument", op.name()),
    }
}

fn collection_of<'a>(op: Operation, input: &'a Value) -> Result<&'a [Value]> {
    match input {
        Value::List(items) => Ok(items),
        other => bail!(
            "{} does not apply to {}",
            op.name(),
            TypeGroup::of(other).name()
        ),
    }
}

fn text_of<'a>(op: Operation, value: &'a Value) -> Result<&'a str> {
    match value {
        Value::Text(t) | Value::Enum(t) => Ok(t),
        other => bail!(
            "{} expects a text argument, got {}",
            op.name(),
            TypeGroup::of(other).name()
        ),
    }
}

fn input_text<'a>(op: Operation, input: &'a Value) -> Result<&'a str> {
    match input {
        Value::Text(t) | Value::Enum(t) => Ok(t),
        other => bail!(
            "{} does not apply to {}",
            op.name(),
            TypeGroup::of(other).name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalContext {
        EvalContext::new()
    }

    fn val(value: Value) -> Resolved<'static> {
        Resolved::Value(value)
    }

    fn run(op: Operation, input: Value, args: Vec<Resolved<'_>>) -> Result<bool> {
        op.execute(&input, &args, "src", &ctx())
    }

    #[test]
    fn equal_to_is_loose_across_numeric_forms() {
        assert!(run(Operation::EqualTo, Value::Int(2), vec![val(Value::Float(2.0))]).expect("ok"));
        assert!(!run(Operation::EqualTo, Value::Int(2), vec![val(Value::Int(3))]).expect("ok"));
    }

    #[test]
    fn equivalent_to_ignores_case_and_whitespace() {
        assert!(run(
            Operation::EquivalentTo,
            Value::Text("BOOL".into()),
            vec![val(Value::Text(" bool ".into()))],
        )
        .expect("ok"));
    }

    #[test]
    fn ordered_comparison_rejects_incomparable_input() {
        let err = run(
            Operation::GreaterThan,
            Value::Bool(true),
            vec![val(Value::Int(1))],
        )
        .expect_err("mismatch");
        assert!(err.to_string().contains("cannot compare"));
    }

    #[test]
    fn between_is_inclusive_on_both_bounds() {
        for input in [Value::Int(0), Value::Int(50), Value::Int(100)] {
            assert!(run(
                Operation::Between,
                input,
                vec![val(Value::Int(0)), val(Value::Int(100))],
            )
            .expect("ok"));
        }
        assert!(!run(
            Operation::Between,
            Value::Int(101),
            vec![val(Value::Int(0)), val(Value::Int(100))],
        )
        .expect("ok"));
    }

    #[test]
    fn between_requires_exactly_two_bounds() {
        let err = run(Operation::Between, Value::Int(1), vec![val(Value::Int(0))])
            .expect_err("arity");
        assert!(err.to_string().contains("exactly two"));
    }

    #[test]
    fn like_translates_wildcards() {
        assert!(run(
            Operation::Like,
            Value::Text("Motor_Run_1".into()),
            vec![val(Value::Text("Motor_*".into()))],
        )
        .expect("ok"));
        assert!(!run(
            Operation::Like,
            Value::Text("Pump_Run".into()),
            vec![val(Value::Text("Motor_?".into()))],
        )
        .expect("ok"));
    }

    #[test]
    fn matches_uses_raw_regex() {
        assert!(run(
            Operation::Matches,
            Value::Text("Tank_12".into()),
            vec![val(Value::Text(r"^Tank_\d+$".into()))],
        )
        .expect("ok"));
    }

    #[test]
    fn contains_works_on_text_and_collections() {
        assert!(run(
            Operation::Contains,
            Value::Text("ConveyorSpeed".into()),
            vec![val(Value::Text("Speed".into()))],
        )
        .expect("ok"));
        assert!(run(
            Operation::Contains,
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            vec![val(Value::Int(2))],
        )
        .expect("ok"));
    }

    #[test]
    fn emptiness_covers_null_text_and_lists() {
        assert!(run(Operation::IsEmpty, Value::Null, Vec::new()).expect("ok"));
        assert!(run(Operation::IsEmpty, Value::Text("  ".into()), Vec::new()).expect("ok"));
        assert!(!run(
            Operation::IsNotEmpty,
            Value::List(Vec::new()),
            Vec::new()
        )
        .expect("ok"));
    }

    #[test]
    fn truthiness_refuses_silent_coercion() {
        let err = run(Operation::IsTrue, Value::Int(1), Vec::new()).expect_err("mismatch");
        assert!(err.to_string().contains("does not apply"));
    }

    #[test]
    fn supporting_filters_the_catalog() {
        let for_bool = Operation::supporting(TypeGroup::Bool);
        assert!(for_bool.contains(&Operation::IsTrue));
        assert!(!for_bool.contains(&Operation::GreaterThan));

        let for_collection = Operation::supporting(TypeGroup::Collection);
        assert!(for_collection.contains(&Operation::All));
        assert!(for_collection.contains(&Operation::Any));
        assert!(!for_collection.contains(&Operation::Like));
    }

    #[test]
    fn supporting_property_uses_the_recorded_leaf_group() {
        let value = Property::new("tag", "value", TypeGroup::Bool).expect("property");
        let offered = Operation::supporting_property(&value);
        assert!(offered.contains(&Operation::IsTrue));
        assert!(!offered.contains(&Operation::Between));

        let data_type = Property::new("tag", "data_type", TypeGroup::Text).expect("property");
        assert!(Operation::supporting_property(&data_type).contains(&Operation::Like));
    }
}
