//! The step pipeline.
//!
//! A spec is an ordered list of steps; each stage fully materializes its
//! output before the next begins. Step subtypes are tagged by kind so a
//! persisted spec round-trips losslessly.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::context::EvalContext;
use crate::core::criterion::Criterion;
use crate::core::property::Property;
use crate::core::value::{Element, Value};
use crate::core::verdict::{Evaluation, Verdict, Verification};
use crate::source::Source;

/// Policy for combining multiple criteria over one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Match {
    #[default]
    All,
    Any,
}

/// One projected column of a select step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub property: Property,
    pub alias: String,
}

/// Static shape of a pipeline stage's output, for downstream tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Elements,
    Records,
    Verifications,
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Retrieve all elements of a kind from the source; an optional name
    /// scopes to an exact or container-qualified match.
    Query {
        element: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Drop candidates that do not satisfy the match policy.
    Filter {
        criteria: Vec<Criterion>,
        #[serde(default)]
        policy: Match,
    },
    /// Project each candidate into a flat alias-keyed record.
    Select { selections: Vec<Selection> },
    /// Terminal stage: one verification per remaining candidate.
    Verify {
        criteria: Vec<Criterion>,
        #[serde(default)]
        policy: Match,
    },
}

/// Output of one stage: either the next candidate set or the terminal
/// verifications.
#[derive(Debug)]
pub enum StepOutput {
    Candidates(Vec<Value>),
    Verifications(Vec<Verification>),
}

impl Step {
    /// Shape inference: what this stage yields given its input shape.
    pub fn returns(&self, input: Shape) -> Shape {
        match self {
            Step::Query { .. } => Shape::Elements,
            Step::Filter { .. } => input,
            Step::Select { .. } => Shape::Records,
            Step::Verify { .. } => Shape::Verifications,
        }
    }

    /// Transform one candidate set into the next.
    pub fn process(
        &self,
        candidates: Vec<Value>,
        source: &dyn Source,
        ctx: &EvalContext,
    ) -> Result<StepOutput> {
        match self {
            Step::Query { element, name } => Ok(StepOutput::Candidates(
                source
                    .elements(element, name.as_deref())
                    .into_iter()
                    .map(Value::Element)
                    .collect(),
            )),
            Step::Filter { criteria, policy } => {
                let source_id = source.id();
                let kept = candidates
                    .into_iter()
                    .filter(|candidate| satisfied(criteria, *policy, candidate, source_id, ctx))
                    .collect();
                Ok(StepOutput::Candidates(kept))
            }
            Step::Select { selections } => {
                let mut records = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let mut fields = BTreeMap::new();
                    for selection in selections {
                        let value = selection.property.get_value(&candidate, ctx)?;
                        fields.insert(selection.alias.clone(), value);
                    }
                    let name = match &candidate {
                        Value::Element(el) => el.name.clone(),
                        other => other.to_string(),
                    };
                    records.push(Value::Element(Element {
                        kind: "record".to_string(),
                        name,
                        container: None,
                        fields,
                    }));
                }
                Ok(StepOutput::Candidates(records))
            }
            Step::Verify { criteria, policy } => {
                let source_id = source.id();
                let verifications = candidates
                    .iter()
                    .map(|candidate| {
                        let started = Instant::now();
                        let evaluations: Vec<Evaluation> = criteria
                            .iter()
                            .map(|criterion| criterion.evaluate(candidate, source_id, ctx))
                            .collect();
                        let duration_ms = started.elapsed().as_millis() as u64;
                        match policy {
                            // The all-policy is exactly the max-severity fold.
                            Match::All => Verification::aggregate(evaluations, duration_ms),
                            Match::Any => {
                                let verdict = judge(&evaluations, Match::Any);
                                Verification::new(verdict, duration_ms, evaluations)
                            }
                        }
                    })
                    .collect();
                Ok(StepOutput::Verifications(verifications))
            }
        }
    }
}

/// Combine per-candidate evaluations under a policy. An errored evaluation
/// dominates either policy.
fn judge(evaluations: &[Evaluation], policy: Match) -> Verdict {
    let worst = Verdict::worst_of(evaluations.iter().map(|e| e.verdict));
    if worst == Verdict::Errored {
        return Verdict::Errored;
    }
    match policy {
        Match::All => worst,
        Match::Any => {
            Verdict::from_pass(evaluations.iter().any(|e| e.verdict == Verdict::Passed))
        }
    }
}

/// Filter predicate: errored evaluations count as non-matching but are
/// logged so silent drops stay diagnosable.
fn satisfied(
    criteria: &[Criterion],
    policy: Match,
    candidate: &Value,
    source_id: &str,
    ctx: &EvalContext,
) -> bool {
    let evaluations: Vec<Evaluation> = criteria
        .iter()
        .map(|criterion| criterion.evaluate(candidate, source_id, ctx))
        .collect();
    for evaluation in &evaluations {
        if evaluation.verdict == Verdict::Errored {
            warn!(
                criterion = %evaluation.criterion_id,
                candidate = %evaluation.candidate,
                error = evaluation.error.as_deref().unwrap_or(""),
                "filter criterion errored; candidate dropped"
            );
        }
    }
    judge(&evaluations, policy) == Verdict::Passed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::criterion::Argument;
    use crate::core::operation::Operation;
    use crate::core::value::TypeGroup;
    use crate::source::ParsedSource;
    use crate::test_support::{bool_tag, dint_tag};

    fn ctx() -> EvalContext {
        EvalContext::new()
    }

    fn source() -> ParsedSource {
        let mut source = ParsedSource::new("demo");
        source.push(bool_tag("Motor_Run", true));
        source.push(bool_tag("Pump_Run", true));
        source.push(bool_tag("Valve_Open", false));
        source.push(dint_tag("Counter", 12));
        source
    }

    fn data_type_filter(data_type: &str) -> Step {
        Step::Filter {
            criteria: vec![
                Criterion::new(
                    TypeGroup::Text,
                    Some(Property::new("tag", "data_type", TypeGroup::Text).expect("property")),
                    Operation::EqualTo,
                )
                .expect("criterion")
                .with_argument(Argument::literal(Value::Text(data_type.into()))),
            ],
            policy: Match::All,
        }
    }

    #[test]
    fn query_pulls_elements_by_kind_and_name() {
        let source = source();
        let step = Step::Query {
            element: "tag".into(),
            name: None,
        };
        let StepOutput::Candidates(all) =
            step.process(Vec::new(), &source, &ctx()).expect("process")
        else {
            panic!("expected candidates");
        };
        assert_eq!(all.len(), 4);

        let scoped = Step::Query {
            element: "tag".into(),
            name: Some("Motor_Run".into()),
        };
        let StepOutput::Candidates(found) =
            scoped.process(Vec::new(), &source, &ctx()).expect("process")
        else {
            panic!("expected candidates");
        };
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn filter_drops_non_matching_candidates() {
        let source = source();
        let candidates: Vec<Value> = source
            .elements("tag", None)
            .into_iter()
            .map(Value::Element)
            .collect();
        let StepOutput::Candidates(kept) = data_type_filter("BOOL")
            .process(candidates, &source, &ctx())
            .expect("process")
        else {
            panic!("expected candidates");
        };
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn select_projects_alias_keyed_records() {
        let source = source();
        let candidates: Vec<Value> = source
            .elements("tag", Some("Counter"))
            .into_iter()
            .map(Value::Element)
            .collect();
        let step = Step::Select {
            selections: vec![Selection {
                property: Property::new("tag", "value", TypeGroup::Number).expect("property"),
                alias: "current".into(),
            }],
        };
        let StepOutput::Candidates(records) =
            step.process(candidates, &source, &ctx()).expect("process")
        else {
            panic!("expected candidates");
        };
        let Value::Element(record) = &records[0] else {
            panic!("expected element");
        };
        assert_eq!(record.kind, "record");
        assert_eq!(record.fields.get("current"), Some(&Value::Int(12)));
    }

    #[test]
    fn verify_emits_one_verification_per_candidate() {
        let source = source();
        let candidates: Vec<Value> = source
            .elements("tag", None)
            .into_iter()
            .map(Value::Element)
            .filter(|v| matches!(v, Value::Element(el) if el.fields.get("data_type") == Some(&Value::Text("BOOL".into()))))
            .collect();
        let step = Step::Verify {
            criteria: vec![
                Criterion::new(
                    TypeGroup::Bool,
                    Some(Property::new("tag", "value", TypeGroup::Bool).expect("property")),
                    Operation::IsTrue,
                )
                .expect("criterion"),
            ],
            policy: Match::All,
        };
        let StepOutput::Verifications(verifications) =
            step.process(candidates, &source, &ctx()).expect("process")
        else {
            panic!("expected verifications");
        };
        assert_eq!(verifications.len(), 3);
        let passed = verifications
            .iter()
            .filter(|v| v.verdict == Verdict::Passed)
            .count();
        assert_eq!(passed, 2);
    }

    /// An erroring criterion dominates even the any-policy: one criterion
    /// passing is not enough to mask another that could not evaluate.
    #[test]
    fn errored_criterion_dominates_any_policy() {
        let source = source();
        let candidates: Vec<Value> = source
            .elements("tag", Some("Motor_Run"))
            .into_iter()
            .map(Value::Element)
            .collect();
        let step = Step::Verify {
            criteria: vec![
                Criterion::new(
                    TypeGroup::Bool,
                    Some(Property::new("tag", "value", TypeGroup::Bool).expect("property")),
                    Operation::IsTrue,
                )
                .expect("criterion"),
                // Wrong origin kind, so evaluation errors on every candidate.
                Criterion::new(
                    TypeGroup::Bool,
                    Some(Property::new("module", "value", TypeGroup::Bool).expect("property")),
                    Operation::IsTrue,
                )
                .expect("criterion"),
            ],
            policy: Match::Any,
        };
        let StepOutput::Verifications(verifications) =
            step.process(candidates, &source, &ctx()).expect("process")
        else {
            panic!("expected verifications");
        };
        assert_eq!(verifications.len(), 1);
        assert_eq!(verifications[0].verdict, Verdict::Errored);
    }

    /// Under the all-policy a verification's pass rate reflects the
    /// max-severity fold over its evaluations.
    #[test]
    fn all_policy_verification_carries_the_fold() {
        let source = source();
        let candidates: Vec<Value> = source
            .elements("tag", Some("Valve_Open"))
            .into_iter()
            .map(Value::Element)
            .collect();
        let step = Step::Verify {
            criteria: vec![
                Criterion::new(
                    TypeGroup::Bool,
                    Some(Property::new("tag", "value", TypeGroup::Bool).expect("property")),
                    Operation::IsFalse,
                )
                .expect("criterion"),
                Criterion::new(
                    TypeGroup::Bool,
                    Some(Property::new("tag", "value", TypeGroup::Bool).expect("property")),
                    Operation::IsTrue,
                )
                .expect("criterion"),
            ],
            policy: Match::All,
        };
        let StepOutput::Verifications(verifications) =
            step.process(candidates, &source, &ctx()).expect("process")
        else {
            panic!("expected verifications");
        };
        assert_eq!(verifications.len(), 1);
        assert_eq!(verifications[0].verdict, Verdict::Failed);
        assert!((verifications[0].pass_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn shape_inference_follows_stage_kind() {
        let filter = data_type_filter("BOOL");
        assert_eq!(filter.returns(Shape::Elements), Shape::Elements);
        assert_eq!(filter.returns(Shape::Records), Shape::Records);

        let select = Step::Select { selections: Vec::new() };
        assert_eq!(select.returns(Shape::Elements), Shape::Records);

        let verify = Step::Verify {
            criteria: Vec::new(),
            policy: Match::All,
        };
        assert_eq!(verify.returns(Shape::Records), Shape::Verifications);
    }

    #[test]
    fn steps_round_trip_through_tagged_json() {
        let steps = vec![
            Step::Query {
                element: "tag".into(),
                name: Some("Main:Motor_Run".into()),
            },
            data_type_filter("BOOL"),
            Step::Select {
                selections: vec![Selection {
                    property: Property::new("tag", "value", TypeGroup::Bool).expect("property"),
                    alias: "current".into(),
                }],
            },
            Step::Verify {
                criteria: Vec::new(),
                policy: Match::Any,
            },
        ];
        let json = serde_json::to_string(&steps).expect("serialize");
        assert!(json.contains("\"type\":\"query\""));
        assert!(json.contains("\"type\":\"verify\""));
        let back: Vec<Step> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, steps);
    }
}
