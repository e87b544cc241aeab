//! Immutable result records.
//!
//! An [`Evaluation`] is the outcome of one criterion against one candidate;
//! a [`Verification`] aggregates evaluations for one candidate set. Both are
//! append-only: re-running produces new instances.

use serde::{Deserialize, Serialize};

/// Result severity. Ordering matters: aggregation takes the maximum, so
/// `Errored` dominates `Failed` dominates `Passed`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Passed,
    Failed,
    Errored,
}

impl Verdict {
    pub fn from_pass(passed: bool) -> Verdict {
        if passed { Verdict::Passed } else { Verdict::Failed }
    }

    /// Max-severity fold; an empty input is `Passed` (vacuous).
    pub fn worst_of(verdicts: impl IntoIterator<Item = Verdict>) -> Verdict {
        verdicts.into_iter().max().unwrap_or(Verdict::Passed)
    }
}

/// The result of one criterion applied to one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub criterion_id: String,
    pub source_id: String,
    pub verdict: Verdict,
    /// Rendered candidate the criterion was applied to.
    pub candidate: String,
    /// Rendered criteria text (property, operation, expected values).
    pub criteria: String,
    /// Rendered expected values, one per argument.
    pub expected: Vec<String>,
    /// Rendered actual extracted value; empty when evaluation errored
    /// before extraction.
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The aggregated result of one spec run against one candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verdict: Verdict,
    pub duration_ms: u64,
    /// Fraction of passed evaluations (or of passed parts when merged).
    pub pass_rate: f64,
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verification {
    /// Build a verification with an explicit verdict over its evaluations.
    pub fn new(verdict: Verdict, duration_ms: u64, evaluations: Vec<Evaluation>) -> Self {
        let pass_rate = if evaluations.is_empty() {
            match verdict {
                Verdict::Passed => 1.0,
                _ => 0.0,
            }
        } else {
            let passed = evaluations
                .iter()
                .filter(|e| e.verdict == Verdict::Passed)
                .count();
            passed as f64 / evaluations.len() as f64
        };
        Self {
            verdict,
            duration_ms,
            pass_rate,
            evaluations,
            error: None,
        }
    }

    /// Aggregate evaluations by max severity.
    pub fn aggregate(evaluations: Vec<Evaluation>, duration_ms: u64) -> Self {
        let verdict = Verdict::worst_of(evaluations.iter().map(|e| e.verdict));
        Self::new(verdict, duration_ms, evaluations)
    }

    /// A verification carrying only a configured verdict (used when a
    /// pipeline yields nothing).
    pub fn of(verdict: Verdict, duration_ms: u64) -> Self {
        Self::new(verdict, duration_ms, Vec::new())
    }

    /// A whole-run error converted into a single errored verification.
    pub fn errored(message: impl Into<String>, duration_ms: u64) -> Self {
        let mut verification = Self::new(Verdict::Errored, duration_ms, Vec::new());
        verification.error = Some(message.into());
        verification
    }

    /// Merge many verifications into one: max-severity verdict, summed
    /// duration, concatenated evaluations, pass rate over the parts.
    pub fn merge(parts: Vec<Verification>) -> Verification {
        if parts.is_empty() {
            return Verification::of(Verdict::Passed, 0);
        }
        let verdict = Verdict::worst_of(parts.iter().map(|p| p.verdict));
        let duration_ms = parts.iter().map(|p| p.duration_ms).sum();
        let passed = parts.iter().filter(|p| p.verdict == Verdict::Passed).count();
        let pass_rate = passed as f64 / parts.len() as f64;
        let error = parts.iter().find_map(|p| p.error.clone());
        let evaluations = parts.into_iter().flat_map(|p| p.evaluations).collect();
        Verification {
            verdict,
            duration_ms,
            pass_rate,
            evaluations,
            error,
        }
    }
}
