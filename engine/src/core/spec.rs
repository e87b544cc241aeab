//! Specs: ordered step pipelines with a root element selector.

use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::context::EvalContext;
use crate::core::ident::fresh_id;
use crate::core::step::{Step, StepOutput};
use crate::core::value::Value;
use crate::core::verdict::{Verdict, Verification};
use crate::source::Source;

/// Current persisted format version.
pub const SPEC_VERSION: u32 = 1;

fn default_version() -> u32 {
    SPEC_VERSION
}

/// An ordered pipeline of steps plus a root element selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub id: String,
    /// Schema-version tag for the persistence layer's migration logic.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Root element kind queried before the first step runs.
    pub element: String,
    /// Optional root name scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Verdict reported when the pipeline yields no verifications.
    #[serde(default)]
    pub default_result: Verdict,
}

impl Spec {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            id: fresh_id("spec"),
            version: SPEC_VERSION,
            element: element.into(),
            name: None,
            steps: Vec::new(),
            default_result: Verdict::Passed,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_default_result(mut self, verdict: Verdict) -> Self {
        self.default_result = verdict;
        self
    }

    /// Deep copy with a fresh id.
    pub fn duplicate(&self) -> Spec {
        Spec {
            id: fresh_id("spec"),
            ..self.clone()
        }
    }

    /// Bind references in every criterion of every step.
    pub fn bind_references(&mut self, resolver: &dyn Fn(&str) -> Option<Value>) {
        for step in &mut self.steps {
            match step {
                Step::Filter { criteria, .. } | Step::Verify { criteria, .. } => {
                    for criterion in criteria {
                        criterion.bind_references(resolver);
                    }
                }
                Step::Query { .. } | Step::Select { .. } => {}
            }
        }
    }

    /// Run the full pipeline against a source.
    ///
    /// Queries the root element kind, folds steps left to right, and
    /// collects verifications. A pipeline that yields nothing reports one
    /// verification carrying the configured default result; any unhandled
    /// fault converts to a single errored verification rather than
    /// propagating.
    #[instrument(skip_all, fields(spec_id = %self.id, source_id = %source.id()))]
    pub fn run(&self, source: &dyn Source, ctx: &EvalContext) -> Vec<Verification> {
        let started = Instant::now();
        let attempt = (|| -> Result<Vec<Verification>> {
            let mut candidates: Vec<Value> = source
                .elements(&self.element, self.name.as_deref())
                .into_iter()
                .map(Value::Element)
                .collect();
            debug!(count = candidates.len(), element = %self.element, "root elements queried");

            let mut verifications = Vec::new();
            for step in &self.steps {
                match step.process(std::mem::take(&mut candidates), source, ctx)? {
                    StepOutput::Candidates(next) => candidates = next,
                    StepOutput::Verifications(found) => verifications.extend(found),
                }
            }
            Ok(verifications)
        })();

        let duration_ms = started.elapsed().as_millis() as u64;
        match attempt {
            Ok(verifications) if verifications.is_empty() => {
                vec![Verification::of(self.default_result, duration_ms)]
            }
            Ok(verifications) => verifications,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "spec run failed");
                vec![Verification::errored(format!("{err:#}"), duration_ms)]
            }
        }
    }
}
