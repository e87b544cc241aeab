//! Sequential execution of a node tree against one source.
//!
//! A run walks the tree's bound specs in declaration order, one at a time.
//! Parallelism lives one level up, across sources, in [`crate::batch`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use engine::core::context::EvalContext;
use engine::core::ident::fresh_id;
use engine::core::node::{BoundSpec, Node};
use engine::core::verdict::{Verdict, Verification};
use engine::source::Source;

/// Shared cancellation flag, checked between spec executions.
///
/// Coarse-grained: an in-flight evaluation finishes, no further spec starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final state of a run. `Canceled` is a control signal, never a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Passed,
    Failed,
    Errored,
    Canceled,
}

impl From<Verdict> for RunVerdict {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Passed => RunVerdict::Passed,
            Verdict::Failed => RunVerdict::Failed,
            Verdict::Errored => RunVerdict::Errored,
        }
    }
}

/// The latest verification of one spec within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub node_id: String,
    pub spec_id: String,
    pub source_id: String,
    pub verification: Verification,
}

impl Outcome {
    pub fn new(bound: &BoundSpec, source_id: &str, verification: Verification) -> Self {
        Self {
            id: fresh_id("outcome"),
            node_id: bound.node_id.clone(),
            spec_id: bound.spec.id.clone(),
            source_id: source_id.to_string(),
            verification,
        }
    }

    /// Replace the verification wholesale; prior evaluations are dropped.
    pub fn apply(&mut self, verification: Verification) {
        self.verification = verification;
    }
}

/// One execution of a node tree against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub name: String,
    /// The tree exactly as it was executed. Editing the live tree after the
    /// fact leaves past runs untouched, and outcome node ids keep pointing
    /// into this snapshot.
    pub node: Node,
    pub source_id: String,
    /// Hex sha256 of the raw source content; pins the run to the cached
    /// payload it was executed against. `None` when the caller supplied an
    /// already-parsed source directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    pub result: RunVerdict,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Keyed by spec id; each spec keeps its latest outcome only.
    #[serde(default)]
    pub outcomes: BTreeMap<String, Outcome>,
}

/// Observers invoked around each spec execution.
#[derive(Default)]
pub struct RunHooks<'a> {
    pub on_running: Option<&'a dyn Fn(&BoundSpec)>,
    pub on_completed: Option<&'a dyn Fn(&BoundSpec, &Verification)>,
}

/// Execute every bound spec of the tree against a source, sequentially.
///
/// The cancel token is checked once per spec; a canceled run keeps the
/// outcomes gathered so far and ends as [`RunVerdict::Canceled`].
#[instrument(skip_all, fields(node_id = %node.id, source_id = %source.id()))]
pub fn execute(
    node: &Node,
    source: &dyn Source,
    ctx: &EvalContext,
    hooks: &RunHooks<'_>,
    cancel: &CancelToken,
) -> Run {
    let started_at = Utc::now();
    let mut outcomes: BTreeMap<String, Outcome> = BTreeMap::new();
    let mut canceled = false;

    for bound in node.resolved_specs() {
        if cancel.is_canceled() {
            canceled = true;
            break;
        }
        if let Some(on_running) = hooks.on_running {
            on_running(&bound);
        }
        let verification = Verification::merge(bound.spec.run(source, ctx));
        if let Some(on_completed) = hooks.on_completed {
            on_completed(&bound, &verification);
        }
        match outcomes.get_mut(&bound.spec.id) {
            Some(outcome) => outcome.apply(verification),
            None => {
                let outcome = Outcome::new(&bound, source.id(), verification);
                outcomes.insert(outcome.spec_id.clone(), outcome);
            }
        }
    }

    let result = if canceled {
        RunVerdict::Canceled
    } else {
        Verdict::worst_of(outcomes.values().map(|o| o.verification.verdict)).into()
    };
    let finished_at = Utc::now();
    info!(result = ?result, outcomes = outcomes.len(), "run finished");

    Run {
        id: fresh_id("run"),
        name: node.name.clone(),
        node: node.clone(),
        source_id: source.id().to_string(),
        source_digest: None,
        result,
        started_at,
        finished_at,
        outcomes,
    }
}
