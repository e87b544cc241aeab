//! Parallel runs across many sources.
//!
//! One node tree, many sources. Each worker owns its parsed source: it
//! reads the raw content, fetches or parses it through the cache, then
//! executes an ordinary sequential run. Completion order across sources is
//! unspecified; within a source, spec order is preserved.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use engine::core::context::EvalContext;
use engine::core::node::Node;
use engine::source::ParsedSource;

use crate::cache::SourceCache;
use crate::run::{CancelToken, Run, RunHooks, execute};

/// Turns raw source content into a [`ParsedSource`]; shared across workers.
pub type ParseFn<'a> = &'a (dyn Fn(&str, &[u8]) -> Result<ParsedSource> + Sync);

/// One source to run against: a stable identity plus raw content on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInput {
    pub id: String,
    pub path: PathBuf,
}

impl SourceInput {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// A source that could not be read or parsed. Failures never abort the
/// batch; they are excluded and reported here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub runs: Vec<Run>,
    #[serde(default)]
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Executes one node tree against many sources on a bounded worker pool.
pub struct Runner {
    pool: rayon::ThreadPool,
    cache: SourceCache,
}

impl Runner {
    /// `worker_threads == 0` sizes the pool to the logical CPU count.
    pub fn new(cache: SourceCache, worker_threads: usize) -> Result<Self> {
        let threads = if worker_threads == 0 {
            num_cpus::get()
        } else {
            worker_threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("build worker pool")?;
        Ok(Self { pool, cache })
    }

    /// Run the tree against every source in parallel.
    ///
    /// The cancel token is shared: canceling stops every in-progress run at
    /// its next spec boundary.
    #[instrument(skip_all, fields(node_id = %node.id, sources = inputs.len()))]
    pub fn run_batch(
        &self,
        node: &Node,
        inputs: &[SourceInput],
        ctx: &EvalContext,
        parse: ParseFn<'_>,
        cancel: &CancelToken,
    ) -> BatchReport {
        let results: Vec<Result<Run, BatchFailure>> = self.pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    self.run_one(node, input, ctx, parse, cancel).map_err(|err| {
                        let error = format!("{err:#}");
                        warn!(source_id = %input.id, error = %error, "source excluded from batch");
                        BatchFailure {
                            source_id: input.id.clone(),
                            error,
                        }
                    })
                })
                .collect()
        });

        let mut runs = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(run) => runs.push(run),
                Err(failure) => failures.push(failure),
            }
        }
        BatchReport { runs, failures }
    }

    fn run_one(
        &self,
        node: &Node,
        input: &SourceInput,
        ctx: &EvalContext,
        parse: ParseFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Run> {
        let content =
            fs::read(&input.path).with_context(|| format!("read {}", input.path.display()))?;
        let digest = crate::cache::content_digest(&content);
        let source = self.cache.get_or_add(&input.id, &content, parse)?;
        let mut run = execute(node, &source, ctx, &RunHooks::default(), cancel);
        run.source_digest = Some(digest);
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use engine::core::node::NodeKind;
    use engine::core::spec::Spec;
    use engine::test_support::demo_source;

    use super::*;
    use crate::run::RunVerdict;

    fn parse_marker(id: &str, bytes: &[u8]) -> Result<ParsedSource> {
        if bytes == b"bad" {
            anyhow::bail!("unreadable export");
        }
        Ok(demo_source(id))
    }

    fn write_input(dir: &std::path::Path, id: &str, content: &[u8]) -> SourceInput {
        let path = dir.join(format!("{id}.raw"));
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(content).expect("write");
        SourceInput::new(id, path)
    }

    #[test]
    fn batch_runs_every_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut node = Node::new(NodeKind::Spec, "plant");
        node.add_spec(Spec::new("tag"));

        let inputs = vec![
            write_input(temp.path(), "plc-1", b"export-1"),
            write_input(temp.path(), "plc-2", b"export-2"),
            write_input(temp.path(), "plc-3", b"export-3"),
        ];

        let runner = Runner::new(SourceCache::new(temp.path().join("cache")), 2).expect("runner");
        let ctx = EvalContext::new();
        let report = runner.run_batch(&node, &inputs, &ctx, &parse_marker, &CancelToken::new());

        assert_eq!(report.runs.len(), 3);
        assert_eq!(report.failed(), 0);
        assert!(report.runs.iter().all(|run| run.result == RunVerdict::Passed));
    }

    #[test]
    fn corrupt_source_is_excluded_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut node = Node::new(NodeKind::Spec, "plant");
        node.add_spec(Spec::new("tag"));

        let inputs = vec![
            write_input(temp.path(), "plc-1", b"export-1"),
            write_input(temp.path(), "plc-2", b"bad"),
        ];

        let runner = Runner::new(SourceCache::new(temp.path().join("cache")), 2).expect("runner");
        let ctx = EvalContext::new();
        let report = runner.run_batch(&node, &inputs, &ctx, &parse_marker, &CancelToken::new());

        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].source_id, "plc-2");
        assert!(report.failures[0].error.contains("unreadable export"));
    }

    /// Every batch run pins itself to the content it was executed against:
    /// the digest names the cached payload, the node snapshot the tree.
    #[test]
    fn batch_runs_record_tree_and_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut node = Node::new(NodeKind::Spec, "plant");
        node.add_spec(Spec::new("tag"));

        let inputs = vec![write_input(temp.path(), "plc-1", b"export-1")];
        let runner = Runner::new(SourceCache::new(temp.path().join("cache")), 1).expect("runner");
        let ctx = EvalContext::new();
        let report = runner.run_batch(&node, &inputs, &ctx, &parse_marker, &CancelToken::new());

        let run = &report.runs[0];
        assert_eq!(
            run.source_digest.as_deref(),
            Some(crate::cache::content_digest(b"export-1").as_str())
        );
        assert_eq!(run.node.id, node.id);
        assert_eq!(run.node.specs.len(), 1);
    }

    #[test]
    fn missing_file_is_a_reported_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut node = Node::new(NodeKind::Spec, "plant");
        node.add_spec(Spec::new("tag"));

        let inputs = vec![SourceInput::new("ghost", temp.path().join("ghost.raw"))];
        let runner = Runner::new(SourceCache::new(temp.path().join("cache")), 1).expect("runner");
        let ctx = EvalContext::new();
        let report = runner.run_batch(&node, &inputs, &ctx, &parse_marker, &CancelToken::new());

        assert!(report.runs.is_empty());
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn precanceled_batch_yields_canceled_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut node = Node::new(NodeKind::Spec, "plant");
        node.add_spec(Spec::new("tag"));

        let inputs = vec![write_input(temp.path(), "plc-1", b"export-1")];
        let runner = Runner::new(SourceCache::new(temp.path().join("cache")), 1).expect("runner");
        let ctx = EvalContext::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = runner.run_batch(&node, &inputs, &ctx, &parse_marker, &cancel);
        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.runs[0].result, RunVerdict::Canceled);
        assert!(report.runs[0].outcomes.is_empty());
    }
}
