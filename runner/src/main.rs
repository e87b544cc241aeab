//! Command-line entry point: run node trees against parsed sources.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use engine::core::context::EvalContext;
use engine::core::invariants::validate_tree;
use engine::core::node::Node;
use engine::core::operation::Operation;
use engine::core::value::TypeGroup;
use engine::source::ParsedSource;

use runner::batch::{Runner, SourceInput};
use runner::cache::SourceCache;
use runner::config::load_config;
use runner::run::CancelToken;

#[derive(Parser)]
#[command(
    name = "runner",
    version,
    about = "Run declarative spec trees against parsed sources"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node tree (JSON) against one or more parsed source files.
    Run {
        /// Path to the node tree.
        node: PathBuf,
        /// Parsed source files (JSON), one per source.
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Override the configured cache directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Runner config (TOML).
        #[arg(long, default_value = ".runner/config.toml")]
        config: PathBuf,
    },
    /// Check a node tree for structural violations.
    Validate {
        /// Path to the node tree.
        node: PathBuf,
    },
    /// List the operation catalog, optionally scoped to one type group.
    Operations {
        /// Type group name, e.g. `bool` or `collection`.
        group: Option<String>,
    },
}

fn main() {
    runner::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            node,
            sources,
            cache_dir,
            config,
        } => cmd_run(&node, &sources, cache_dir, &config),
        Command::Validate { node } => cmd_validate(&node),
        Command::Operations { group } => cmd_operations(group.as_deref()),
    }
}

fn cmd_run(
    node_path: &Path,
    sources: &[PathBuf],
    cache_dir: Option<PathBuf>,
    config_path: &Path,
) -> Result<()> {
    let cfg = load_config(config_path)?;
    let cache_dir = cache_dir.unwrap_or(cfg.cache_dir);

    let node = load_node(node_path)?;
    let inputs: Vec<SourceInput> = sources.iter().map(|path| source_input(path)).collect::<Result<_>>()?;

    let runner = Runner::new(SourceCache::new(cache_dir), cfg.worker_threads)?;
    let ctx = EvalContext::new();
    let report = runner.run_batch(&node, &inputs, &ctx, &parse_source, &CancelToken::new());

    let mut payload = serde_json::to_string_pretty(&report).context("serialize batch report")?;
    payload.push('\n');
    print!("{payload}");
    Ok(())
}

fn cmd_validate(node_path: &Path) -> Result<()> {
    load_node(node_path)?;
    Ok(())
}

fn cmd_operations(group: Option<&str>) -> Result<()> {
    let operations = match group {
        Some(name) => Operation::supporting(parse_group(name)?),
        None => Operation::ALL.to_vec(),
    };
    for operation in operations {
        println!("{}", operation.name());
    }
    Ok(())
}

/// Parse a node tree file and reject it on invariant violations.
fn load_node(path: &Path) -> Result<Node> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let node: Node = serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let errors = validate_tree(&node);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(node)
}

/// Derive the source identity from the file stem.
fn source_input(path: &Path) -> Result<SourceInput> {
    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("source path has no usable file stem: {}", path.display()))?;
    Ok(SourceInput::new(id, path))
}

/// Default source parser: the file already holds a serialized
/// [`ParsedSource`]; the id is overridden by the input's identity.
fn parse_source(id: &str, bytes: &[u8]) -> Result<ParsedSource> {
    let mut source: ParsedSource =
        serde_json::from_slice(bytes).context("parse source file as json")?;
    source.id = id.to_string();
    Ok(source)
}

fn parse_group(name: &str) -> Result<TypeGroup> {
    const GROUPS: [TypeGroup; 12] = [
        TypeGroup::Bool,
        TypeGroup::Number,
        TypeGroup::Text,
        TypeGroup::Date,
        TypeGroup::Enum,
        TypeGroup::Collection,
        TypeGroup::Element,
        TypeGroup::Rule,
        TypeGroup::Reference,
        TypeGroup::Variable,
        TypeGroup::Argument,
        TypeGroup::Default,
    ];
    GROUPS
        .into_iter()
        .find(|group| group.name() == name)
        .with_context(|| format!("unknown type group '{name}'"))
}
