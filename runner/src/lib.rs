//! Run orchestration for the spec evaluation engine.
//!
//! The `engine` crate evaluates one spec against one source; this crate
//! wraps that in runs and batches:
//!
//! - **[`run`]**: sequential execution of a node's specs against one
//!   source, with hooks and coarse-grained cancellation.
//! - **[`batch`]**: parallel execution across many sources, each worker
//!   owning its own parsed content.
//! - **[`cache`]**: the content-addressable cache of parsed sources that
//!   makes repeated batch runs cheap.

pub mod batch;
pub mod cache;
pub mod config;
pub mod logging;
pub mod run;
