//! Declarative specification evaluation engine.
//!
//! Specs are ordered pipelines of steps (query, filter, select, verify) run
//! against a [`source::Source`] of structured elements. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic evaluation logic (values, property
//!   navigation, the operation catalog, criteria, steps, specs, nodes).
//!   No I/O, fully testable in isolation.
//! - **[`source`]**: The seam to the outside world. The engine never parses
//!   the underlying export format; it only queries elements by kind and
//!   optional name through the [`source::Source`] trait.
//!
//! Run orchestration (sequential runs, parallel batches, the source cache)
//! lives in the `runner` crate.

pub mod core;
pub mod source;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
