//! Pure, deterministic evaluation logic.
//!
//! These modules define stable contracts between engine components. They do
//! not perform I/O and must remain deterministic across runs.

pub mod context;
pub mod criterion;
pub mod ident;
pub mod invariants;
pub mod node;
pub mod operation;
pub mod property;
pub mod spec;
pub mod step;
pub mod value;
pub mod verdict;
