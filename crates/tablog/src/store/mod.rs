//! Clause storage and indexing
//!
//! - `clause`: clause templates, clause entries and per-predicate clause lists
//! - `index`: composite lookup tables over index-eligible columns
//! - `predicate`: static and dynamic user predicates and their dispatch

pub mod clause;
pub mod index;
pub mod predicate;

pub use clause::{ClauseEntry, ClauseModel, ClauseOutcome, Clauses};
pub use index::Indexes;
pub use predicate::{Storage, UserPredicate};
