//! Term representation, binding store and unification
//!
//! This module provides the fundamental types the engine works on: terms,
//! the per-query binding store with its trail, and unification with
//! attributed variables.

pub mod bindings;
pub mod term;
pub mod unification;

// Re-export commonly used types
pub use bindings::{Attributes, Bindings, Mark, RenameMap};
pub use term::{Atom, Compound, ListCell, PredicateKey, Term, TermKind, VarId, LIST_FUNCTOR};
pub use unification::{unify, unify_args, AttributeHook, AttributeHooks};
