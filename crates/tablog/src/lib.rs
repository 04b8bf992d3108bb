//! tablog: a resolution engine for logic programs
//!
//! This library evaluates already-parsed Horn clause programs: terms and
//! unification with a trail, indexed clause storage, backtracking resolution
//! with cut, builtins and arithmetic, and tabled predicates whose answers are
//! computed once and shared between threads.

pub mod arithmetic;
pub mod config;
pub mod engine;
pub mod error;
pub mod kb;
pub mod logic;
pub mod store;
pub mod tabling;

// Re-export commonly used types
pub use arithmetic::{ArithmeticOperators, Numeric};
pub use config::{EngineConfig, UnknownPredicate};
pub use engine::{
    Machine, Outcome, Predicate, PredicateFactory, TraceEvent, TraceListener, TracePort,
    TraceRecorder,
};
pub use error::{EngineError, ErrorKind, Frame, Result};
pub use kb::{KnowledgeBase, Query};
pub use logic::{unify, Atom, AttributeHook, Bindings, Mark, PredicateKey, Term, TermKind, VarId};
pub use store::{ClauseModel, Storage};
pub use tabling::{CallSignature, TablingManager};
