//! Error types for tablog

use crate::logic::{PredicateKey, Term};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// What went wrong, independent of where.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("instantiation error")]
    Instantiation,

    #[error("type error: expected {expected}, found {culprit}")]
    Type { expected: &'static str, culprit: Term },

    #[error("evaluation error: {0}")]
    Evaluation(&'static str),

    #[error("existence error: unknown procedure {0}")]
    Existence(PredicateKey),

    #[error("permission error: cannot {action} {key}")]
    Permission {
        action: &'static str,
        key: PredicateKey,
    },

    #[error("tabling error: {0}")]
    Tabling(String),
}

/// One interpreted predicate an error passed through on its way out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub key: PredicateKey,
    /// Position of the clause whose body raised the error.
    pub clause: usize,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} clause {}", self.key, self.clause)
    }
}

/// A domain error raised during evaluation.
///
/// `frames` grows while the error unwinds, innermost first.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub frames: Vec<Frame>,
}

impl EngineError {
    pub fn new(kind: ErrorKind) -> Self {
        EngineError {
            kind,
            frames: Vec::new(),
        }
    }

    pub fn instantiation() -> Self {
        Self::new(ErrorKind::Instantiation)
    }

    pub fn type_error(expected: &'static str, culprit: Term) -> Self {
        Self::new(ErrorKind::Type { expected, culprit })
    }

    pub fn evaluation(what: &'static str) -> Self {
        Self::new(ErrorKind::Evaluation(what))
    }

    pub fn existence(key: PredicateKey) -> Self {
        Self::new(ErrorKind::Existence(key))
    }

    pub fn permission(action: &'static str, key: PredicateKey) -> Self {
        Self::new(ErrorKind::Permission { action, key })
    }

    pub fn tabling(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tabling(message.into()))
    }

    pub fn with_frame(mut self, key: PredicateKey, clause: usize) -> Self {
        self.frames.push(Frame { key, clause });
        self
    }
}

impl From<ErrorKind> for EngineError {
    fn from(kind: ErrorKind) -> Self {
        EngineError::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
