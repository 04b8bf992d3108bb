//! Resolution engine
//!
//! Goals are evaluated through [`Predicate`] objects. A predicate produces its
//! solutions one `evaluate` call at a time and keeps whatever state it needs
//! to resume; backtracking is plain call and return.
//!
//! ## Evaluation contract
//!
//! - `Solved`: the bindings for this solution are in place.
//! - `Failed`: no (further) solutions. The predicate has undone every binding
//!   it made since its first `evaluate`.
//! - `Cut`: a cut was re-entered while backtracking. Bindings are left as they
//!   are; the clause loop that owns the cut undoes to its own mark.
//!
//! Before calling `evaluate` again, a caller undoes whatever was bound after
//! the predicate's last `Solved`. Factories never bind anything when they
//! construct a predicate; the first binding happens in the first `evaluate`.

pub mod builtins;
pub mod control;
pub mod interpreted;
pub mod trace;

use crate::error::{EngineError, Result};
use crate::kb::KnowledgeBase;
use crate::logic::{unify, Bindings, Mark, Term};
use std::sync::Arc;

pub use builtins::{Builtins, Constructor, Deterministic};
pub use control::{Call, Conjunction, Cut, Disjunction, Fail, IfThenElse, Not, Succeed};
pub use interpreted::InterpretedPredicate;
pub use trace::{LogTraceListener, TraceEvent, TraceListener, TracePort, TraceRecorder};

/// Result of one `evaluate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Solved,
    Failed,
    Cut,
}

/// A goal being evaluated.
pub trait Predicate: Send {
    /// Produce the first solution, or the next one on later calls.
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome>;

    /// Whether another `evaluate` could still produce a solution. `false` is
    /// a promise; `true` is only a possibility.
    fn could_reevaluation_succeed(&self) -> bool;
}

/// Creates predicates for calls to one predicate key.
pub trait PredicateFactory: Send + Sync {
    fn get_predicate(&self, args: &[Term], machine: &mut Machine) -> Result<Box<dyn Predicate>>;
}

/// Per-query evaluation state: the knowledge base being queried and the
/// query's own binding store.
pub struct Machine {
    kb: Arc<KnowledgeBase>,
    bindings: Bindings,
}

impl Machine {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Machine {
            kb,
            bindings: Bindings::new(),
        }
    }

    pub fn kb(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    /// Unify with the knowledge base's attribute hooks. On failure the
    /// caller undoes to its mark.
    pub fn unify(&mut self, a: &Term, b: &Term) -> bool {
        unify(a, b, &mut self.bindings, self.kb.attribute_hooks())
    }

    pub fn mark(&self) -> Mark {
        self.bindings.mark()
    }

    pub fn undo_to(&mut self, mark: Mark) {
        self.bindings.undo_to(mark);
    }

    pub fn deref(&self, term: &Term) -> Term {
        self.bindings.deref(term).clone()
    }

    pub fn resolve(&self, term: &Term) -> Term {
        self.bindings.resolve(term)
    }

    /// Look up the predicate for `goal` under the current bindings.
    pub fn get_predicate(&mut self, goal: &Term) -> Result<Box<dyn Predicate>> {
        let goal = self.deref(goal);
        let key = match &goal {
            Term::Variable(_) => return Err(EngineError::instantiation()),
            Term::Atom(_) | Term::Structure(_) => goal.predicate_key(),
            _ => None,
        };
        let Some(key) = key else {
            return Err(EngineError::type_error("callable", goal));
        };
        let factory = self.kb.get_predicate_factory(&key)?;
        factory.get_predicate(goal.args(), self)
    }
}

/// Evaluate `goal` to exhaustion behind a call barrier, collecting one value
/// per solution. Bindings are undone afterwards.
pub(crate) fn for_each_solution<F>(
    machine: &mut Machine,
    goal: &Term,
    mut on_solution: F,
) -> Result<()>
where
    F: FnMut(&Machine),
{
    let mark = machine.mark();
    let result = (|| -> Result<()> {
        let mut predicate = machine.get_predicate(goal)?;
        loop {
            match predicate.evaluate(machine)? {
                Outcome::Solved => {
                    on_solution(machine);
                    if !predicate.could_reevaluation_succeed() {
                        return Ok(());
                    }
                }
                Outcome::Failed | Outcome::Cut => return Ok(()),
            }
        }
    })();
    machine.undo_to(mark);
    result
}
