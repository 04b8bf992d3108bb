//! Answer tables for tabled predicates
//!
//! A tabled call is keyed by its [`CallSignature`]: the predicate key and the
//! call arguments resolved and renumbered from zero, so `fib(91, X)` and
//! `fib(91, Y)` share one table. The first caller of a signature computes
//! every answer with the untabled predicate and publishes the complete list;
//! concurrent callers of the same signature wait for it. Later callers only
//! read the table.
//!
//! Answers are stored detached from any binding store and copied into fresh
//! variables of the calling query on every retrieval.

use crate::engine::{Fail, Machine, Outcome, Predicate};
use crate::error::{EngineError, Result};
use crate::logic::{Mark, PredicateKey, RenameMap, Term};
use crate::store::UserPredicate;
use dashmap::DashMap;
use indexmap::IndexSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

type Answers = Arc<[Box<[Term]>]>;

/// A tabled call in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    key: PredicateKey,
    args: Box<[Term]>,
}

impl CallSignature {
    pub fn key(&self) -> &PredicateKey {
        &self.key
    }

    pub fn args(&self) -> &[Term] {
        &self.args
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key.name)?;
        if let Some((first, rest)) = self.args.split_first() {
            write!(f, "({}", first)?;
            for arg in rest {
                write!(f, ",{}", arg)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

enum TableState {
    Empty,
    Computing(ThreadId),
    Complete(Answers),
}

struct TableEntry {
    state: Mutex<TableState>,
    ready: Condvar,
}

impl TableEntry {
    fn new() -> Self {
        TableEntry {
            state: Mutex::new(TableState::Empty),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, state: TableState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.ready.notify_all();
    }
}

/// Puts an entry back to `Empty` unless the computation completed, so that a
/// failed or panicking computation does not leave waiters blocked.
struct ResetOnDrop<'a> {
    entry: &'a TableEntry,
    armed: bool,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.entry.publish(TableState::Empty);
        }
    }
}

/// All answer tables of one knowledge base.
#[derive(Default)]
pub struct TablingManager {
    tables: DashMap<CallSignature, Arc<TableEntry>>,
}

impl fmt::Debug for TablingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TablingManager")
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl TablingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of call signatures with a table (complete or in progress).
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Complete answers for a signature, if computed.
    pub fn answers(&self, signature: &CallSignature) -> Option<Vec<Vec<Term>>> {
        let entry = self.tables.get(signature)?.value().clone();
        let state = entry.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            TableState::Complete(answers) => {
                Some(answers.iter().map(|answer| answer.to_vec()).collect())
            }
            _ => None,
        }
    }

    /// Drop every table. Computations in progress keep their own entry.
    pub fn clear(&self) {
        self.tables.clear();
    }

    /// Predicate answering a call from the table, computing it first if this
    /// is the first call of its signature.
    pub fn get_predicate(
        &self,
        predicate: &UserPredicate,
        args: &[Term],
        machine: &mut Machine,
    ) -> Result<Box<dyn Predicate>> {
        let signature = CallSignature {
            key: predicate.key().clone(),
            args: machine.bindings().detach_all(args).into_boxed_slice(),
        };
        let entry = self
            .tables
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(TableEntry::new()))
            .value()
            .clone();

        let answers = self.complete(&entry, &signature, predicate, machine)?;
        if answers.is_empty() {
            return Ok(Box::new(Fail));
        }
        Ok(Box::new(TabledAnswers {
            args: args.to_vec(),
            answers,
            next: 0,
            mark: None,
        }))
    }

    fn complete(
        &self,
        entry: &TableEntry,
        signature: &CallSignature,
        predicate: &UserPredicate,
        machine: &mut Machine,
    ) -> Result<Answers> {
        let me = thread::current().id();
        {
            let mut state = entry.state.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                match &*state {
                    TableState::Complete(answers) => return Ok(answers.clone()),
                    TableState::Computing(owner) if *owner == me => {
                        return Err(EngineError::tabling(format!(
                            "{} called again while its answers are being computed",
                            signature
                        )));
                    }
                    TableState::Computing(_) => {}
                    TableState::Empty => break,
                }
                state = entry
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *state = TableState::Computing(me);
        }

        let mut reset = ResetOnDrop { entry, armed: true };
        log::debug!("tabling {}: computing", signature);
        let answers: Answers = compute(predicate, signature, machine)?.into();
        log::debug!("tabling {}: {} answers", signature, answers.len());
        reset.armed = false;
        entry.publish(TableState::Complete(answers.clone()));
        Ok(answers)
    }
}

/// Run the untabled predicate on a fresh copy of the signature and collect
/// its distinct answers. Leaves the bindings as they were.
fn compute(
    predicate: &UserPredicate,
    signature: &CallSignature,
    machine: &mut Machine,
) -> Result<Vec<Box<[Term]>>> {
    let mark = machine.mark();
    let result = (|| -> Result<Vec<Box<[Term]>>> {
        let mut renames = RenameMap::new();
        let args: Vec<Term> = signature
            .args
            .iter()
            .map(|arg| machine.bindings_mut().instantiate(arg, &mut renames))
            .collect();
        let mut inner = predicate.untabled_predicate(&args, machine)?;
        let mut answers = IndexSet::new();
        while let Outcome::Solved = inner.evaluate(machine)? {
            answers.insert(machine.bindings().detach_all(&args).into_boxed_slice());
            if !inner.could_reevaluation_succeed() {
                break;
            }
        }
        Ok(answers.into_iter().collect())
    })();
    machine.undo_to(mark);
    result
}

/// Replays a complete answer table against a call.
struct TabledAnswers {
    args: Vec<Term>,
    answers: Answers,
    next: usize,
    mark: Option<Mark>,
}

impl Predicate for TabledAnswers {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        let mark = *self.mark.get_or_insert_with(|| machine.mark());
        while let Some(answer) = self.answers.get(self.next) {
            self.next += 1;
            machine.undo_to(mark);
            let mut renames = RenameMap::new();
            let mut unified = true;
            for (arg, value) in self.args.iter().zip(answer.iter()) {
                let value = machine.bindings_mut().instantiate(value, &mut renames);
                if !machine.unify(arg, &value) {
                    unified = false;
                    break;
                }
            }
            if unified {
                return Ok(Outcome::Solved);
            }
        }
        machine.undo_to(mark);
        Ok(Outcome::Failed)
    }

    fn could_reevaluation_succeed(&self) -> bool {
        self.next < self.answers.len()
    }
}
