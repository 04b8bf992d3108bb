//! Clause templates and per-predicate clause lists
//!
//! A [`ClauseModel`] is a clause in template form: head and body share one
//! dense variable numbering `0..var_count`. Templates are never bound; each
//! activation copies them into fresh variables of the running query.

use super::index::Indexes;
use crate::config::EngineConfig;
use crate::engine::{Machine, Predicate};
use crate::error::{EngineError, Result};
use crate::logic::bindings::map_variables;
use crate::logic::{Bindings, PredicateKey, RenameMap, Term, VarId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A clause `Head :- Body` in template form. Facts have the body `true`.
///
/// Two models compare equal iff they are variants of each other, since both
/// are numbered in order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseModel {
    head: Term,
    body: Term,
    var_count: usize,
}

impl ClauseModel {
    /// Build a rule. Variables may use any ids; they are renumbered.
    ///
    /// The head must be an atom or a structure. Variable goals in the body are
    /// wrapped in `call/1`.
    pub fn new(head: Term, body: Term) -> Result<Self> {
        match &head {
            Term::Atom(_) | Term::Structure(_) => {}
            Term::Variable(_) => return Err(EngineError::instantiation()),
            _ => return Err(EngineError::type_error("callable", head.clone())),
        }
        let body = normalize_body(&body)?;

        let mut numbering: HashMap<VarId, u32> = HashMap::new();
        let mut renumber = |var: VarId| {
            let next = numbering.len() as u32;
            Term::var(*numbering.entry(var).or_insert(next))
        };
        let head = map_variables(&head, &mut renumber);
        let body = map_variables(&body, &mut renumber);
        let var_count = numbering.len();
        Ok(ClauseModel {
            head,
            body,
            var_count,
        })
    }

    pub fn fact(head: Term) -> Result<Self> {
        Self::new(head, Term::atom("true"))
    }

    /// Build from a clause term: `Head :- Body` or a fact.
    pub fn from_term(clause: &Term) -> Result<Self> {
        match clause {
            Term::Structure(c) if c.functor().name() == ":-" && c.args().len() == 2 => {
                Self::new(c.args()[0].clone(), c.args()[1].clone())
            }
            _ => Self::fact(clause.clone()),
        }
    }

    pub fn head(&self) -> &Term {
        &self.head
    }

    pub fn body(&self) -> &Term {
        &self.body
    }

    pub fn var_count(&self) -> usize {
        self.var_count
    }

    pub fn key(&self) -> PredicateKey {
        // the head is an atom or a structure
        self.head
            .predicate_key()
            .unwrap_or_else(|| PredicateKey::new("", 0))
    }

    pub fn is_fact(&self) -> bool {
        matches!(&self.body, Term::Atom(a) if a.name() == "true")
    }

    /// The clause as a term, `Head :- Body` or just `Head` for facts.
    pub fn to_term(&self) -> Term {
        if self.is_fact() {
            self.head.clone()
        } else {
            Term::structure(":-", vec![self.head.clone(), self.body.clone()])
        }
    }
}

impl fmt::Display for ClauseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fact() {
            write!(f, "{}.", self.head)
        } else {
            write!(f, "{} :- {}.", self.head, self.body)
        }
    }
}

/// Wrap variable goals in `call/1`, looking through the control constructs
/// that are transparent to cut.
fn normalize_body(body: &Term) -> Result<Term> {
    match body {
        Term::Variable(_) => Ok(Term::structure("call", vec![body.clone()])),
        Term::Atom(_) => Ok(body.clone()),
        Term::Structure(c) => {
            let transparent = c.args().len() == 2 && matches!(c.functor().name(), "," | ";" | "->");
            if !transparent || body.is_immutable() {
                return Ok(body.clone());
            }
            let args = c
                .args()
                .iter()
                .map(normalize_body)
                .collect::<Result<Vec<_>>>()?;
            Ok(Term::compound(c.functor().clone(), args))
        }
        _ => Err(EngineError::type_error("callable", body.clone())),
    }
}

// =============================================================================
// Clause entries
// =============================================================================

/// Result of trying one clause against a call.
pub enum ClauseOutcome {
    /// The head did or did not unify and there is no body to run.
    Definite(bool),
    /// The head unified; the body remains to be evaluated.
    Body(Box<dyn Predicate>),
}

/// A clause at a fixed position in its predicate.
#[derive(Debug)]
pub struct ClauseEntry {
    model: Arc<ClauseModel>,
    position: usize,
    ground_fact: bool,
}

impl ClauseEntry {
    pub fn new(model: Arc<ClauseModel>, position: usize) -> Self {
        let ground_fact = model.is_fact() && model.head().is_immutable();
        ClauseEntry {
            model,
            position,
            ground_fact,
        }
    }

    pub fn model(&self) -> &Arc<ClauseModel> {
        &self.model
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn head_arg(&self, column: usize) -> &Term {
        self.model.head().arg(column)
    }

    /// Unify the call arguments with this clause's head.
    ///
    /// Bindings made by a failed attempt are left for the caller to undo.
    /// Ground facts are unified directly without copying.
    pub fn attempt(&self, args: &[Term], machine: &mut Machine) -> Result<ClauseOutcome> {
        let head_args = self.model.head().args();
        if self.ground_fact {
            let unified = args
                .iter()
                .zip(head_args)
                .all(|(arg, value)| machine.unify(arg, value));
            return Ok(ClauseOutcome::Definite(unified));
        }

        let mut renames = RenameMap::with_capacity(self.model.var_count());
        for (arg, template) in args.iter().zip(head_args) {
            let value = machine.bindings_mut().instantiate(template, &mut renames);
            if !machine.unify(arg, &value) {
                return Ok(ClauseOutcome::Definite(false));
            }
        }
        if self.model.is_fact() {
            return Ok(ClauseOutcome::Definite(true));
        }
        let body = machine
            .bindings_mut()
            .instantiate(self.model.body(), &mut renames);
        Ok(ClauseOutcome::Body(machine.get_predicate(&body)?))
    }
}

// =============================================================================
// Clause lists
// =============================================================================

/// The clauses of one predicate, in order, with their indexes.
#[derive(Debug)]
pub struct Clauses {
    entries: Arc<[Arc<ClauseEntry>]>,
    indexes: Indexes,
}

impl Clauses {
    pub fn new(models: &[Arc<ClauseModel>], arity: usize, config: &EngineConfig) -> Self {
        let entries: Arc<[Arc<ClauseEntry>]> = models
            .iter()
            .enumerate()
            .map(|(position, model)| Arc::new(ClauseEntry::new(model.clone(), position)))
            .collect();
        let indexes = Indexes::new(entries.clone(), arity, config);
        Clauses { entries, indexes }
    }

    pub fn entries(&self) -> &Arc<[Arc<ClauseEntry>]> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Columns whose value is immutable in every clause.
    pub fn eligible_columns(&self) -> &[usize] {
        self.indexes.columns()
    }

    /// Clauses that can match a call with these arguments.
    pub fn candidates(&self, args: &[Term], bindings: &Bindings) -> Arc<[Arc<ClauseEntry>]> {
        self.indexes.index(args, bindings)
    }
}
