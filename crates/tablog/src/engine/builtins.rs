//! Builtin predicates and their registration table
//!
//! Builtins are found by name and arity in a [`Builtins`] table before user
//! predicates are consulted. There are two kinds of entry:
//!
//! - constructors, which build a [`Predicate`] for a call (control
//!   constructs, `call/N`);
//! - deterministic builtins, functions that run once per call and report
//!   success (unification, type tests, arithmetic, `findall/3`, database
//!   updates, `dif/2`).

use super::control::{Call, Conjunction, Cut, Disjunction, Fail, IfThenElse, Not, Succeed};
use super::{for_each_solution, Machine, Outcome, Predicate, PredicateFactory};
use crate::arithmetic::compare;
use crate::error::{EngineError, Result};
use crate::logic::{unify, Atom, AttributeHook, AttributeHooks, Bindings, Mark, PredicateKey, RenameMap, Term};
use crate::store::ClauseModel;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds the predicate for one call of a builtin.
pub type Constructor = fn(&[Term], &mut Machine) -> Result<Box<dyn Predicate>>;

struct ConstructorFactory(Constructor);

impl PredicateFactory for ConstructorFactory {
    fn get_predicate(&self, args: &[Term], machine: &mut Machine) -> Result<Box<dyn Predicate>> {
        (self.0)(args, machine)
    }
}

type BuiltinFn = dyn Fn(&[Term], &mut Machine) -> Result<bool> + Send + Sync;

/// Factory for builtins with at most one solution.
///
/// The function runs on the first `evaluate`; bindings it made are undone if
/// it reports failure or when the call is backtracked into.
#[derive(Clone)]
pub struct Deterministic {
    eval: Arc<BuiltinFn>,
}

impl Deterministic {
    pub fn new<F>(eval: F) -> Self
    where
        F: Fn(&[Term], &mut Machine) -> Result<bool> + Send + Sync + 'static,
    {
        Deterministic {
            eval: Arc::new(eval),
        }
    }
}

impl PredicateFactory for Deterministic {
    fn get_predicate(&self, args: &[Term], _machine: &mut Machine) -> Result<Box<dyn Predicate>> {
        Ok(Box::new(SingleSolution {
            args: args.to_vec(),
            eval: self.eval.clone(),
            mark: None,
        }))
    }
}

struct SingleSolution {
    args: Vec<Term>,
    eval: Arc<BuiltinFn>,
    mark: Option<Mark>,
}

impl Predicate for SingleSolution {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        if let Some(mark) = self.mark {
            machine.undo_to(mark);
            return Ok(Outcome::Failed);
        }
        let mark = machine.mark();
        self.mark = Some(mark);
        if (self.eval)(&self.args, machine)? {
            Ok(Outcome::Solved)
        } else {
            machine.undo_to(mark);
            Ok(Outcome::Failed)
        }
    }

    fn could_reevaluation_succeed(&self) -> bool {
        false
    }
}

// =============================================================================
// Registration table
// =============================================================================

/// Builtin predicates by name and arity.
#[derive(Clone, Default)]
pub struct Builtins {
    table: HashMap<PredicateKey, Arc<dyn PredicateFactory>>,
}

impl fmt::Debug for Builtins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

impl Builtins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control constructs and the core builtins.
    pub fn standard() -> Self {
        let mut builtins = Self::new();

        builtins.register_constructor("true", 0, |_, _| Ok(Box::new(Succeed::default())));
        builtins.register_constructor("fail", 0, |_, _| Ok(Box::new(Fail)));
        builtins.register_constructor("false", 0, |_, _| Ok(Box::new(Fail)));
        builtins.register_constructor("!", 0, |_, _| Ok(Box::new(Cut::default())));
        builtins.register_constructor(",", 2, |args, _| {
            Ok(Box::new(Conjunction::new(args[0].clone(), args[1].clone())))
        });
        builtins.register_constructor(";", 2, disjunction);
        builtins.register_constructor("->", 2, |args, _| {
            Ok(Box::new(IfThenElse::new(args[0].clone(), args[1].clone(), None)))
        });
        builtins.register_constructor("\\+", 1, |args, _| Ok(Box::new(Not::new(args[0].clone()))));
        for arity in 1..=8 {
            builtins.register_constructor("call", arity, call_n);
        }

        builtins.register_deterministic("=", 2, |args, m| Ok(m.unify(&args[0], &args[1])));
        builtins.register_deterministic("\\=", 2, |args, m| {
            let mark = m.mark();
            let unifiable = m.unify(&args[0], &args[1]);
            m.undo_to(mark);
            Ok(!unifiable)
        });
        builtins.register_deterministic("==", 2, |args, m| {
            Ok(m.bindings().strict_equal(&args[0], &args[1]))
        });
        builtins.register_deterministic("\\==", 2, |args, m| {
            Ok(!m.bindings().strict_equal(&args[0], &args[1]))
        });

        builtins.register_deterministic("var", 1, |args, m| type_test(args, m, |t| t.is_variable()));
        builtins.register_deterministic("nonvar", 1, |args, m| {
            type_test(args, m, |t| !t.is_variable())
        });
        builtins.register_deterministic("atom", 1, |args, m| {
            type_test(args, m, |t| matches!(t, Term::Atom(_) | Term::EmptyList))
        });
        builtins.register_deterministic("integer", 1, |args, m| {
            type_test(args, m, |t| matches!(t, Term::Integer(_)))
        });
        builtins.register_deterministic("float", 1, |args, m| {
            type_test(args, m, |t| matches!(t, Term::Decimal(_)))
        });
        builtins.register_deterministic("number", 1, |args, m| {
            type_test(args, m, |t| matches!(t, Term::Integer(_) | Term::Decimal(_)))
        });
        builtins.register_deterministic("atomic", 1, |args, m| {
            type_test(args, m, |t| {
                matches!(t, Term::Atom(_) | Term::Integer(_) | Term::Decimal(_) | Term::EmptyList)
            })
        });
        builtins.register_deterministic("compound", 1, |args, m| {
            type_test(args, m, |t| matches!(t, Term::Pair(_) | Term::Structure(_)))
        });

        builtins.register_deterministic("is", 2, |args, m| {
            let value = m.kb().arithmetic().evaluate(&args[1], m.bindings())?;
            Ok(m.unify(&args[0], &value.to_term()))
        });
        builtins.register_deterministic("=:=", 2, |args, m| {
            arithmetic_compare(args, m, |o| o == Ordering::Equal)
        });
        builtins.register_deterministic("=\\=", 2, |args, m| {
            arithmetic_compare(args, m, |o| o != Ordering::Equal)
        });
        builtins.register_deterministic("<", 2, |args, m| {
            arithmetic_compare(args, m, |o| o == Ordering::Less)
        });
        builtins.register_deterministic(">", 2, |args, m| {
            arithmetic_compare(args, m, |o| o == Ordering::Greater)
        });
        builtins.register_deterministic("=<", 2, |args, m| {
            arithmetic_compare(args, m, |o| o != Ordering::Greater)
        });
        builtins.register_deterministic(">=", 2, |args, m| {
            arithmetic_compare(args, m, |o| o != Ordering::Less)
        });

        builtins.register_deterministic("findall", 3, findall);
        builtins.register_deterministic("asserta", 1, |args, m| assert_clause(args, m, true));
        builtins.register_deterministic("assertz", 1, |args, m| assert_clause(args, m, false));
        builtins.register_deterministic("assert", 1, |args, m| assert_clause(args, m, false));
        builtins.register_deterministic("retract", 1, retract);
        builtins.register_deterministic("dif", 2, dif);

        builtins
    }

    pub fn register(&mut self, name: &str, arity: usize, factory: Arc<dyn PredicateFactory>) {
        self.table.insert(PredicateKey::new(name, arity), factory);
    }

    pub fn register_constructor(&mut self, name: &str, arity: usize, constructor: Constructor) {
        self.register(name, arity, Arc::new(ConstructorFactory(constructor)));
    }

    pub fn register_deterministic<F>(&mut self, name: &str, arity: usize, eval: F)
    where
        F: Fn(&[Term], &mut Machine) -> Result<bool> + Send + Sync + 'static,
    {
        self.register(name, arity, Arc::new(Deterministic::new(eval)));
    }

    pub fn get(&self, key: &PredicateKey) -> Option<&Arc<dyn PredicateFactory>> {
        self.table.get(key)
    }

    pub fn contains(&self, key: &PredicateKey) -> bool {
        self.table.contains_key(key)
    }
}

// =============================================================================
// Control constructors
// =============================================================================

fn disjunction(args: &[Term], machine: &mut Machine) -> Result<Box<dyn Predicate>> {
    if let Term::Structure(c) = machine.deref(&args[0]) {
        if c.functor().name() == "->" && c.args().len() == 2 {
            return Ok(Box::new(IfThenElse::new(
                c.args()[0].clone(),
                c.args()[1].clone(),
                Some(args[1].clone()),
            )));
        }
    }
    Ok(Box::new(Disjunction::new(args[0].clone(), args[1].clone())))
}

fn call_n(args: &[Term], machine: &mut Machine) -> Result<Box<dyn Predicate>> {
    let goal = Call::extend_goal(&args[0], &args[1..], machine)?;
    Ok(Box::new(Call::new(goal)))
}

// =============================================================================
// Deterministic builtins
// =============================================================================

fn type_test(args: &[Term], machine: &mut Machine, test: fn(&Term) -> bool) -> Result<bool> {
    Ok(test(machine.bindings().deref(&args[0])))
}

fn arithmetic_compare(
    args: &[Term],
    machine: &mut Machine,
    accept: fn(Ordering) -> bool,
) -> Result<bool> {
    let ops = machine.kb().arithmetic();
    let left = ops.evaluate(&args[0], machine.bindings())?;
    let right = ops.evaluate(&args[1], machine.bindings())?;
    Ok(accept(compare(left, right)))
}

fn findall(args: &[Term], machine: &mut Machine) -> Result<bool> {
    let template = &args[0];
    let mut found = Vec::new();
    for_each_solution(machine, &args[1], |m| found.push(m.bindings().detach(template)))?;
    let items = found
        .iter()
        .map(|answer| {
            machine
                .bindings_mut()
                .instantiate(answer, &mut RenameMap::new())
        })
        .collect();
    Ok(machine.unify(&args[2], &Term::list(items)))
}

/// Split a clause term into head and body.
fn clause_parts(clause: &Term) -> (Term, Term) {
    match clause {
        Term::Structure(c) if c.functor().name() == ":-" && c.args().len() == 2 => {
            (c.args()[0].clone(), c.args()[1].clone())
        }
        _ => (clause.clone(), Term::atom("true")),
    }
}

fn assert_clause(args: &[Term], machine: &mut Machine, front: bool) -> Result<bool> {
    let clause = machine.bindings().detach(&args[0]);
    let model = ClauseModel::from_term(&clause)?;
    machine.kb().assert_clause(model, front)?;
    Ok(true)
}

/// Remove the first clause that unifies with the argument. Does not leave a
/// choice point.
fn retract(args: &[Term], machine: &mut Machine) -> Result<bool> {
    let clause = machine.deref(&args[0]);
    let (head, body) = clause_parts(&clause);
    let head = machine.deref(&head);
    let key = match &head {
        Term::Variable(_) => return Err(EngineError::instantiation()),
        Term::Atom(_) | Term::Structure(_) => head.predicate_key(),
        _ => None,
    };
    let Some(key) = key else {
        return Err(EngineError::type_error("callable", head));
    };
    let Some(predicate) = machine.kb().user_predicate(&key) else {
        return Ok(false);
    };
    let Some(models) = predicate.dynamic_models() else {
        return Err(EngineError::permission("modify static procedure", key));
    };
    for model in models.iter() {
        let mark = machine.mark();
        let mut renames = RenameMap::with_capacity(model.var_count());
        let clause_head = machine.bindings_mut().instantiate(model.head(), &mut renames);
        let clause_body = machine.bindings_mut().instantiate(model.body(), &mut renames);
        if machine.unify(&head, &clause_head)
            && machine.unify(&body, &clause_body)
            && predicate.remove_model(model)
        {
            return Ok(true);
        }
        machine.undo_to(mark);
    }
    Ok(false)
}

// =============================================================================
// dif/2
// =============================================================================

/// Attribute name used by `dif/2`.
pub const DIF_ATTRIBUTE: &str = "dif";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DifStatus {
    /// The terms are identical under the current bindings.
    Entailed,
    /// The terms can never become identical.
    Disentailed,
    Pending,
}

fn dif_status(left: &Term, right: &Term, bindings: &mut Bindings) -> DifStatus {
    let mark = bindings.mark();
    let unifiable = unify(left, right, bindings, &AttributeHooks::new());
    let changes = bindings.changes_since(mark);
    bindings.undo_to(mark);
    match (unifiable, changes) {
        (false, _) => DifStatus::Disentailed,
        (true, 0) => DifStatus::Entailed,
        (true, _) => DifStatus::Pending,
    }
}

/// Attach the constraint `pair` (a `Left-Right` term) to every unbound
/// variable in it.
fn constrain(pair: &Term, bindings: &mut Bindings) {
    let name = Atom::new(DIF_ATTRIBUTE);
    for var in bindings.variables(pair) {
        let list = match bindings.attribute(var, &name) {
            Some(list) if list.list_items().0.iter().any(|c| c.same_allocation(pair)) => continue,
            Some(list) => Term::pair(pair.clone(), list.clone()),
            None => Term::list(vec![pair.clone()]),
        };
        bindings.put_attribute(var, name.clone(), list);
    }
}

fn dif(args: &[Term], machine: &mut Machine) -> Result<bool> {
    match dif_status(&args[0], &args[1], machine.bindings_mut()) {
        DifStatus::Entailed => Ok(false),
        DifStatus::Disentailed => Ok(true),
        DifStatus::Pending => {
            let pair = Term::structure("-", vec![args[0].clone(), args[1].clone()]);
            constrain(&pair, machine.bindings_mut());
            Ok(true)
        }
    }
}

/// Attribute hook behind `dif/2`. The attribute value is a list of
/// `Left-Right` pairs that must stay different.
#[derive(Debug, Default)]
pub struct DifHook;

impl AttributeHook for DifHook {
    fn join(&self, left: &Term, right: &Term) -> Term {
        let (items, _) = left.list_items();
        Term::list_with_tail(items.into_iter().cloned().collect(), right.clone())
    }

    fn verify(&self, _value: &Term, attribute: &Term, bindings: &mut Bindings) -> bool {
        for pair in attribute.list_items().0 {
            match dif_status(pair.arg(0), pair.arg(1), bindings) {
                DifStatus::Entailed => return false,
                DifStatus::Disentailed => {}
                DifStatus::Pending => constrain(pair, bindings),
            }
        }
        true
    }
}
