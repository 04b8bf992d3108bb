//! Control constructs: conjunction, disjunction, if-then-else, negation,
//! `call/N` and cut.
//!
//! Cut is transparent through `,/2`, `;/2` and both branches of `->/2`. The
//! condition of `->/2`, `\+/1` and `call/N` are barriers: a cut inside them
//! only prunes alternatives of the barrier's own goal.

use super::{Machine, Outcome, Predicate};
use crate::error::{EngineError, Result};
use crate::logic::{Mark, Term};

// =============================================================================
// Leaves
// =============================================================================

/// `true/0`
#[derive(Debug, Default)]
pub struct Succeed {
    done: bool,
}

impl Predicate for Succeed {
    fn evaluate(&mut self, _machine: &mut Machine) -> Result<Outcome> {
        if self.done {
            return Ok(Outcome::Failed);
        }
        self.done = true;
        Ok(Outcome::Solved)
    }

    fn could_reevaluation_succeed(&self) -> bool {
        false
    }
}

/// `fail/0`, `false/0`, and calls that cannot match any clause.
#[derive(Debug, Default)]
pub struct Fail;

impl Predicate for Fail {
    fn evaluate(&mut self, _machine: &mut Machine) -> Result<Outcome> {
        Ok(Outcome::Failed)
    }

    fn could_reevaluation_succeed(&self) -> bool {
        false
    }
}

/// `!/0`: succeeds once; backtracking into it yields `Outcome::Cut`.
#[derive(Debug, Default)]
pub struct Cut {
    entered: bool,
}

impl Predicate for Cut {
    fn evaluate(&mut self, _machine: &mut Machine) -> Result<Outcome> {
        if self.entered {
            return Ok(Outcome::Cut);
        }
        self.entered = true;
        Ok(Outcome::Solved)
    }

    // Backtracking into a cut is what prunes, so it must be re-entered.
    fn could_reevaluation_succeed(&self) -> bool {
        true
    }
}

// =============================================================================
// Conjunction and disjunction
// =============================================================================

/// `','/2`
pub struct Conjunction {
    left_goal: Term,
    right_goal: Term,
    left: Option<Box<dyn Predicate>>,
    right: Option<Box<dyn Predicate>>,
    left_done: bool,
    mark: Option<Mark>,
}

impl Conjunction {
    pub fn new(left: Term, right: Term) -> Self {
        Conjunction {
            left_goal: left,
            right_goal: right,
            left: None,
            right: None,
            left_done: false,
            mark: None,
        }
    }

    fn fail(&mut self, machine: &mut Machine) -> Result<Outcome> {
        self.left_done = true;
        self.left = None;
        self.right = None;
        if let Some(mark) = self.mark {
            machine.undo_to(mark);
        }
        Ok(Outcome::Failed)
    }
}

impl Predicate for Conjunction {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        if self.mark.is_none() {
            self.mark = Some(machine.mark());
        }
        loop {
            if let Some(right) = self.right.as_mut() {
                match right.evaluate(machine)? {
                    Outcome::Failed => self.right = None,
                    other => return Ok(other),
                }
            }
            if self.left_done {
                return self.fail(machine);
            }
            let left = match &mut self.left {
                Some(left) => left,
                slot => slot.insert(machine.get_predicate(&self.left_goal)?),
            };
            match left.evaluate(machine)? {
                Outcome::Solved => {
                    if !left.could_reevaluation_succeed() {
                        self.left_done = true;
                        self.left = None;
                    }
                    self.right = Some(machine.get_predicate(&self.right_goal)?);
                }
                Outcome::Failed => return self.fail(machine),
                Outcome::Cut => return Ok(Outcome::Cut),
            }
        }
    }

    fn could_reevaluation_succeed(&self) -> bool {
        !self.left_done
            || self
                .right
                .as_ref()
                .map_or(false, |right| right.could_reevaluation_succeed())
    }
}

/// `;/2` when the left branch is not an if-then-else.
pub struct Disjunction {
    left_goal: Term,
    right_goal: Term,
    current: Option<Box<dyn Predicate>>,
    on_right: bool,
    exhausted: bool,
}

impl Disjunction {
    pub fn new(left: Term, right: Term) -> Self {
        Disjunction {
            left_goal: left,
            right_goal: right,
            current: None,
            on_right: false,
            exhausted: false,
        }
    }
}

impl Predicate for Disjunction {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        while !self.exhausted {
            let current = match &mut self.current {
                Some(current) => current,
                slot => {
                    let goal = if self.on_right {
                        &self.right_goal
                    } else {
                        &self.left_goal
                    };
                    slot.insert(machine.get_predicate(goal)?)
                }
            };
            match current.evaluate(machine)? {
                Outcome::Failed => {
                    self.current = None;
                    if self.on_right {
                        self.exhausted = true;
                    }
                    self.on_right = true;
                }
                other => return Ok(other),
            }
        }
        Ok(Outcome::Failed)
    }

    fn could_reevaluation_succeed(&self) -> bool {
        !self.exhausted
            && (!self.on_right
                || self
                    .current
                    .as_ref()
                    .map_or(true, |current| current.could_reevaluation_succeed()))
    }
}

// =============================================================================
// If-then-else and negation
// =============================================================================

/// `(Cond -> Then ; Else)`, or `(Cond -> Then)` when there is no else branch.
pub struct IfThenElse {
    condition: Term,
    then_goal: Term,
    else_goal: Option<Term>,
    branch: Option<Box<dyn Predicate>>,
    mark: Option<Mark>,
    exhausted: bool,
}

impl IfThenElse {
    pub fn new(condition: Term, then_goal: Term, else_goal: Option<Term>) -> Self {
        IfThenElse {
            condition,
            then_goal,
            else_goal,
            branch: None,
            mark: None,
            exhausted: false,
        }
    }

    fn fail(&mut self, machine: &mut Machine) -> Result<Outcome> {
        self.exhausted = true;
        self.branch = None;
        if let Some(mark) = self.mark {
            machine.undo_to(mark);
        }
        Ok(Outcome::Failed)
    }
}

impl Predicate for IfThenElse {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        if self.exhausted {
            return Ok(Outcome::Failed);
        }
        if self.mark.is_none() {
            let mark = machine.mark();
            self.mark = Some(mark);
            // The condition's first solution commits; its cut stays local.
            let mut condition = machine.get_predicate(&self.condition)?;
            let goal = match condition.evaluate(machine)? {
                Outcome::Solved => Some(self.then_goal.clone()),
                Outcome::Failed | Outcome::Cut => {
                    machine.undo_to(mark);
                    self.else_goal.clone()
                }
            };
            match goal {
                Some(goal) => self.branch = Some(machine.get_predicate(&goal)?),
                None => return self.fail(machine),
            }
        }
        let Some(branch) = self.branch.as_mut() else {
            return self.fail(machine);
        };
        match branch.evaluate(machine)? {
            Outcome::Failed => self.fail(machine),
            other => Ok(other),
        }
    }

    fn could_reevaluation_succeed(&self) -> bool {
        !self.exhausted
            && self
                .branch
                .as_ref()
                .map_or(true, |branch| branch.could_reevaluation_succeed())
    }
}

/// `\+/1`: succeeds, binding nothing, iff the goal has no solution.
pub struct Not {
    goal: Term,
    done: bool,
}

impl Not {
    pub fn new(goal: Term) -> Self {
        Not { goal, done: false }
    }
}

impl Predicate for Not {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        if self.done {
            return Ok(Outcome::Failed);
        }
        self.done = true;
        let mark = machine.mark();
        let outcome = machine.get_predicate(&self.goal)?.evaluate(machine);
        machine.undo_to(mark);
        match outcome? {
            Outcome::Solved => Ok(Outcome::Failed),
            Outcome::Failed | Outcome::Cut => Ok(Outcome::Solved),
        }
    }

    fn could_reevaluation_succeed(&self) -> bool {
        false
    }
}

// =============================================================================
// call/N
// =============================================================================

/// `call/N`: evaluates its goal behind a cut barrier.
pub struct Call {
    goal: Term,
    inner: Option<Box<dyn Predicate>>,
    mark: Option<Mark>,
    exhausted: bool,
}

impl Call {
    pub fn new(goal: Term) -> Self {
        Call {
            goal,
            inner: None,
            mark: None,
            exhausted: false,
        }
    }

    /// Build the goal of `call(Goal, Extra...)` by appending `extra` to the
    /// arguments of `goal`.
    pub fn extend_goal(goal: &Term, extra: &[Term], machine: &Machine) -> Result<Term> {
        let goal = machine.deref(goal);
        if extra.is_empty() {
            return Ok(goal);
        }
        match &goal {
            Term::Variable(_) => Err(EngineError::instantiation()),
            Term::Atom(name) => Ok(Term::compound(name.clone(), extra.to_vec())),
            Term::Structure(c) => {
                let mut args = c.args().to_vec();
                args.extend_from_slice(extra);
                Ok(Term::compound(c.functor().clone(), args))
            }
            _ => Err(EngineError::type_error("callable", goal.clone())),
        }
    }
}

impl Predicate for Call {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        if self.exhausted {
            return Ok(Outcome::Failed);
        }
        let inner = match &mut self.inner {
            Some(inner) => inner,
            slot => {
                self.mark = Some(machine.mark());
                slot.insert(machine.get_predicate(&self.goal)?)
            }
        };
        match inner.evaluate(machine)? {
            Outcome::Solved => Ok(Outcome::Solved),
            Outcome::Failed | Outcome::Cut => {
                self.exhausted = true;
                self.inner = None;
                if let Some(mark) = self.mark {
                    machine.undo_to(mark);
                }
                Ok(Outcome::Failed)
            }
        }
    }

    fn could_reevaluation_succeed(&self) -> bool {
        !self.exhausted
            && self
                .inner
                .as_ref()
                .map_or(true, |inner| inner.could_reevaluation_succeed())
    }
}
