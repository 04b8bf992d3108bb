//! Per-query binding store with a trail
//!
//! Every query owns one `Bindings`. Variables are cells in this store; a cell
//! is either unbound or bound to a term, and may carry an attribute map used
//! by constraint extensions such as `dif/2`.
//!
//! All mutations (bindings and attribute changes) are recorded on the trail.
//! [`Bindings::mark`] captures the current trail height and cell count;
//! [`Bindings::undo_to`] pops the trail back to the mark and releases the
//! cells allocated after it. Undo costs O(bindings made), independent of the
//! size of the terms involved.

use super::term::{Atom, Term, VarId};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Attribute map of a variable (name to value).
pub type Attributes = IndexMap<Atom, Term>;

#[derive(Debug, Clone, Default)]
struct Cell {
    value: Option<Term>,
    attributes: Option<Box<Attributes>>,
}

#[derive(Debug, Clone)]
enum TrailEntry {
    Bound(VarId),
    Attributes {
        var: VarId,
        previous: Option<Box<Attributes>>,
    },
}

/// A point in the binding history to undo back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    trail: usize,
    cells: usize,
}

/// Rename map used while copying a clause template into fresh variables.
///
/// Template variables are dense, so the map is a vector indexed by template
/// variable id. Repeated occurrences of a template variable map to the same
/// fresh variable.
#[derive(Debug, Clone, Default)]
pub struct RenameMap {
    vars: Vec<Option<Term>>,
}

impl RenameMap {
    pub fn new() -> Self {
        RenameMap { vars: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        RenameMap {
            vars: Vec::with_capacity(n),
        }
    }

    /// Fresh variable assigned to template variable `id`, if any.
    pub fn get(&self, id: VarId) -> Option<&Term> {
        self.vars.get(id.index()).and_then(Option::as_ref)
    }

    fn insert(&mut self, id: VarId, term: Term) {
        if self.vars.len() <= id.index() {
            self.vars.resize(id.index() + 1, None);
        }
        self.vars[id.index()] = Some(term);
    }
}

/// Binding store for one query.
#[derive(Debug, Default)]
pub struct Bindings {
    cells: Vec<Cell>,
    trail: Vec<TrailEntry>,
}

impl Bindings {
    pub fn new() -> Self {
        Bindings {
            cells: Vec::new(),
            trail: Vec::new(),
        }
    }

    /// Number of live variable cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Allocate a new unbound variable.
    pub fn fresh_var(&mut self) -> Term {
        let id = VarId(self.cells.len() as u32);
        self.cells.push(Cell::default());
        Term::Variable(id)
    }

    pub fn mark(&self) -> Mark {
        Mark {
            trail: self.trail.len(),
            cells: self.cells.len(),
        }
    }

    /// Number of trail entries recorded since `mark`.
    pub fn changes_since(&self, mark: Mark) -> usize {
        self.trail.len().saturating_sub(mark.trail)
    }

    /// Restore the state captured by `mark`.
    ///
    /// Idempotent: undoing to the same mark twice is a no-op the second time.
    pub fn undo_to(&mut self, mark: Mark) {
        while self.trail.len() > mark.trail {
            match self.trail.pop() {
                Some(TrailEntry::Bound(var)) => {
                    if let Some(cell) = self.cells.get_mut(var.index()) {
                        cell.value = None;
                    }
                }
                Some(TrailEntry::Attributes { var, previous }) => {
                    if let Some(cell) = self.cells.get_mut(var.index()) {
                        cell.attributes = previous;
                    }
                }
                None => break,
            }
        }
        self.cells.truncate(mark.cells);
    }

    pub fn is_bound(&self, var: VarId) -> bool {
        self.cells
            .get(var.index())
            .map_or(false, |cell| cell.value.is_some())
    }

    /// Follow variable bindings until an unbound variable or a non-variable.
    #[inline]
    pub fn deref<'a>(&'a self, mut term: &'a Term) -> &'a Term {
        while let Term::Variable(var) = term {
            match self.cells.get(var.index()).and_then(|cell| cell.value.as_ref()) {
                Some(value) => term = value,
                None => break,
            }
        }
        term
    }

    /// Bind an unbound variable. Binding a variable to itself is a no-op.
    pub(crate) fn bind(&mut self, var: VarId, value: Term) {
        if let Term::Variable(other) = &value {
            if *other == var {
                return;
            }
        }
        let cell = self.cell_mut(var);
        debug_assert!(cell.value.is_none(), "rebinding a bound variable");
        cell.value = Some(value);
        self.trail.push(TrailEntry::Bound(var));
    }

    fn cell_mut(&mut self, var: VarId) -> &mut Cell {
        match self.cells.get_mut(var.index()) {
            Some(cell) => cell,
            None => panic!("variable _G{} does not belong to this binding store", var.0),
        }
    }

    // === Attributes ===

    pub fn attributes(&self, var: VarId) -> Option<&Attributes> {
        self.cells
            .get(var.index())
            .and_then(|cell| cell.attributes.as_deref())
    }

    pub fn attribute(&self, var: VarId, name: &Atom) -> Option<&Term> {
        self.attributes(var).and_then(|attrs| attrs.get(name))
    }

    /// Set one attribute of an unbound variable.
    ///
    /// # Panics
    /// If the variable is already bound.
    pub fn put_attribute(&mut self, var: VarId, name: Atom, value: Term) {
        let cell = self.cell_mut(var);
        assert!(
            cell.value.is_none(),
            "attribute {} set on bound variable _G{}",
            name,
            var.0
        );
        let previous = cell.attributes.clone();
        cell.attributes
            .get_or_insert_with(Default::default)
            .insert(name, value);
        self.trail.push(TrailEntry::Attributes { var, previous });
    }

    /// Replace the whole attribute map of an unbound variable.
    pub(crate) fn set_attributes(&mut self, var: VarId, attributes: Attributes) {
        let cell = self.cell_mut(var);
        assert!(cell.value.is_none(), "attributes set on bound variable _G{}", var.0);
        let previous = cell.attributes.replace(Box::new(attributes));
        self.trail.push(TrailEntry::Attributes { var, previous });
    }

    // === Copying ===

    /// Dereference `term` recursively, rebuilding only the compound terms
    /// whose content changed.
    pub fn resolve(&self, term: &Term) -> Term {
        self.resolve_changed(term).unwrap_or_else(|| term.clone())
    }

    fn resolve_changed(&self, term: &Term) -> Option<Term> {
        if term.is_immutable() {
            return None;
        }
        match term {
            Term::Variable(_) => {
                let target = self.deref(term);
                if std::ptr::eq(target, term) {
                    None
                } else {
                    Some(self.resolve(target))
                }
            }
            Term::Pair(_) => self.resolve_list(term),
            Term::Structure(c) => {
                let mut changed: Option<Vec<Term>> = None;
                for (i, arg) in c.args().iter().enumerate() {
                    match self.resolve_changed(arg) {
                        Some(new) => changed
                            .get_or_insert_with(|| c.args()[..i].to_vec())
                            .push(new),
                        None => {
                            if let Some(args) = changed.as_mut() {
                                args.push(arg.clone());
                            }
                        }
                    }
                }
                changed.map(|args| term.with_args(args))
            }
            _ => None,
        }
    }

    // Lists are walked iteratively so long lists do not grow the stack.
    fn resolve_list(&self, term: &Term) -> Option<Term> {
        let mut heads = Vec::new();
        let mut changed = false;
        let mut cursor = term;
        let tail = loop {
            match cursor {
                Term::Pair(cell) if !cursor.is_immutable() => {
                    match self.resolve_changed(cell.head()) {
                        Some(head) => {
                            changed = true;
                            heads.push(head);
                        }
                        None => heads.push(cell.head().clone()),
                    }
                    let next = self.deref(cell.tail());
                    if !std::ptr::eq(next, cell.tail()) {
                        changed = true;
                    }
                    cursor = next;
                }
                other => match self.resolve_changed(other) {
                    Some(tail) => {
                        changed = true;
                        break tail;
                    }
                    None => break other.clone(),
                },
            }
        };
        if changed {
            Some(Term::list_with_tail(heads, tail))
        } else {
            None
        }
    }

    /// Copy a clause template into fresh variables.
    ///
    /// Template variables already present in `renames` reuse their fresh
    /// variable, so a head and body instantiated with the same map share
    /// variables.
    pub fn instantiate(&mut self, template: &Term, renames: &mut RenameMap) -> Term {
        map_variables(template, &mut |var| match renames.get(var) {
            Some(term) => term.clone(),
            None => {
                let fresh = self.fresh_var();
                renames.insert(var, fresh.clone());
                fresh
            }
        })
    }

    /// Resolve `term` and renumber its unbound variables from zero.
    ///
    /// The result is a standalone template that can outlive this store.
    /// Attributes are not carried over.
    pub fn detach(&self, term: &Term) -> Term {
        let mut numbering = HashMap::new();
        self.detach_with(term, &mut numbering)
    }

    /// Detach several terms with one shared numbering.
    pub fn detach_all(&self, terms: &[Term]) -> Vec<Term> {
        let mut numbering = HashMap::new();
        terms
            .iter()
            .map(|term| self.detach_with(term, &mut numbering))
            .collect()
    }

    fn detach_with(&self, term: &Term, numbering: &mut HashMap<VarId, u32>) -> Term {
        let resolved = self.resolve(term);
        map_variables(&resolved, &mut |var| {
            let next = numbering.len() as u32;
            Term::var(*numbering.entry(var).or_insert(next))
        })
    }

    /// Unbound variables of `term` in order of first appearance.
    pub fn variables(&self, term: &Term) -> Vec<VarId> {
        let mut seen = Vec::new();
        let mut pending = vec![term.clone()];
        while let Some(next) = pending.pop() {
            let next = self.deref(&next).clone();
            match &next {
                Term::Variable(var) => {
                    if !seen.contains(var) {
                        seen.push(*var);
                    }
                }
                _ if next.is_immutable() => {}
                _ => pending.extend(next.args().iter().rev().cloned()),
            }
        }
        seen
    }

    /// Structural identity without binding anything; unbound variables are
    /// equal only to themselves.
    pub fn strict_equal(&self, a: &Term, b: &Term) -> bool {
        let mut pending = vec![(a.clone(), b.clone())];
        while let Some((left, right)) = pending.pop() {
            let left = self.deref(&left);
            let right = self.deref(&right);
            if left.same_allocation(right) {
                continue;
            }
            let equal = match (left, right) {
                (Term::Variable(x), Term::Variable(y)) => x == y,
                _ if left.is_immutable() && right.is_immutable() => left == right,
                (Term::Pair(_), Term::Pair(_)) | (Term::Structure(_), Term::Structure(_)) => {
                    if left.functor() != right.functor() || left.arity() != right.arity() {
                        false
                    } else {
                        pending.extend(
                            left.args()
                                .iter()
                                .cloned()
                                .zip(right.args().iter().cloned()),
                        );
                        true
                    }
                }
                _ => false,
            };
            if !equal {
                return false;
            }
        }
        true
    }
}

/// Rebuild `term`, replacing every variable through `on_var`.
///
/// Immutable subterms are shared, not copied. List spines are walked
/// iteratively.
pub(crate) fn map_variables(term: &Term, on_var: &mut dyn FnMut(VarId) -> Term) -> Term {
    if term.is_immutable() {
        return term.clone();
    }
    match term {
        Term::Variable(var) => on_var(*var),
        Term::Pair(_) => {
            let mut heads = Vec::new();
            let mut cursor = term;
            while let Term::Pair(cell) = cursor {
                if cursor.is_immutable() {
                    break;
                }
                heads.push(map_variables(cell.head(), on_var));
                cursor = cell.tail();
            }
            let tail = map_variables(cursor, on_var);
            Term::list_with_tail(heads, tail)
        }
        Term::Structure(c) => {
            let args = c.args().iter().map(|arg| map_variables(arg, on_var)).collect();
            Term::compound(c.functor().clone(), args)
        }
        _ => term.clone(),
    }
}
