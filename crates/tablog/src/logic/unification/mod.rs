//! Unification over a binding store
//!
//! Unification binds variables in a [`Bindings`] store and records every
//! binding on its trail. It is iterative: list spines and argument vectors
//! are pushed on an explicit work stack, so arbitrarily long lists unify in
//! constant native stack.
//!
//! On failure, bindings made before the failing pair are left in place. The
//! caller owns the mark and undoes to it.
//!
//! There is no occurs check.

use crate::logic::bindings::{Attributes, Bindings};
use crate::logic::term::{Atom, Term, VarId};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;


// =============================================================================
// Attribute hooks
// =============================================================================

/// Behavior of one variable attribute during unification.
///
/// Hooks are registered by attribute name. Attributes with no registered
/// hook are carried along but never checked.
pub trait AttributeHook: Send + Sync {
    /// Combine the values of this attribute when two attributed variables are
    /// unified with each other.
    fn join(&self, left: &Term, right: &Term) -> Term;

    /// Called after the variable carrying `attribute` has been bound to
    /// `value` (which may itself be a variable). Returning `false` fails the
    /// unification.
    fn verify(&self, value: &Term, attribute: &Term, bindings: &mut Bindings) -> bool;
}

/// Registry of attribute hooks, keyed by attribute name.
///
/// An empty registry gives plain syntactic unification; attributes are then
/// ignored entirely.
#[derive(Clone, Default)]
pub struct AttributeHooks {
    hooks: HashMap<Atom, Arc<dyn AttributeHook>>,
}

impl AttributeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, hook: Arc<dyn AttributeHook>) {
        self.hooks.insert(Atom::new(name), hook);
    }

    pub fn get(&self, name: &Atom) -> Option<&Arc<dyn AttributeHook>> {
        self.hooks.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for AttributeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.hooks.keys()).finish()
    }
}

// =============================================================================
// Unification
// =============================================================================

/// Unify `a` with `b`.
///
/// When both sides are unbound variables, the left one is bound to the right
/// one. Callers pass the query side on the left and the clause side on the
/// right.
pub fn unify(a: &Term, b: &Term, bindings: &mut Bindings, hooks: &AttributeHooks) -> bool {
    let mut pending: SmallVec<[(Term, Term); 16]> = SmallVec::new();
    pending.push((a.clone(), b.clone()));

    while let Some((left, right)) = pending.pop() {
        let left = bindings.deref(&left).clone();
        let right = bindings.deref(&right).clone();
        if left.same_allocation(&right) {
            continue;
        }
        let ok = match (&left, &right) {
            (Term::Variable(x), Term::Variable(y)) => bind_variables(*x, *y, bindings, hooks),
            (Term::Variable(x), _) => bind_value(*x, right.clone(), bindings, hooks),
            (_, Term::Variable(y)) => bind_value(*y, left.clone(), bindings, hooks),
            _ if left.is_immutable() && right.is_immutable() => left == right,
            (Term::Pair(l), Term::Pair(r)) => {
                pending.push((l.tail().clone(), r.tail().clone()));
                pending.push((l.head().clone(), r.head().clone()));
                true
            }
            (Term::Structure(l), Term::Structure(r)) => {
                if l.functor() != r.functor() || l.args().len() != r.args().len() {
                    false
                } else {
                    pending.extend(
                        l.args()
                            .iter()
                            .rev()
                            .cloned()
                            .zip(r.args().iter().rev().cloned()),
                    );
                    true
                }
            }
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Unify two argument vectors left to right.
///
/// Stops at the first failing position; earlier bindings stay in place.
pub fn unify_args(a: &[Term], b: &[Term], bindings: &mut Bindings, hooks: &AttributeHooks) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(left, right)| unify(left, right, bindings, hooks))
}

fn bind_value(var: VarId, value: Term, bindings: &mut Bindings, hooks: &AttributeHooks) -> bool {
    let attributes = if hooks.is_empty() {
        None
    } else {
        bindings.attributes(var).cloned()
    };
    bindings.bind(var, value.clone());
    match attributes {
        Some(attributes) => run_hooks(&value, &attributes, bindings, hooks),
        None => true,
    }
}

fn bind_variables(x: VarId, y: VarId, bindings: &mut Bindings, hooks: &AttributeHooks) -> bool {
    if x == y {
        return true;
    }
    if hooks.is_empty() {
        bindings.bind(x, Term::Variable(y));
        return true;
    }
    let merged = match (bindings.attributes(x), bindings.attributes(y)) {
        (None, None) => None,
        (Some(left), None) => Some(left.clone()),
        (None, Some(right)) => Some(right.clone()),
        (Some(left), Some(right)) => Some(join_attributes(left, right, hooks)),
    };
    let Some(merged) = merged else {
        bindings.bind(x, Term::Variable(y));
        return true;
    };

    let fresh = bindings.fresh_var();
    if let Term::Variable(id) = fresh {
        bindings.set_attributes(id, merged.clone());
    }
    bindings.bind(x, fresh.clone());
    bindings.bind(y, fresh.clone());
    run_hooks(&fresh, &merged, bindings, hooks)
}

fn join_attributes(left: &Attributes, right: &Attributes, hooks: &AttributeHooks) -> Attributes {
    let mut merged = left.clone();
    for (name, value) in right {
        let joined = match (merged.get(name), hooks.get(name)) {
            (Some(existing), Some(hook)) => hook.join(existing, value),
            (Some(existing), None) => existing.clone(),
            (None, _) => value.clone(),
        };
        merged.insert(name.clone(), joined);
    }
    merged
}

fn run_hooks(
    value: &Term,
    attributes: &Attributes,
    bindings: &mut Bindings,
    hooks: &AttributeHooks,
) -> bool {
    attributes.iter().all(|(name, attribute)| match hooks.get(name) {
        Some(hook) => hook.verify(value, attribute, bindings),
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_id(term: &Term) -> VarId {
        match term {
            Term::Variable(id) => *id,
            other => panic!("not a variable: {}", other),
        }
    }

    #[test]
    fn test_numbers_of_different_type_do_not_unify() {
        let mut b = Bindings::new();
        let hooks = AttributeHooks::new();
        assert!(!unify(&Term::integer(1), &Term::decimal(1.0), &mut b, &hooks));
        assert!(unify(&Term::decimal(1.5), &Term::decimal(1.5), &mut b, &hooks));
    }

    #[test]
    fn test_variable_binds_left_to_right() {
        let mut b = Bindings::new();
        let hooks = AttributeHooks::new();
        let x = b.fresh_var();
        let y = b.fresh_var();
        assert!(unify(&x, &y, &mut b, &hooks));
        assert!(b.is_bound(var_id(&x)));
        assert!(!b.is_bound(var_id(&y)));
    }

    #[test]
    fn test_partial_failure_leaves_bindings() {
        let mut b = Bindings::new();
        let hooks = AttributeHooks::new();
        let x = b.fresh_var();
        let mark = b.mark();
        let left = Term::structure("f", vec![x.clone(), Term::atom("a")]);
        let right = Term::structure("f", vec![Term::atom("b"), Term::atom("c")]);
        assert!(!unify(&left, &right, &mut b, &hooks));
        assert_eq!(b.deref(&x), &Term::atom("b"));
        b.undo_to(mark);
        assert_eq!(b.deref(&x), &x);
    }

    #[test]
    fn test_long_lists_unify_iteratively() {
        let mut b = Bindings::new();
        let hooks = AttributeHooks::new();
        let tail = b.fresh_var();
        let items: Vec<Term> = (0..100_000).map(Term::integer).collect();
        let open = Term::list_with_tail(items.clone(), tail.clone());
        let mut closed_items = items;
        closed_items.push(Term::atom("end"));
        let closed = Term::list(closed_items);
        assert!(unify(&open, &closed, &mut b, &hooks));
        assert_eq!(b.resolve(&tail), Term::list(vec![Term::atom("end")]));
    }

    #[test]
    fn test_functor_and_arity_must_match() {
        let mut b = Bindings::new();
        let hooks = AttributeHooks::new();
        let f1 = Term::structure("f", vec![Term::atom("a")]);
        let f2 = Term::structure("f", vec![Term::atom("a"), Term::atom("b")]);
        let g1 = Term::structure("g", vec![Term::atom("a")]);
        assert!(!unify(&f1, &f2, &mut b, &hooks));
        assert!(!unify(&f1, &g1, &mut b, &hooks));
    }

    /// Accepts only values that are not the atom stored in the attribute.
    struct Forbid;

    impl AttributeHook for Forbid {
        fn join(&self, left: &Term, right: &Term) -> Term {
            Term::list(vec![left.clone(), right.clone()])
        }

        fn verify(&self, value: &Term, attribute: &Term, bindings: &mut Bindings) -> bool {
            let value = bindings.resolve(value);
            match attribute {
                Term::Pair(_) => attribute.list_items().0.into_iter().all(|a| a != &value),
                _ => attribute != &value,
            }
        }
    }

    fn forbid_hooks() -> AttributeHooks {
        let mut hooks = AttributeHooks::new();
        hooks.register("forbid", Arc::new(Forbid));
        hooks
    }

    #[test]
    fn test_attribute_hook_rejects_binding() {
        let mut b = Bindings::new();
        let hooks = forbid_hooks();
        let x = b.fresh_var();
        b.put_attribute(var_id(&x), Atom::new("forbid"), Term::atom("red"));
        let mark = b.mark();
        assert!(!unify(&x, &Term::atom("red"), &mut b, &hooks));
        b.undo_to(mark);
        assert!(unify(&x, &Term::atom("blue"), &mut b, &hooks));
    }

    #[test]
    fn test_attributes_merge_onto_fresh_variable() {
        let mut b = Bindings::new();
        let hooks = forbid_hooks();
        let x = b.fresh_var();
        let y = b.fresh_var();
        let forbid = Atom::new("forbid");
        b.put_attribute(var_id(&x), forbid.clone(), Term::atom("red"));
        b.put_attribute(var_id(&y), forbid.clone(), Term::atom("blue"));
        assert!(unify(&x, &y, &mut b, &hooks));
        let merged = b.deref(&x).clone();
        assert_eq!(b.deref(&y), &merged);
        assert_eq!(
            b.attribute(var_id(&merged), &forbid),
            Some(&Term::list(vec![Term::atom("red"), Term::atom("blue")]))
        );
        let mark = b.mark();
        assert!(!unify(&x, &Term::atom("blue"), &mut b, &hooks));
        b.undo_to(mark);
        assert!(unify(&y, &Term::atom("green"), &mut b, &hooks));
    }

    #[test]
    fn test_empty_registry_ignores_attributes() {
        let mut b = Bindings::new();
        let x = b.fresh_var();
        b.put_attribute(var_id(&x), Atom::new("forbid"), Term::atom("red"));
        assert!(unify(&x, &Term::atom("red"), &mut b, &AttributeHooks::new()));
    }
}
