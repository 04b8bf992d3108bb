//! Terms of the engine's logic language
//!
//! A `Term` is a cheap-to-clone value: leaves are stored inline and compound
//! terms share their arguments through `Arc`. Terms never hold variable
//! bindings themselves; a `Variable` is an index into the binding store of the
//! query that created it (see [`Bindings`](super::Bindings)).
//!
//! Compound terms record at construction whether they are *immutable*
//! (contain no variables). Immutable terms are returned as-is by resolve and
//! instantiate, and they are the only terms that can serve as index keys.

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Functor of list cells.
pub const LIST_FUNCTOR: &str = ".";

// =============================================================================
// Atoms and variable ids
// =============================================================================

/// An interned-by-sharing atom name.
///
/// Atoms compare by content; cloning only bumps a reference count.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(Arc<str>);

impl Atom {
    pub fn new(name: &str) -> Self {
        Atom(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether the name can be written without quotes.
    fn is_plain(&self) -> bool {
        let name = self.name();
        let mut chars = name.chars();
        match chars.next() {
            None => false,
            Some(c) if c.is_ascii_lowercase() => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            Some(_) => {
                matches!(name, "[]" | "!" | ";" | "{}")
                    || name.chars().all(|c| "+-*/\\^<>=~:.?@#&$".contains(c))
            }
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plain() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "'")?;
            for c in self.name().chars() {
                match c {
                    '\'' => write!(f, "\\'")?,
                    '\\' => write!(f, "\\\\")?,
                    '\n' => write!(f, "\\n")?,
                    c => write!(f, "{}", c)?,
                }
            }
            write!(f, "'")
        }
    }
}

impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl From<&str> for Atom {
    fn from(name: &str) -> Self {
        Atom::new(name)
    }
}

/// ID of a variable cell in a binding store.
///
/// In clause templates the ids are dense (`0..var_count`) and only meaningful
/// relative to the template.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

impl VarId {
    pub fn new(id: u32) -> Self {
        VarId(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Predicate keys
// =============================================================================

/// Name and arity of a predicate, e.g. `append/3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PredicateKey {
    pub name: Atom,
    pub arity: usize,
}

impl PredicateKey {
    pub fn new(name: &str, arity: usize) -> Self {
        PredicateKey {
            name: Atom::new(name),
            arity,
        }
    }
}

impl fmt::Display for PredicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

// =============================================================================
// Compound payloads
// =============================================================================

/// A structure `functor(args...)` with at least one argument.
#[derive(Debug)]
pub struct Compound {
    functor: Atom,
    args: Box<[Term]>,
    immutable: bool,
}

impl Compound {
    pub fn functor(&self) -> &Atom {
        &self.functor
    }

    pub fn args(&self) -> &[Term] {
        &self.args
    }
}

/// A list cell `[Head|Tail]`.
#[derive(Debug)]
pub struct ListCell {
    items: [Term; 2],
    immutable: bool,
}

impl ListCell {
    pub fn head(&self) -> &Term {
        &self.items[0]
    }

    pub fn tail(&self) -> &Term {
        &self.items[1]
    }

    /// Head and tail as an argument slice.
    pub fn args(&self) -> &[Term] {
        &self.items
    }
}

// Long lists would otherwise be dropped recursively, one frame per cell.
impl Drop for ListCell {
    fn drop(&mut self) {
        let mut tail = std::mem::replace(&mut self.items[1], Term::EmptyList);
        while let Term::Pair(cell) = tail {
            match Arc::try_unwrap(cell) {
                Ok(mut inner) => tail = std::mem::replace(&mut inner.items[1], Term::EmptyList),
                Err(_) => break,
            }
        }
    }
}

// =============================================================================
// Term
// =============================================================================

/// Coarse classification of a term, as returned by [`Term::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Atom,
    Integer,
    Decimal,
    EmptyList,
    Pair,
    Structure,
    Variable,
}

/// A term of the logic language.
#[derive(Debug, Clone)]
pub enum Term {
    Atom(Atom),
    Integer(i64),
    Decimal(f64),
    EmptyList,
    Pair(Arc<ListCell>),
    Structure(Arc<Compound>),
    Variable(VarId),
}

impl Term {
    pub fn atom(name: &str) -> Term {
        Term::Atom(Atom::new(name))
    }

    pub fn integer(value: i64) -> Term {
        Term::Integer(value)
    }

    pub fn decimal(value: f64) -> Term {
        Term::Decimal(value)
    }

    pub fn var(id: u32) -> Term {
        Term::Variable(VarId(id))
    }

    /// Build `functor(args...)`.
    ///
    /// Zero arguments give an atom and `'.'/2` gives a list cell, so list
    /// shaped terms are always `Pair`.
    pub fn structure(functor: &str, args: Vec<Term>) -> Term {
        Term::compound(Atom::new(functor), args)
    }

    /// Same as [`Term::structure`] for an already shared functor.
    pub fn compound(functor: Atom, args: Vec<Term>) -> Term {
        if args.is_empty() {
            return Term::Atom(functor);
        }
        let args = if functor.name() == LIST_FUNCTOR {
            match <[Term; 2]>::try_from(args) {
                Ok([head, tail]) => return Term::pair(head, tail),
                Err(args) => args,
            }
        } else {
            args
        };
        let immutable = args.iter().all(Term::is_immutable);
        Term::Structure(Arc::new(Compound {
            functor,
            args: args.into_boxed_slice(),
            immutable,
        }))
    }

    pub fn pair(head: Term, tail: Term) -> Term {
        let immutable = head.is_immutable() && tail.is_immutable();
        Term::Pair(Arc::new(ListCell {
            items: [head, tail],
            immutable,
        }))
    }

    /// Proper list of `items`.
    pub fn list(items: Vec<Term>) -> Term {
        Term::list_with_tail(items, Term::EmptyList)
    }

    /// Partial list `[items...|tail]`.
    pub fn list_with_tail(items: Vec<Term>, tail: Term) -> Term {
        items
            .into_iter()
            .rev()
            .fold(tail, |tail, head| Term::pair(head, tail))
    }

    /// Items of a list spine and the term that ends it (`[]` for a proper
    /// list). Bindings are not followed.
    pub fn list_items(&self) -> (Vec<&Term>, &Term) {
        let mut items = Vec::new();
        let mut cursor = self;
        while let Term::Pair(cell) = cursor {
            items.push(cell.head());
            cursor = cell.tail();
        }
        (items, cursor)
    }

    pub fn kind(&self) -> TermKind {
        match self {
            Term::Atom(_) => TermKind::Atom,
            Term::Integer(_) => TermKind::Integer,
            Term::Decimal(_) => TermKind::Decimal,
            Term::EmptyList => TermKind::EmptyList,
            Term::Pair(_) => TermKind::Pair,
            Term::Structure(_) => TermKind::Structure,
            Term::Variable(_) => TermKind::Variable,
        }
    }

    /// True if the term contains no variables.
    #[inline]
    pub fn is_immutable(&self) -> bool {
        match self {
            Term::Atom(_) | Term::Integer(_) | Term::Decimal(_) | Term::EmptyList => true,
            Term::Pair(cell) => cell.immutable,
            Term::Structure(c) => c.immutable,
            Term::Variable(_) => false,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    pub fn arity(&self) -> usize {
        match self {
            Term::Pair(_) => 2,
            Term::Structure(c) => c.args.len(),
            _ => 0,
        }
    }

    /// Argument `index` of a compound term.
    ///
    /// # Panics
    /// If `index` is out of range; asking for a missing argument is a bug in
    /// the caller, not a logical failure.
    pub fn arg(&self, index: usize) -> &Term {
        match self.args().get(index) {
            Some(arg) => arg,
            None => panic!("argument {} out of range for {}", index, self),
        }
    }

    /// Arguments of a compound term (empty for leaves).
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Pair(cell) => cell.args(),
            Term::Structure(c) => c.args(),
            _ => &[],
        }
    }

    /// Functor name of atoms, structures and list cells.
    pub fn functor(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a.name()),
            Term::Structure(c) => Some(c.functor.name()),
            Term::Pair(_) => Some(LIST_FUNCTOR),
            Term::EmptyList => Some("[]"),
            _ => None,
        }
    }

    /// Predicate key when this term is used as a goal.
    pub fn predicate_key(&self) -> Option<PredicateKey> {
        match self {
            Term::Atom(a) => Some(PredicateKey {
                name: a.clone(),
                arity: 0,
            }),
            Term::Structure(c) => Some(PredicateKey {
                name: c.functor.clone(),
                arity: c.args.len(),
            }),
            Term::Pair(_) => Some(PredicateKey::new(LIST_FUNCTOR, 2)),
            _ => None,
        }
    }

    /// Rebuild a compound term of the same shape with new arguments.
    pub(crate) fn with_args(&self, args: Vec<Term>) -> Term {
        match self {
            Term::Pair(_) => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(head), Some(tail)) => Term::pair(head, tail),
                    _ => panic!("list cell rebuilt with wrong arity"),
                }
            }
            Term::Structure(c) => Term::compound(c.functor.clone(), args),
            _ => self.clone(),
        }
    }

    /// Pointer identity for shared compound terms.
    pub(crate) fn same_allocation(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Pair(a), Term::Pair(b)) => Arc::ptr_eq(a, b),
            (Term::Structure(a), Term::Structure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// Structural equality. Variables compare by id and decimals by bit pattern,
// which keeps `Eq` and `Hash` consistent for index keys.
impl PartialEq for Term {
    fn eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Atom(a), Term::Atom(b)) => a == b,
            (Term::Integer(a), Term::Integer(b)) => a == b,
            (Term::Decimal(a), Term::Decimal(b)) => a.to_bits() == b.to_bits(),
            (Term::EmptyList, Term::EmptyList) => true,
            (Term::Variable(a), Term::Variable(b)) => a == b,
            (Term::Pair(_), Term::Pair(_)) => {
                let (mut a, mut b) = (self, other);
                loop {
                    match (a, b) {
                        (Term::Pair(x), Term::Pair(y)) => {
                            if Arc::ptr_eq(x, y) {
                                return true;
                            }
                            if x.head() != y.head() {
                                return false;
                            }
                            a = x.tail();
                            b = y.tail();
                        }
                        _ => return a == b,
                    }
                }
            }
            (Term::Structure(x), Term::Structure(y)) => {
                Arc::ptr_eq(x, y) || (x.functor == y.functor && x.args == y.args)
            }
            _ => false,
        }
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Term::Atom(a) => a.hash(state),
            Term::Integer(i) => i.hash(state),
            Term::Decimal(d) => d.to_bits().hash(state),
            Term::EmptyList => {}
            Term::Variable(v) => v.hash(state),
            Term::Pair(cell) => {
                cell.head().hash(state);
                let mut tail = cell.tail();
                while let Term::Pair(next) = tail {
                    next.head().hash(state);
                    tail = next.tail();
                }
                tail.hash(state);
            }
            Term::Structure(c) => {
                c.functor.hash(state);
                c.args.hash(state);
            }
        }
    }
}

impl From<Atom> for Term {
    fn from(atom: Atom) -> Self {
        Term::Atom(atom)
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Integer(value)
    }
}

// =============================================================================
// Display
// =============================================================================

fn write_decimal(f: &mut fmt::Formatter<'_>, d: f64) -> fmt::Result {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e15 {
        write!(f, "{:.1}", d)
    } else {
        write!(f, "{}", d)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(a) => write!(f, "{}", a),
            Term::Integer(i) => write!(f, "{}", i),
            Term::Decimal(d) => write_decimal(f, *d),
            Term::EmptyList => write!(f, "[]"),
            Term::Variable(v) => write!(f, "_G{}", v.0),
            Term::Pair(cell) => {
                write!(f, "[{}", cell.head())?;
                let mut tail = cell.tail();
                loop {
                    match tail {
                        Term::Pair(next) => {
                            write!(f, ",{}", next.head())?;
                            tail = next.tail();
                        }
                        Term::EmptyList => break,
                        other => {
                            write!(f, "|{}", other)?;
                            break;
                        }
                    }
                }
                write!(f, "]")
            }
            Term::Structure(c) => {
                write!(f, "{}(", c.functor)?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_structure_becomes_pair() {
        let t = Term::structure(".", vec![Term::atom("a"), Term::EmptyList]);
        assert_eq!(t.kind(), TermKind::Pair);
        assert_eq!(t, Term::list(vec![Term::atom("a")]));
    }

    #[test]
    fn test_zero_arity_structure_is_atom() {
        assert_eq!(Term::structure("p", vec![]).kind(), TermKind::Atom);
    }

    #[test]
    fn test_immutability_is_computed_at_construction() {
        let ground = Term::structure("f", vec![Term::atom("a"), Term::integer(1)]);
        let open = Term::structure("f", vec![Term::atom("a"), Term::var(0)]);
        assert!(ground.is_immutable());
        assert!(!open.is_immutable());
        assert!(!Term::structure("g", vec![open]).is_immutable());
    }

    #[test]
    fn test_integer_and_decimal_are_distinct() {
        assert_ne!(Term::integer(1), Term::decimal(1.0));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_arg_out_of_range_panics() {
        let t = Term::structure("f", vec![Term::atom("a")]);
        t.arg(1);
    }

    #[test]
    fn test_display() {
        let t = Term::structure(
            "f",
            vec![
                Term::atom("Hello"),
                Term::list_with_tail(vec![Term::integer(1), Term::decimal(2.0)], Term::var(3)),
                Term::EmptyList,
            ],
        );
        assert_eq!(t.to_string(), "f('Hello',[1,2.0|_G3],[])");
        assert_eq!(PredicateKey::new("append", 3).to_string(), "append/3");
    }
}
