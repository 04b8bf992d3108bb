//! Arithmetic evaluation for `is/2` and the numeric comparisons
//!
//! Evaluable functors are looked up in an explicit registration table keyed
//! by name and arity. [`ArithmeticOperators::standard`] holds the built-in
//! set; embedders may register more before the knowledge base is shared.
//!
//! Integers stay integers while the operation allows it. Mixing an integer
//! with a decimal promotes the integer. Integer overflow, division by zero and
//! non-finite decimal results are evaluation errors.

use crate::error::{EngineError, Result};
use crate::logic::{Bindings, PredicateKey, Term};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// An evaluated number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Integer(i64),
    Decimal(f64),
}

impl Numeric {
    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Integer(i) => i as f64,
            Numeric::Decimal(d) => d,
        }
    }

    pub fn to_term(self) -> Term {
        match self {
            Numeric::Integer(i) => Term::integer(i),
            Numeric::Decimal(d) => Term::decimal(d),
        }
    }

    fn decimal(value: f64) -> Result<Numeric> {
        if value.is_nan() {
            Err(EngineError::evaluation("undefined"))
        } else if value.is_infinite() {
            Err(EngineError::evaluation("float_overflow"))
        } else {
            Ok(Numeric::Decimal(value))
        }
    }

    fn integer_only(self) -> Result<i64> {
        match self {
            Numeric::Integer(i) => Ok(i),
            Numeric::Decimal(d) => Err(EngineError::type_error("integer", Term::decimal(d))),
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_term())
    }
}

/// Compare two numbers by value; integers against decimals compare as
/// decimals.
pub fn compare(a: Numeric, b: Numeric) -> Ordering {
    match (a, b) {
        (Numeric::Integer(x), Numeric::Integer(y)) => x.cmp(&y),
        _ => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
    }
}

/// Implementation of one evaluable functor. Receives the evaluated arguments.
pub type ArithmeticFn = fn(&[Numeric]) -> Result<Numeric>;

/// Registration table of evaluable functors.
#[derive(Clone, Default)]
pub struct ArithmeticOperators {
    table: HashMap<PredicateKey, ArithmeticFn>,
}

impl fmt::Debug for ArithmeticOperators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

impl ArithmeticOperators {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in operators.
    pub fn standard() -> Self {
        let mut ops = Self::new();
        ops.register("+", 2, add);
        ops.register("-", 2, subtract);
        ops.register("*", 2, multiply);
        ops.register("/", 2, divide);
        ops.register("//", 2, int_divide);
        ops.register("mod", 2, modulo);
        ops.register("rem", 2, remainder);
        ops.register("min", 2, min);
        ops.register("max", 2, max);
        ops.register("abs", 1, abs);
        ops.register("-", 1, negate);
        ops.register("+", 1, |args| Ok(args[0]));
        ops.register("sign", 1, sign);
        ops
    }

    /// Add or replace an evaluable functor.
    pub fn register(&mut self, name: &str, arity: usize, function: ArithmeticFn) {
        self.table.insert(PredicateKey::new(name, arity), function);
    }

    pub fn contains(&self, name: &str, arity: usize) -> bool {
        self.table.contains_key(&PredicateKey::new(name, arity))
    }

    /// Evaluate an arithmetic expression under the current bindings.
    pub fn evaluate(&self, expression: &Term, bindings: &Bindings) -> Result<Numeric> {
        match bindings.deref(expression) {
            Term::Integer(i) => Ok(Numeric::Integer(*i)),
            Term::Decimal(d) => Ok(Numeric::Decimal(*d)),
            Term::Variable(_) => Err(EngineError::instantiation()),
            // `[X]` evaluates as `X`
            Term::Pair(cell) if matches!(bindings.deref(cell.tail()), Term::EmptyList) => {
                self.evaluate(cell.head(), bindings)
            }
            term => {
                let key = match term.predicate_key() {
                    Some(key) if !matches!(term, Term::Pair(_)) => key,
                    _ => return Err(EngineError::type_error("evaluable", term.clone())),
                };
                let function = match self.table.get(&key) {
                    Some(function) => *function,
                    None => return Err(EngineError::type_error("evaluable", indicator(&key))),
                };
                let args = term
                    .args()
                    .iter()
                    .map(|arg| self.evaluate(arg, bindings))
                    .collect::<Result<Vec<_>>>()?;
                function(&args)
            }
        }
    }
}

fn indicator(key: &PredicateKey) -> Term {
    Term::structure(
        "/",
        vec![Term::Atom(key.name.clone()), Term::integer(key.arity as i64)],
    )
}

// =============================================================================
// Built-in operators
// =============================================================================

fn overflow() -> EngineError {
    EngineError::evaluation("int_overflow")
}

fn zero_divisor() -> EngineError {
    EngineError::evaluation("zero_divisor")
}

fn add(args: &[Numeric]) -> Result<Numeric> {
    match (args[0], args[1]) {
        (Numeric::Integer(a), Numeric::Integer(b)) => {
            a.checked_add(b).map(Numeric::Integer).ok_or_else(overflow)
        }
        (a, b) => Numeric::decimal(a.as_f64() + b.as_f64()),
    }
}

fn subtract(args: &[Numeric]) -> Result<Numeric> {
    match (args[0], args[1]) {
        (Numeric::Integer(a), Numeric::Integer(b)) => {
            a.checked_sub(b).map(Numeric::Integer).ok_or_else(overflow)
        }
        (a, b) => Numeric::decimal(a.as_f64() - b.as_f64()),
    }
}

fn multiply(args: &[Numeric]) -> Result<Numeric> {
    match (args[0], args[1]) {
        (Numeric::Integer(a), Numeric::Integer(b)) => {
            a.checked_mul(b).map(Numeric::Integer).ok_or_else(overflow)
        }
        (a, b) => Numeric::decimal(a.as_f64() * b.as_f64()),
    }
}

fn divide(args: &[Numeric]) -> Result<Numeric> {
    match (args[0], args[1]) {
        (_, Numeric::Integer(0)) => Err(zero_divisor()),
        (_, Numeric::Decimal(b)) if b == 0.0 => Err(zero_divisor()),
        (Numeric::Integer(a), Numeric::Integer(b)) if a.wrapping_rem(b) == 0 => {
            a.checked_div(b).map(Numeric::Integer).ok_or_else(overflow)
        }
        (a, b) => Numeric::decimal(a.as_f64() / b.as_f64()),
    }
}

fn int_divide(args: &[Numeric]) -> Result<Numeric> {
    let (a, b) = (args[0].integer_only()?, args[1].integer_only()?);
    if b == 0 {
        return Err(zero_divisor());
    }
    a.checked_div(b).map(Numeric::Integer).ok_or_else(overflow)
}

fn modulo(args: &[Numeric]) -> Result<Numeric> {
    let (a, b) = (args[0].integer_only()?, args[1].integer_only()?);
    if b == 0 {
        return Err(zero_divisor());
    }
    // result takes the sign of the divisor
    let r = a.wrapping_rem(b);
    Ok(Numeric::Integer(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
}

fn remainder(args: &[Numeric]) -> Result<Numeric> {
    let (a, b) = (args[0].integer_only()?, args[1].integer_only()?);
    if b == 0 {
        return Err(zero_divisor());
    }
    Ok(Numeric::Integer(a.wrapping_rem(b)))
}

fn min(args: &[Numeric]) -> Result<Numeric> {
    Ok(match compare(args[0], args[1]) {
        Ordering::Greater => args[1],
        _ => args[0],
    })
}

fn max(args: &[Numeric]) -> Result<Numeric> {
    Ok(match compare(args[0], args[1]) {
        Ordering::Less => args[1],
        _ => args[0],
    })
}

fn abs(args: &[Numeric]) -> Result<Numeric> {
    match args[0] {
        Numeric::Integer(a) => a.checked_abs().map(Numeric::Integer).ok_or_else(overflow),
        Numeric::Decimal(d) => Ok(Numeric::Decimal(d.abs())),
    }
}

fn negate(args: &[Numeric]) -> Result<Numeric> {
    match args[0] {
        Numeric::Integer(a) => a.checked_neg().map(Numeric::Integer).ok_or_else(overflow),
        Numeric::Decimal(d) => Ok(Numeric::Decimal(-d)),
    }
}

fn sign(args: &[Numeric]) -> Result<Numeric> {
    Ok(match args[0] {
        Numeric::Integer(a) => Numeric::Integer(a.signum()),
        Numeric::Decimal(d) if d == 0.0 => Numeric::Decimal(0.0),
        Numeric::Decimal(d) => Numeric::Decimal(d.signum()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn eval(term: Term) -> Result<Numeric> {
        ArithmeticOperators::standard().evaluate(&term, &Bindings::new())
    }

    fn op(name: &str, a: Term, b: Term) -> Term {
        Term::structure(name, vec![a, b])
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let expr = op("+", Term::integer(2), op("*", Term::integer(3), Term::integer(4)));
        assert_eq!(eval(expr).unwrap(), Numeric::Integer(14));
        assert_eq!(
            eval(op("/", Term::integer(6), Term::integer(3))).unwrap(),
            Numeric::Integer(2)
        );
        assert_eq!(
            eval(op("/", Term::integer(7), Term::integer(2))).unwrap(),
            Numeric::Decimal(3.5)
        );
    }

    #[test]
    fn test_mixed_arithmetic_promotes() {
        assert_eq!(
            eval(op("+", Term::integer(1), Term::decimal(0.5))).unwrap(),
            Numeric::Decimal(1.5)
        );
    }

    #[test]
    fn test_mod_and_rem_signs() {
        assert_eq!(
            eval(op("mod", Term::integer(-7), Term::integer(2))).unwrap(),
            Numeric::Integer(1)
        );
        assert_eq!(
            eval(op("rem", Term::integer(-7), Term::integer(2))).unwrap(),
            Numeric::Integer(-1)
        );
    }

    #[test]
    fn test_evaluation_errors() {
        let overflow = eval(op("+", Term::integer(i64::MAX), Term::integer(1))).unwrap_err();
        assert_eq!(overflow.kind, ErrorKind::Evaluation("int_overflow"));
        let zero = eval(op("//", Term::integer(1), Term::integer(0))).unwrap_err();
        assert_eq!(zero.kind, ErrorKind::Evaluation("zero_divisor"));
    }

    #[test]
    fn test_unbound_and_unknown() {
        let mut bindings = Bindings::new();
        let x = bindings.fresh_var();
        let ops = ArithmeticOperators::standard();
        let err = ops.evaluate(&op("+", x, Term::integer(1)), &bindings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Instantiation);

        let err = ops
            .evaluate(&Term::structure("foo", vec![Term::integer(1)]), &bindings)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Type { expected: "evaluable", .. }));
    }

    #[test]
    fn test_registered_operator() {
        let mut ops = ArithmeticOperators::standard();
        ops.register("double", 1, |args| match args[0] {
            Numeric::Integer(i) => Ok(Numeric::Integer(i * 2)),
            Numeric::Decimal(d) => Ok(Numeric::Decimal(d * 2.0)),
        });
        let term = Term::structure("double", vec![Term::integer(21)]);
        assert_eq!(ops.evaluate(&term, &Bindings::new()).unwrap(), Numeric::Integer(42));
    }
}
