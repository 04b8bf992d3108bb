//! Composite first-argument-style indexing over eligible columns
//!
//! A column is *eligible* when every clause of the predicate has an
//! immutable term at that position. For every combination of up to
//! `max_composite_columns` eligible columns there is a lookup table from the
//! tuple of values to the clauses carrying exactly those values. Tables are
//! built on first use and never change afterwards; a predicate whose clauses
//! change gets a new `Indexes`.
//!
//! ## Lookup
//!
//! The eligible columns bound to an immutable term in the call are collected
//! in column order. The first `max_composite_columns` of them select the
//! table; any further bound columns are filtered linearly over the bucket.
//! The result is always the same set, in the same order, as a linear scan
//! keeping the clauses that agree with the call on every bound eligible
//! column.

use super::clause::ClauseEntry;
use crate::config::EngineConfig;
use crate::logic::{Bindings, Term};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Bucket = Arc<[Arc<ClauseEntry>]>;
type Table = HashMap<Vec<Term>, Bucket>;

/// Lookup tables for one clause list.
pub struct Indexes {
    entries: Bucket,
    /// Eligible column positions, ascending.
    columns: Vec<usize>,
    width: usize,
    /// Keyed by a bitmask over positions in `columns`.
    tables: HashMap<u32, OnceLock<Table>>,
    empty: Bucket,
}

impl fmt::Debug for Indexes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexes")
            .field("clauses", &self.entries.len())
            .field("columns", &self.columns)
            .field("width", &self.width)
            .finish()
    }
}

impl Indexes {
    pub fn new(entries: Bucket, arity: usize, config: &EngineConfig) -> Self {
        let (width, limit) = config.index_limits();
        let columns: Vec<usize> = (0..arity)
            .filter(|&column| {
                entries
                    .iter()
                    .all(|entry| entry.head_arg(column).is_immutable())
            })
            .take(limit)
            .collect();
        let tables = column_sets(columns.len(), width)
            .into_iter()
            .map(|mask| (mask, OnceLock::new()))
            .collect();
        Indexes {
            entries,
            columns,
            width,
            tables,
            empty: Arc::from(Vec::new()),
        }
    }

    /// Eligible column positions.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Clauses that can match a call with `args`.
    pub fn index(&self, args: &[Term], bindings: &Bindings) -> Bucket {
        let mut bound: SmallVec<[(usize, Term); 4]> = SmallVec::new();
        for (slot, &column) in self.columns.iter().enumerate() {
            if let Some(value) = args.get(column).and_then(|arg| ground_value(arg, bindings)) {
                bound.push((slot, value));
            }
        }
        if bound.is_empty() {
            return self.entries.clone();
        }

        let (keyed, rest) = bound.split_at(bound.len().min(self.width));
        let mask = keyed.iter().fold(0u32, |mask, (slot, _)| mask | 1 << slot);
        let Some(table) = self.tables.get(&mask) else {
            return self.scan(&bound);
        };
        let table = table.get_or_init(|| self.build_table(mask));
        let key: Vec<Term> = keyed.iter().map(|(_, value)| value.clone()).collect();
        let Some(bucket) = table.get(&key) else {
            return self.empty.clone();
        };
        if rest.is_empty() {
            return bucket.clone();
        }
        bucket
            .iter()
            .filter(|entry| self.matches(entry, rest))
            .cloned()
            .collect()
    }

    fn matches(&self, entry: &ClauseEntry, bound: &[(usize, Term)]) -> bool {
        bound
            .iter()
            .all(|(slot, value)| entry.head_arg(self.columns[*slot]) == value)
    }

    fn scan(&self, bound: &[(usize, Term)]) -> Bucket {
        self.entries
            .iter()
            .filter(|entry| self.matches(entry, bound))
            .cloned()
            .collect()
    }

    fn build_table(&self, mask: u32) -> Table {
        let columns: Vec<usize> = (0..self.columns.len())
            .filter(|slot| mask & (1 << slot) != 0)
            .map(|slot| self.columns[slot])
            .collect();
        let mut groups: HashMap<Vec<Term>, Vec<Arc<ClauseEntry>>> = HashMap::new();
        for entry in self.entries.iter() {
            let key = columns
                .iter()
                .map(|&column| entry.head_arg(column).clone())
                .collect();
            groups.entry(key).or_default().push(entry.clone());
        }
        log::trace!(
            "built index over columns {:?}: {} keys for {} clauses",
            columns,
            groups.len(),
            self.entries.len()
        );
        groups
            .into_iter()
            .map(|(key, bucket)| (key, Arc::from(bucket)))
            .collect()
    }
}

/// The call argument as an immutable term, if it is fully bound.
pub(crate) fn ground_value(arg: &Term, bindings: &Bindings) -> Option<Term> {
    let value = bindings.deref(arg);
    if value.is_immutable() {
        Some(value.clone())
    } else if value.is_variable() {
        None
    } else {
        Some(bindings.resolve(value)).filter(Term::is_immutable)
    }
}

/// All column sets of size `1..=width` over `n` columns, smaller sets first.
fn column_sets(n: usize, width: usize) -> Vec<u32> {
    fn extend(start: usize, n: usize, left: usize, mask: u32, out: &mut Vec<u32>) {
        if mask != 0 {
            out.push(mask);
        }
        if left == 0 {
            return;
        }
        for column in start..n {
            extend(column + 1, n, left - 1, mask | 1 << column, out);
        }
    }
    let mut out = Vec::new();
    extend(0, n, width, 0, &mut out);
    out.sort_by_key(|mask| mask.count_ones());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ClauseModel;
    use proptest::prelude::*;

    fn entries(facts: &[Vec<Term>]) -> Bucket {
        facts
            .iter()
            .enumerate()
            .map(|(position, args)| {
                let model = ClauseModel::fact(Term::structure("p", args.clone())).unwrap();
                Arc::new(ClauseEntry::new(Arc::new(model), position))
            })
            .collect()
    }

    fn positions(bucket: &Bucket) -> Vec<usize> {
        bucket.iter().map(|entry| entry.position()).collect()
    }

    #[test]
    fn test_column_sets() {
        assert_eq!(column_sets(3, 3).len(), 7);
        assert_eq!(column_sets(9, 3).len(), 9 + 36 + 84);
        assert_eq!(column_sets(4, 1), vec![0b0001, 0b0010, 0b0100, 0b1000]);
    }

    #[test]
    fn test_non_ground_clause_disqualifies_column() {
        let facts = vec![
            vec![Term::atom("a"), Term::integer(1)],
            vec![Term::var(0), Term::integer(2)],
        ];
        let indexes = Indexes::new(entries(&facts), 2, &EngineConfig::default());
        assert_eq!(indexes.columns(), &[1]);
    }

    #[test]
    fn test_lookup_with_unbound_and_missing_keys() {
        let facts = vec![
            vec![Term::atom("a"), Term::integer(1)],
            vec![Term::atom("b"), Term::integer(2)],
            vec![Term::atom("a"), Term::integer(3)],
        ];
        let indexes = Indexes::new(entries(&facts), 2, &EngineConfig::default());
        let mut bindings = Bindings::new();
        let x = bindings.fresh_var();

        let all = indexes.index(&[x.clone(), x.clone()], &bindings);
        assert_eq!(positions(&all), vec![0, 1, 2]);

        let a = indexes.index(&[Term::atom("a"), x.clone()], &bindings);
        assert_eq!(positions(&a), vec![0, 2]);

        let none = indexes.index(&[Term::atom("c"), x], &bindings);
        assert!(none.is_empty());
    }

    #[test]
    fn test_bound_variable_is_used_as_key() {
        let facts = vec![vec![Term::atom("a")], vec![Term::atom("b")]];
        let indexes = Indexes::new(entries(&facts), 1, &EngineConfig::default());
        let mut bindings = Bindings::new();
        let x = bindings.fresh_var();
        if let Term::Variable(id) = x {
            bindings.bind(id, Term::atom("b"));
        }
        assert_eq!(positions(&indexes.index(&[x], &bindings)), vec![1]);
    }

    fn arb_value() -> impl Strategy<Value = Term> {
        prop_oneof![
            (0..3i64).prop_map(Term::integer),
            (0..2u8).prop_map(|i| Term::atom(&format!("k{}", i))),
            (0..2i64).prop_map(|i| Term::structure("s", vec![Term::integer(i)])),
        ]
    }

    /// A clause argument: usually a value, sometimes a variable.
    fn arb_clause_arg() -> impl Strategy<Value = Option<Term>> {
        prop_oneof![8 => arb_value().prop_map(Some), 1 => Just(None)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// Indexed lookup returns exactly the clauses a linear scan over the
        /// bound eligible columns keeps, in clause order.
        #[test]
        fn prop_index_matches_linear_scan(
            clauses in proptest::collection::vec(proptest::collection::vec(arb_clause_arg(), 5), 0..12),
            query in proptest::collection::vec(proptest::option::of(arb_value()), 5),
            width in 1usize..=3,
        ) {
            let facts: Vec<Vec<Term>> = clauses
                .iter()
                .map(|args| {
                    args.iter()
                        .enumerate()
                        .map(|(i, arg)| arg.clone().unwrap_or_else(|| Term::var(i as u32)))
                        .collect()
                })
                .collect();
            let config = EngineConfig { max_composite_columns: width, ..EngineConfig::default() };
            let indexes = Indexes::new(entries(&facts), 5, &config);

            let mut bindings = Bindings::new();
            let args: Vec<Term> = query
                .iter()
                .map(|value| value.clone().unwrap_or_else(|| bindings.fresh_var()))
                .collect();

            let eligible: Vec<usize> = (0..5)
                .filter(|&c| facts.iter().all(|f| f[c].is_immutable()))
                .collect();
            let expected: Vec<usize> = facts
                .iter()
                .enumerate()
                .filter(|(_, f)| {
                    eligible.iter().all(|&c| match &query[c] {
                        Some(value) => &f[c] == value,
                        None => true,
                    })
                })
                .map(|(position, _)| position)
                .collect();

            let found = indexes.index(&args, &bindings);
            prop_assert_eq!(positions(&found), expected.clone());
            // second lookup hits the built table
            prop_assert_eq!(positions(&indexes.index(&args, &bindings)), expected);
        }
    }
}
