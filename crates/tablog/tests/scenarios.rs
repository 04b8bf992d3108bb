//! End-to-end scenarios: clause order, composite indexing, concurrent
//! tabling, cut and rules interleaved with facts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tablog::store::Clauses;
use tablog::{ClauseModel, EngineConfig, KnowledgeBase, PredicateKey, Term};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn atom(name: &str) -> Term {
    Term::atom(name)
}

fn var(id: u32) -> Term {
    Term::var(id)
}

fn s(name: &str, args: Vec<Term>) -> Term {
    Term::structure(name, args)
}

fn rule(head: Term, goals: Vec<Term>) -> Term {
    let body = goals
        .into_iter()
        .rev()
        .reduce(|rest, goal| s(",", vec![goal, rest]))
        .unwrap_or_else(|| atom("true"));
    s(":-", vec![head, body])
}

#[test]
fn test_facts_in_declaration_order() {
    init();
    let kb = KnowledgeBase::new();
    for name in ["a", "b", "c"] {
        kb.add_clause(&s("p", vec![atom(name)])).unwrap();
    }
    let kb = Arc::new(kb);

    let mut query = kb.query(&s("p", vec![var(0)]));
    for expected in ["a", "b", "c"] {
        assert!(query.evaluate().unwrap());
        assert_eq!(query.binding(0), Some(atom(expected)));
    }
    assert!(!query.could_reevaluation_succeed());
    assert!(!query.evaluate().unwrap());
}

#[test]
fn test_composite_index_skips_unrelated_clauses() {
    init();
    let facts = [
        s("p", vec![atom("a"), atom("b"), atom("c")]),
        s("p", vec![atom("a"), atom("d"), atom("c")]),
        s("p", vec![atom("x"), atom("y"), atom("z")]),
    ];

    // the index over columns 0 and 2 selects the first two clauses
    let models: Vec<Arc<ClauseModel>> = facts
        .iter()
        .map(|fact| Arc::new(ClauseModel::fact(fact.clone()).unwrap()))
        .collect();
    let clauses = Clauses::new(&models, 3, &EngineConfig::default());
    assert_eq!(clauses.eligible_columns(), &[0, 1, 2]);
    let mut bindings = tablog::Bindings::new();
    let v = bindings.fresh_var();
    let candidates = clauses.candidates(&[atom("a"), v, atom("c")], &bindings);
    let positions: Vec<usize> = candidates.iter().map(|entry| entry.position()).collect();
    assert_eq!(positions, vec![0, 1]);

    let kb = KnowledgeBase::new();
    for fact in facts.iter() {
        kb.add_clause(fact).unwrap();
    }
    let kb = Arc::new(kb);
    let goal = s("p", vec![atom("a"), var(0), atom("c")]);
    let mut query = kb.query(&goal);
    let mut matches = Vec::new();
    while query.evaluate().unwrap() {
        matches.push(query.resolved_goal());
    }
    assert_eq!(
        matches,
        vec![
            s("p", vec![atom("a"), atom("b"), atom("c")]),
            s("p", vec![atom("a"), atom("d"), atom("c")]),
        ]
    );
}

/// `fib(0, 1) :- base_case. fib(1, 1). fib(N, F) :- N > 1, ...`, tabled.
fn fib_kb(base_calls: Arc<AtomicUsize>) -> Arc<KnowledgeBase> {
    let mut kb = KnowledgeBase::new();
    kb.register_deterministic("base_case", 0, move |_, _| {
        base_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    });

    let (n, f, n1, n2, f1, f2) = (var(0), var(1), var(2), var(3), var(4), var(5));
    kb.add_clause(&rule(
        s("fib", vec![Term::integer(0), Term::integer(1)]),
        vec![atom("base_case")],
    ))
    .unwrap();
    kb.add_clause(&s("fib", vec![Term::integer(1), Term::integer(1)]))
        .unwrap();
    kb.add_clause(&rule(
        s("fib", vec![n.clone(), f.clone()]),
        vec![
            s(">", vec![n.clone(), Term::integer(1)]),
            s("is", vec![n1.clone(), s("-", vec![n.clone(), Term::integer(1)])]),
            s("is", vec![n2.clone(), s("-", vec![n, Term::integer(2)])]),
            s("fib", vec![n1, f1.clone()]),
            s("fib", vec![n2, f2.clone()]),
            s("is", vec![f, s("+", vec![f1, f2])]),
        ],
    ))
    .unwrap();
    kb.set_tabled(&PredicateKey::new("fib", 2)).unwrap();
    Arc::new(kb)
}

#[test]
fn test_concurrent_tabled_fib_computes_once() {
    init();
    let base_calls = Arc::new(AtomicUsize::new(0));
    let kb = fib_kb(base_calls.clone());
    let callers = 10;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|caller| {
            let kb = kb.clone();
            let barrier = barrier.clone();
            thread::Builder::new()
                .name(format!("fib-{}", caller))
                .stack_size(16 * 1024 * 1024)
                .spawn(move || {
                    barrier.wait();
                    // different variable numbering, same call signature
                    let goal = s("fib", vec![Term::integer(91), var(caller as u32)]);
                    kb.query(&goal).collect(caller as u32).unwrap()
                })
                .unwrap()
        })
        .collect();

    for handle in handles {
        let answers = handle.join().unwrap();
        assert_eq!(answers, vec![Term::integer(7540113804746346429)]);
    }
    assert_eq!(base_calls.load(Ordering::SeqCst), 1);

    // later calls read the tables
    let answers = kb
        .query(&s("fib", vec![Term::integer(30), var(0)]))
        .collect(0)
        .unwrap();
    assert_eq!(answers, vec![Term::integer(1346269)]);
    assert_eq!(base_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tabled_answers_are_copied_per_caller() {
    init();
    // pair(X, Y) has one answer with two unbound variables
    let kb = KnowledgeBase::new();
    kb.add_clause(&s("pair", vec![var(0), var(1)])).unwrap();
    kb.set_tabled(&PredicateKey::new("pair", 2)).unwrap();
    let kb = Arc::new(kb);

    let goal = s(
        ",",
        vec![
            s("pair", vec![var(0), var(1)]),
            s("=", vec![var(0), atom("a")]),
        ],
    );
    let mut first = kb.query(&goal);
    assert!(first.evaluate().unwrap());
    assert_eq!(first.binding(0), Some(atom("a")));

    let mut second = kb.query(&s("pair", vec![var(0), var(1)]));
    assert!(second.evaluate().unwrap());
    assert!(second.binding(0).unwrap().is_variable());
    assert!(second.binding(1).unwrap().is_variable());
}

#[test]
fn test_cut_commits_to_first_clause() {
    init();
    let kb = KnowledgeBase::new();
    kb.add_clause(&rule(atom("p"), vec![atom("!"), atom("fail")]))
        .unwrap();
    kb.add_clause(&rule(atom("p"), vec![atom("true")])).unwrap();
    // the same program without the cut
    kb.add_clause(&rule(atom("q"), vec![atom("fail")])).unwrap();
    kb.add_clause(&rule(atom("q"), vec![atom("true")])).unwrap();
    let kb = Arc::new(kb);

    assert!(!kb.query(&atom("p")).evaluate().unwrap());
    assert!(kb.query(&atom("q")).evaluate().unwrap());
}

#[test]
fn test_rule_between_facts() {
    init();
    let kb = KnowledgeBase::new();
    kb.add_clause(&s("test", vec![atom("a"), atom("b")])).unwrap();
    kb.add_clause(&rule(
        s("test", vec![var(0), var(0)]),
        vec![s("is", vec![var(0), Term::integer(1)])],
    ))
    .unwrap();
    kb.add_clause(&s("test", vec![atom("a"), atom("c")])).unwrap();
    let kb = Arc::new(kb);

    let mut query = kb.query(&s("test", vec![var(0), var(1)]));
    let mut solutions = Vec::new();
    while query.evaluate().unwrap() {
        solutions.push((query.binding(0).unwrap(), query.binding(1).unwrap()));
    }
    assert_eq!(
        solutions,
        vec![
            (atom("a"), atom("b")),
            (Term::integer(1), Term::integer(1)),
            (atom("a"), atom("c")),
        ]
    );
}

#[test]
fn test_deep_recursion_on_large_stack() {
    init();
    // count(0).   count(N) :- N > 0, M is N - 1, count(M).
    let kb = KnowledgeBase::new();
    kb.add_clause(&s("count", vec![Term::integer(0)])).unwrap();
    kb.add_clause(&rule(
        s("count", vec![var(0)]),
        vec![
            s(">", vec![var(0), Term::integer(0)]),
            s("is", vec![var(1), s("-", vec![var(0), Term::integer(1)])]),
            s("count", vec![var(1)]),
        ],
    ))
    .unwrap();
    let kb = Arc::new(kb);

    let handle = thread::Builder::new()
        .name("deep".to_string())
        .stack_size(512 * 1024 * 1024)
        .spawn(move || {
            kb.query(&s("count", vec![Term::integer(20000)]))
                .evaluate()
                .unwrap()
        })
        .unwrap();
    assert!(handle.join().unwrap());
}
