//! User predicates: clause storage and dispatch
//!
//! A static predicate collects clauses until its first call, then compiles
//! once (under its `OnceLock`) and is read-only from then on. A dynamic
//! predicate keeps a mutable clause list; every call works on an immutable
//! snapshot taken when the call starts, and mutations drop the snapshot so
//! the next call rebuilds it.

use super::clause::{ClauseEntry, ClauseModel, Clauses};
use super::index::ground_value;
use crate::config::EngineConfig;
use crate::engine::{Fail, InterpretedPredicate, Machine, Predicate, PredicateFactory, Succeed};
use crate::error::{EngineError, Result};
use crate::logic::{PredicateKey, Term};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// How a predicate's clauses are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Defined once, compiled on first call.
    Static,
    /// Modified at runtime through assert and retract.
    Dynamic,
}

struct Pending {
    models: Vec<Arc<ClauseModel>>,
    sealed: bool,
}

/// Dispatch chosen when a static predicate is compiled.
enum Dispatch {
    /// One fact whose arguments are distinct variables.
    SucceedsOnce,
    /// Exactly one eligible column, with a different value in every clause.
    Keyed {
        column: usize,
        clauses: HashMap<Term, Arc<ClauseEntry>>,
    },
    Interpreted,
}

impl Dispatch {
    fn name(&self) -> &'static str {
        match self {
            Dispatch::SucceedsOnce => "succeeds-once",
            Dispatch::Keyed { .. } => "keyed",
            Dispatch::Interpreted => "interpreted",
        }
    }
}

struct Compiled {
    clauses: Arc<Clauses>,
    dispatch: Dispatch,
}

enum ClauseStore {
    Static {
        pending: Mutex<Pending>,
        compiled: OnceLock<Compiled>,
    },
    Dynamic {
        models: RwLock<Vec<Arc<ClauseModel>>>,
        snapshot: RwLock<Option<Arc<Clauses>>>,
    },
}

/// A user-defined predicate.
pub struct UserPredicate {
    key: PredicateKey,
    tabled: AtomicBool,
    store: ClauseStore,
}

impl fmt::Debug for UserPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPredicate")
            .field("key", &self.key)
            .field("storage", &self.storage())
            .field("tabled", &self.is_tabled())
            .finish()
    }
}

impl UserPredicate {
    pub fn new(key: PredicateKey, storage: Storage) -> Self {
        let store = match storage {
            Storage::Static => ClauseStore::Static {
                pending: Mutex::new(Pending {
                    models: Vec::new(),
                    sealed: false,
                }),
                compiled: OnceLock::new(),
            },
            Storage::Dynamic => ClauseStore::Dynamic {
                models: RwLock::new(Vec::new()),
                snapshot: RwLock::new(None),
            },
        };
        UserPredicate {
            key,
            tabled: AtomicBool::new(false),
            store,
        }
    }

    pub fn key(&self) -> &PredicateKey {
        &self.key
    }

    pub fn storage(&self) -> Storage {
        match self.store {
            ClauseStore::Static { .. } => Storage::Static,
            ClauseStore::Dynamic { .. } => Storage::Dynamic,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.storage() == Storage::Dynamic
    }

    pub fn is_tabled(&self) -> bool {
        self.tabled.load(Ordering::Acquire)
    }

    pub fn set_tabled(&self) {
        self.tabled.store(true, Ordering::Release);
    }

    /// Whether a static predicate has been compiled and can no longer change.
    pub fn is_sealed(&self) -> bool {
        match &self.store {
            ClauseStore::Static { compiled, .. } => compiled.get().is_some(),
            ClauseStore::Dynamic { .. } => false,
        }
    }

    /// Add a clause at the front or the back.
    pub fn add(&self, model: Arc<ClauseModel>, front: bool) -> Result<()> {
        match &self.store {
            ClauseStore::Static { pending, .. } => {
                let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
                if pending.sealed {
                    return Err(EngineError::permission("modify static procedure", self.key.clone()));
                }
                insert(&mut pending.models, model, front);
            }
            ClauseStore::Dynamic { models, snapshot } => {
                let count = {
                    let mut models = models.write().unwrap_or_else(PoisonError::into_inner);
                    insert(&mut models, model, front);
                    models.len()
                };
                // never hold the clause list while taking the snapshot lock
                *snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
                log::debug!("{}: {} clauses after update", self.key, count);
            }
        }
        Ok(())
    }

    /// Remove the first clause that is a variant of `model`.
    pub fn retract(&self, model: &ClauseModel) -> Result<bool> {
        let ClauseStore::Dynamic { models, .. } = &self.store else {
            return Err(EngineError::permission("modify static procedure", self.key.clone()));
        };
        let found = models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|existing| &***existing == model)
            .cloned();
        Ok(match found {
            Some(existing) => self.remove_model(&existing),
            None => false,
        })
    }

    /// Remove this exact clause. Returns `false` if it is already gone.
    pub fn remove_model(&self, model: &Arc<ClauseModel>) -> bool {
        let ClauseStore::Dynamic { models, snapshot } = &self.store else {
            return false;
        };
        let position = {
            let mut models = models.write().unwrap_or_else(PoisonError::into_inner);
            let Some(position) = models.iter().position(|m| Arc::ptr_eq(m, model)) else {
                return false;
            };
            models.remove(position);
            position
        };
        *snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        log::debug!("{}: retracted clause {}", self.key, position);
        true
    }

    /// Current clauses of a dynamic predicate; `None` for static ones.
    pub fn dynamic_models(&self) -> Option<Vec<Arc<ClauseModel>>> {
        match &self.store {
            ClauseStore::Dynamic { models, .. } => {
                Some(models.read().unwrap_or_else(PoisonError::into_inner).clone())
            }
            ClauseStore::Static { .. } => None,
        }
    }

    pub fn clause_count(&self) -> usize {
        match &self.store {
            ClauseStore::Static { pending, compiled } => match compiled.get() {
                Some(compiled) => compiled.clauses.len(),
                None => pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .models
                    .len(),
            },
            ClauseStore::Dynamic { models, .. } => {
                models.read().unwrap_or_else(PoisonError::into_inner).len()
            }
        }
    }

    /// The clause list a call starting now sees.
    pub fn clauses(&self, config: &EngineConfig) -> Arc<Clauses> {
        match &self.store {
            ClauseStore::Static { .. } => self.compiled(config).clauses.clone(),
            ClauseStore::Dynamic { .. } => self.snapshot(config),
        }
    }

    fn compiled(&self, config: &EngineConfig) -> &Compiled {
        let ClauseStore::Static { pending, compiled } = &self.store else {
            panic!("{} is not static", self.key);
        };
        compiled.get_or_init(|| {
            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.sealed = true;
            let clauses = Arc::new(Clauses::new(&pending.models, self.key.arity, config));
            let dispatch = if config.specialize_static {
                choose_dispatch(&clauses)
            } else {
                Dispatch::Interpreted
            };
            log::debug!(
                "compiled {}: {} clauses, eligible columns {:?}, {} dispatch",
                self.key,
                clauses.len(),
                clauses.eligible_columns(),
                dispatch.name()
            );
            Compiled { clauses, dispatch }
        })
    }

    fn snapshot(&self, config: &EngineConfig) -> Arc<Clauses> {
        let ClauseStore::Dynamic { models, snapshot } = &self.store else {
            panic!("{} is not dynamic", self.key);
        };
        if let Some(clauses) = snapshot.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return clauses.clone();
        }
        let mut slot = snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(clauses) = slot.as_ref() {
            return clauses.clone();
        }
        let models = models.read().unwrap_or_else(PoisonError::into_inner);
        let clauses = Arc::new(Clauses::new(&models, self.key.arity, config));
        *slot = Some(clauses.clone());
        clauses
    }

    /// Predicate for a call, bypassing the answer table.
    pub fn untabled_predicate(&self, args: &[Term], machine: &mut Machine) -> Result<Box<dyn Predicate>> {
        let kb = machine.kb().clone();
        let tracer = kb.tracer(&self.key);
        let clauses = match &self.store {
            ClauseStore::Static { .. } => {
                let compiled = self.compiled(kb.config());
                if tracer.is_none() {
                    match &compiled.dispatch {
                        Dispatch::SucceedsOnce => return Ok(Box::new(Succeed::default())),
                        Dispatch::Keyed { column, clauses } => {
                            if let Some(value) = ground_value(&args[*column], machine.bindings()) {
                                return Ok(match clauses.get(&value) {
                                    Some(entry) => Box::new(InterpretedPredicate::new(
                                        self.key.clone(),
                                        args.to_vec(),
                                        Arc::from(vec![entry.clone()]),
                                        None,
                                    )),
                                    None => Box::new(Fail),
                                });
                            }
                        }
                        Dispatch::Interpreted => {}
                    }
                }
                compiled.clauses.clone()
            }
            ClauseStore::Dynamic { .. } => self.snapshot(kb.config()),
        };
        let candidates = clauses.candidates(args, machine.bindings());
        if candidates.is_empty() && tracer.is_none() {
            return Ok(Box::new(Fail));
        }
        Ok(Box::new(InterpretedPredicate::new(
            self.key.clone(),
            args.to_vec(),
            candidates,
            tracer,
        )))
    }
}

impl PredicateFactory for UserPredicate {
    fn get_predicate(&self, args: &[Term], machine: &mut Machine) -> Result<Box<dyn Predicate>> {
        if self.is_tabled() {
            let kb = machine.kb().clone();
            return kb.tabling().get_predicate(self, args, machine);
        }
        self.untabled_predicate(args, machine)
    }
}

fn insert(models: &mut Vec<Arc<ClauseModel>>, model: Arc<ClauseModel>, front: bool) {
    if front {
        models.insert(0, model);
    } else {
        models.push(model);
    }
}

fn choose_dispatch(clauses: &Clauses) -> Dispatch {
    if let [only] = &clauses.entries()[..] {
        let head = only.model().head();
        let args = head.args();
        let distinct_vars = args.iter().all(Term::is_variable)
            && (0..args.len()).all(|i| !args[..i].contains(&args[i]));
        if only.model().is_fact() && !args.is_empty() && distinct_vars {
            return Dispatch::SucceedsOnce;
        }
    }
    if let [column] = clauses.eligible_columns() {
        let mut keyed = HashMap::with_capacity(clauses.len());
        for entry in clauses.entries().iter() {
            if keyed.insert(entry.head_arg(*column).clone(), entry.clone()).is_some() {
                return Dispatch::Interpreted;
            }
        }
        if clauses.len() > 1 {
            return Dispatch::Keyed {
                column: *column,
                clauses: keyed,
            };
        }
    }
    Dispatch::Interpreted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(args: Vec<Term>) -> Arc<ClauseModel> {
        Arc::new(ClauseModel::fact(Term::structure("p", args)).unwrap())
    }

    #[test]
    fn test_static_is_sealed_after_compile() {
        let p = UserPredicate::new(PredicateKey::new("p", 1), Storage::Static);
        p.add(fact(vec![Term::atom("a")]), false).unwrap();
        assert!(!p.is_sealed());
        let clauses = p.clauses(&EngineConfig::default());
        assert_eq!(clauses.len(), 1);
        assert!(p.is_sealed());
        let err = p.add(fact(vec![Term::atom("b")]), false).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Permission { .. }));
    }

    #[test]
    fn test_dynamic_snapshot_is_stable() {
        let p = UserPredicate::new(PredicateKey::new("p", 1), Storage::Dynamic);
        let config = EngineConfig::default();
        p.add(fact(vec![Term::atom("a")]), false).unwrap();
        let before = p.clauses(&config);
        p.add(fact(vec![Term::atom("b")]), true).unwrap();
        let after = p.clauses(&config);
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(after.entries()[0].head_arg(0), &Term::atom("b"));
    }

    #[test]
    fn test_retract_by_variant() {
        let p = UserPredicate::new(PredicateKey::new("p", 1), Storage::Dynamic);
        p.add(fact(vec![Term::var(0)]), false).unwrap();
        let variant = ClauseModel::fact(Term::structure("p", vec![Term::var(5)])).unwrap();
        assert!(p.retract(&variant).unwrap());
        assert!(!p.retract(&variant).unwrap());
        assert_eq!(p.clause_count(), 0);
    }

    #[test]
    fn test_dispatch_choice() {
        let config = EngineConfig::default();
        let single = Clauses::new(&[fact(vec![Term::var(0), Term::var(1)])], 2, &config);
        assert_eq!(choose_dispatch(&single).name(), "succeeds-once");

        let repeated = Clauses::new(&[fact(vec![Term::var(0), Term::var(0)])], 2, &config);
        assert_eq!(choose_dispatch(&repeated).name(), "interpreted");

        let keyed = Clauses::new(
            &[fact(vec![Term::atom("a"), Term::var(0)]), fact(vec![Term::atom("b"), Term::var(0)])],
            2,
            &config,
        );
        assert_eq!(choose_dispatch(&keyed).name(), "keyed");

        let duplicate = Clauses::new(
            &[fact(vec![Term::atom("a"), Term::var(0)]), fact(vec![Term::atom("a"), Term::var(0)])],
            2,
            &config,
        );
        assert_eq!(choose_dispatch(&duplicate).name(), "interpreted");
    }

    /// Every solution of `goal` as text with variable names blanked, each
    /// paired with whether the query reported more to come.
    fn run(kb: &Arc<crate::kb::KnowledgeBase>, goal: &Term) -> Vec<(String, bool)> {
        let mut query = kb.query(goal);
        let mut solutions = Vec::new();
        while query.evaluate().unwrap() {
            solutions.push((blank_vars(&query.resolved_goal().to_string()), query.could_reevaluation_succeed()));
        }
        solutions
    }

    fn blank_vars(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '_' && chars.peek() == Some(&'G') {
                chars.next();
                while chars.peek().map_or(false, char::is_ascii_digit) {
                    chars.next();
                }
                out.push('_');
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_specialized_dispatch_matches_interpreted() {
        let build = |specialize_static: bool| {
            let config = EngineConfig {
                specialize_static,
                ..EngineConfig::default()
            };
            let kb = crate::kb::KnowledgeBase::with_config(config);
            // k(a, f(X)). k(b, 2). k(c, g).   one(X, Y).
            let k = |key: &str, value: Term| Term::structure("k", vec![Term::atom(key), value]);
            kb.add_clause(&k("a", Term::structure("f", vec![Term::var(0)]))).unwrap();
            kb.add_clause(&k("b", Term::integer(2))).unwrap();
            kb.add_clause(&k("c", Term::atom("g"))).unwrap();
            kb.add_clause(&Term::structure("one", vec![Term::var(0), Term::var(1)]))
                .unwrap();
            Arc::new(kb)
        };
        let specialized = build(true);
        let interpreted = build(false);

        let k = |key: Term| Term::structure("k", vec![key, Term::var(1)]);
        let goals = [
            k(Term::atom("a")),
            k(Term::atom("b")),
            k(Term::atom("z")),
            k(Term::var(0)),
            Term::structure("one", vec![Term::atom("z"), Term::var(0)]),
        ];
        for goal in goals.iter() {
            assert_eq!(run(&specialized, goal), run(&interpreted, goal), "{}", goal);
        }
        assert_eq!(run(&specialized, &goals[0]), vec![("k(a,f(_))".to_string(), false)]);
        assert!(run(&specialized, &goals[2]).is_empty());
        assert_eq!(run(&specialized, &goals[3]).len(), 3);

        let dispatch_of = |kb: &Arc<crate::kb::KnowledgeBase>, name: &str| {
            let key = PredicateKey::new(name, 2);
            let predicate = kb.user_predicate(&key).unwrap();
            predicate.compiled(kb.config()).dispatch.name()
        };
        assert_eq!(dispatch_of(&specialized, "k"), "keyed");
        assert_eq!(dispatch_of(&specialized, "one"), "succeeds-once");
        assert_eq!(dispatch_of(&interpreted, "k"), "interpreted");
        assert_eq!(dispatch_of(&interpreted, "one"), "interpreted");
    }
}
