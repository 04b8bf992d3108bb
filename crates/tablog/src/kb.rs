//! The knowledge base and the query protocol
//!
//! A [`KnowledgeBase`] owns everything a query needs: the builtin table,
//! arithmetic operators, attribute hooks, user predicates, spy points and the
//! answer tables. Registration methods take `&mut self` and are meant for
//! setup; once the knowledge base is shared behind an `Arc`, clauses are
//! still added and removed through `&self`.
//!
//! ```ignore
//! let kb = Arc::new(kb);
//! let mut query = kb.query(&Term::structure("p", vec![Term::var(0)]));
//! while query.evaluate()? {
//!     println!("{}", query.binding(0).unwrap());
//! }
//! ```

use crate::arithmetic::{ArithmeticFn, ArithmeticOperators};
use crate::config::{EngineConfig, UnknownPredicate};
use crate::engine::builtins::{DifHook, DIF_ATTRIBUTE};
use crate::engine::{
    Builtins, Fail, LogTraceListener, Machine, Outcome, Predicate, PredicateFactory,
    TraceListener,
};
use crate::error::{EngineError, Result};
use crate::logic::{AttributeHook, AttributeHooks, Mark, PredicateKey, RenameMap, Term, VarId};
use crate::store::{ClauseModel, Storage, UserPredicate};
use crate::tabling::TablingManager;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Factory for calls to unknown predicates under `UnknownPredicate::Fail`.
struct AlwaysFails;

impl PredicateFactory for AlwaysFails {
    fn get_predicate(&self, _args: &[Term], _machine: &mut Machine) -> Result<Box<dyn Predicate>> {
        Ok(Box::new(Fail))
    }
}

pub struct KnowledgeBase {
    config: EngineConfig,
    builtins: Builtins,
    arithmetic: ArithmeticOperators,
    hooks: AttributeHooks,
    predicates: RwLock<HashMap<PredicateKey, Arc<UserPredicate>>>,
    spied: RwLock<HashSet<PredicateKey>>,
    listener: Arc<dyn TraceListener>,
    tabling: TablingManager,
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicates = self
            .predicates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("KnowledgeBase")
            .field("config", &self.config)
            .field("builtins", &self.builtins)
            .field("predicates", &predicates)
            .field("tabling", &self.tabling)
            .finish()
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Standard builtins, arithmetic and `dif/2`, with trace events going to
    /// the `log` facade.
    pub fn with_config(config: EngineConfig) -> Self {
        let mut hooks = AttributeHooks::new();
        hooks.register(DIF_ATTRIBUTE, Arc::new(DifHook));
        KnowledgeBase {
            config,
            builtins: Builtins::standard(),
            arithmetic: ArithmeticOperators::standard(),
            hooks,
            predicates: RwLock::new(HashMap::new()),
            spied: RwLock::new(HashSet::new()),
            listener: Arc::new(LogTraceListener),
            tabling: TablingManager::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    pub fn register_builtin(&mut self, name: &str, arity: usize, factory: Arc<dyn PredicateFactory>) {
        self.builtins.register(name, arity, factory);
    }

    /// Register a builtin with at most one solution.
    pub fn register_deterministic<F>(&mut self, name: &str, arity: usize, eval: F)
    where
        F: Fn(&[Term], &mut Machine) -> Result<bool> + Send + Sync + 'static,
    {
        self.builtins.register_deterministic(name, arity, eval);
    }

    pub fn register_arithmetic(&mut self, name: &str, arity: usize, function: ArithmeticFn) {
        self.arithmetic.register(name, arity, function);
    }

    pub fn register_attribute_hook(&mut self, name: &str, hook: Arc<dyn AttributeHook>) {
        self.hooks.register(name, hook);
    }

    /// Where trace events of spied predicates go.
    pub fn set_trace_listener(&mut self, listener: Arc<dyn TraceListener>) {
        self.listener = listener;
    }

    // -------------------------------------------------------------------------
    // Clauses
    // -------------------------------------------------------------------------

    /// Add a clause at the end of `key`'s definition.
    ///
    /// The storage kind of a predicate is fixed by its first definition.
    /// Static predicates accept clauses until their first call. A clause
    /// whose head belongs to another predicate is a permission error.
    pub fn define_clause(&self, key: &PredicateKey, model: ClauseModel, storage: Storage) -> Result<()> {
        if &model.key() != key {
            return Err(EngineError::permission("add a foreign clause to", key.clone()));
        }
        if self.builtins.contains(key) {
            return Err(EngineError::permission("modify builtin", key.clone()));
        }
        self.get_or_create(key, storage)?.add(Arc::new(model), false)
    }

    /// Add a clause term (`Head :- Body` or a fact). Predicates without a
    /// definition yet become static.
    pub fn add_clause(&self, clause: &Term) -> Result<()> {
        let model = ClauseModel::from_term(clause)?;
        let key = model.key();
        let storage = self
            .user_predicate(&key)
            .map_or(Storage::Static, |predicate| predicate.storage());
        self.define_clause(&key, model, storage)
    }

    /// Remove the first clause of a dynamic predicate that is a variant of
    /// `model`.
    pub fn retract_clause(&self, key: &PredicateKey, model: &ClauseModel) -> Result<bool> {
        match self.user_predicate(key) {
            Some(predicate) => predicate.retract(model),
            None if self.builtins.contains(key) => {
                Err(EngineError::permission("modify builtin", key.clone()))
            }
            None => Ok(false),
        }
    }

    /// `asserta/1` and `assertz/1`: undefined predicates become dynamic.
    pub fn assert_clause(&self, model: ClauseModel, front: bool) -> Result<()> {
        let key = model.key();
        if self.builtins.contains(&key) {
            return Err(EngineError::permission("modify builtin", key));
        }
        self.get_or_create(&key, Storage::Dynamic)?
            .add(Arc::new(model), front)
    }

    /// Make `key` dynamic. Calls to it fail while it has no clauses.
    pub fn declare_dynamic(&self, key: &PredicateKey) -> Result<()> {
        self.get_or_create(key, Storage::Dynamic).map(|_| ())
    }

    /// Answer calls to `key` from tables. Only static predicates are tabled.
    pub fn set_tabled(&self, key: &PredicateKey) -> Result<()> {
        if self.user_predicate(key).is_some_and(|predicate| predicate.is_dynamic()) {
            return Err(EngineError::tabling(format!("{} is dynamic", key)));
        }
        self.get_or_create(key, Storage::Static)?.set_tabled();
        Ok(())
    }

    pub fn user_predicate(&self, key: &PredicateKey) -> Option<Arc<UserPredicate>> {
        self.predicates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn get_or_create(&self, key: &PredicateKey, storage: Storage) -> Result<Arc<UserPredicate>> {
        let predicate = match self.user_predicate(key) {
            Some(predicate) => predicate,
            None => self
                .predicates
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.clone())
                .or_insert_with(|| {
                    log::debug!("new {:?} predicate {}", storage, key);
                    Arc::new(UserPredicate::new(key.clone(), storage))
                })
                .clone(),
        };
        match (predicate.storage(), storage) {
            (Storage::Static, Storage::Dynamic) => {
                Err(EngineError::permission("modify static procedure", key.clone()))
            }
            (Storage::Dynamic, Storage::Static) => {
                Err(EngineError::permission("statically define dynamic procedure", key.clone()))
            }
            _ => Ok(predicate),
        }
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Factory for calls to `key`: a builtin, a user predicate, or the
    /// unknown-predicate policy.
    pub fn get_predicate_factory(&self, key: &PredicateKey) -> Result<Arc<dyn PredicateFactory>> {
        if let Some(builtin) = self.builtins.get(key) {
            return Ok(builtin.clone());
        }
        if let Some(predicate) = self.user_predicate(key) {
            return Ok(predicate);
        }
        match self.config.unknown_predicate {
            UnknownPredicate::Error => Err(EngineError::existence(key.clone())),
            UnknownPredicate::Fail => Ok(Arc::new(AlwaysFails)),
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn arithmetic(&self) -> &ArithmeticOperators {
        &self.arithmetic
    }

    pub fn attribute_hooks(&self) -> &AttributeHooks {
        &self.hooks
    }

    pub fn tabling(&self) -> &TablingManager {
        &self.tabling
    }

    // -------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------

    pub fn spy(&self, key: &PredicateKey) {
        self.spied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
    }

    pub fn nospy(&self, key: &PredicateKey) {
        self.spied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// The listener for calls to `key`, if they are traced.
    pub fn tracer(&self, key: &PredicateKey) -> Option<Arc<dyn TraceListener>> {
        let traced = self.config.trace_all
            || self
                .spied
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(key);
        traced.then(|| self.listener.clone())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Start a query. Variables of `goal` are numbered by the caller; their
    /// values are read back with [`Query::binding`].
    ///
    /// Each nested call and each conjunct of a clause body adds native stack
    /// frames, so deep recursion (tens of thousands of levels) can overflow
    /// the default 8 MiB thread stack. Run such queries on a thread built with
    /// [`std::thread::Builder::stack_size`].
    pub fn query(self: &Arc<Self>, goal: &Term) -> Query {
        let mut machine = Machine::new(self.clone());
        let mark = machine.mark();
        let mut renames = RenameMap::new();
        let goal = machine.bindings_mut().instantiate(goal, &mut renames);
        Query {
            machine,
            goal,
            renames,
            predicate: None,
            mark,
            exhausted: false,
        }
    }
}

/// A running query: a goal with its own binding store.
///
/// Dropping a query abandons it; nothing it bound is visible elsewhere.
pub struct Query {
    machine: Machine,
    goal: Term,
    renames: RenameMap,
    predicate: Option<Box<dyn Predicate>>,
    mark: Mark,
    exhausted: bool,
}

impl Query {
    /// Find the next solution. `Ok(false)` once there are no more.
    pub fn evaluate(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let result = self.step();
        match result {
            Ok(Outcome::Solved) => Ok(true),
            Ok(Outcome::Failed | Outcome::Cut) => {
                self.finish();
                Ok(false)
            }
            Err(error) => {
                self.finish();
                Err(error)
            }
        }
    }

    fn step(&mut self) -> Result<Outcome> {
        let predicate = match &mut self.predicate {
            Some(predicate) => predicate,
            slot => slot.insert(self.machine.get_predicate(&self.goal)?),
        };
        predicate.evaluate(&mut self.machine)
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.predicate = None;
        self.machine.undo_to(self.mark);
    }

    pub fn could_reevaluation_succeed(&self) -> bool {
        !self.exhausted
            && self
                .predicate
                .as_ref()
                .map_or(true, |predicate| predicate.could_reevaluation_succeed())
    }

    /// Value of goal variable `var` in the current solution, fully resolved.
    /// `None` if the goal has no such variable.
    pub fn binding(&self, var: u32) -> Option<Term> {
        self.renames
            .get(VarId::new(var))
            .map(|term| self.machine.resolve(term))
    }

    /// The goal under the current bindings.
    pub fn resolved_goal(&self) -> Term {
        self.machine.resolve(&self.goal)
    }

    /// Run the query to exhaustion and collect the values of `var`.
    pub fn collect(&mut self, var: u32) -> Result<Vec<Term>> {
        let mut values = Vec::new();
        while self.evaluate()? {
            values.extend(self.binding(var));
            if !self.could_reevaluation_succeed() {
                break;
            }
        }
        Ok(values)
    }
}
