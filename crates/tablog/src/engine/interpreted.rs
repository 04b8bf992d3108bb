//! Clause-by-clause resolution of a user predicate call.

use super::trace::{TraceEvent, TraceListener, TracePort};
use super::{Machine, Outcome, Predicate};
use crate::error::{EngineError, Result};
use crate::logic::{Mark, PredicateKey, Term};
use crate::store::{ClauseEntry, ClauseOutcome};
use std::sync::Arc;

/// One call of a user predicate, resolved against its candidate clauses in
/// order.
///
/// The candidate list is fixed when the call starts. Each clause is tried
/// from the call's mark; a body that fails is dropped and the next clause
/// tried. A cut re-entered from a body ends the call.
pub struct InterpretedPredicate {
    key: PredicateKey,
    args: Vec<Term>,
    candidates: Arc<[Arc<ClauseEntry>]>,
    next: usize,
    /// Body of the clause that produced the last solution, with its position.
    body: Option<(usize, Box<dyn Predicate>)>,
    mark: Option<Mark>,
    tracer: Option<Arc<dyn TraceListener>>,
    exhausted: bool,
}

impl InterpretedPredicate {
    pub fn new(
        key: PredicateKey,
        args: Vec<Term>,
        candidates: Arc<[Arc<ClauseEntry>]>,
        tracer: Option<Arc<dyn TraceListener>>,
    ) -> Self {
        InterpretedPredicate {
            key,
            args,
            candidates,
            next: 0,
            body: None,
            mark: None,
            tracer,
            exhausted: false,
        }
    }

    fn trace(&self, port: TracePort, machine: &Machine) {
        if let Some(tracer) = self.tracer.as_ref().filter(|tracer| tracer.enabled()) {
            let event = TraceEvent::new(port, self.key.clone(), &self.args, machine.bindings());
            tracer.on_event(&event);
        }
    }

    fn solved(&self, machine: &Machine) -> Result<Outcome> {
        self.trace(TracePort::Exit, machine);
        Ok(Outcome::Solved)
    }

    fn finish(&mut self, machine: &mut Machine, mark: Mark) -> Result<Outcome> {
        self.exhausted = true;
        self.body = None;
        machine.undo_to(mark);
        self.trace(TracePort::Fail, machine);
        Ok(Outcome::Failed)
    }

    fn frame(&self, error: EngineError, clause: usize) -> EngineError {
        error.with_frame(self.key.clone(), clause)
    }
}

impl Predicate for InterpretedPredicate {
    fn evaluate(&mut self, machine: &mut Machine) -> Result<Outcome> {
        if self.exhausted {
            return Ok(Outcome::Failed);
        }
        let mark = match self.mark {
            Some(mark) => {
                self.trace(TracePort::Redo, machine);
                mark
            }
            None => {
                let mark = machine.mark();
                self.mark = Some(mark);
                self.trace(TracePort::Call, machine);
                mark
            }
        };

        loop {
            if let Some((position, body)) = self.body.as_mut() {
                let position = *position;
                match body.evaluate(machine) {
                    Ok(Outcome::Solved) => return self.solved(machine),
                    Ok(Outcome::Failed) => {
                        self.body = None;
                        machine.undo_to(mark);
                    }
                    Ok(Outcome::Cut) => return self.finish(machine, mark),
                    Err(error) => {
                        self.exhausted = true;
                        self.body = None;
                        return Err(self.frame(error, position));
                    }
                }
            }

            let Some(entry) = self.candidates.get(self.next).cloned() else {
                return self.finish(machine, mark);
            };
            self.next += 1;
            machine.undo_to(mark);
            match entry.attempt(&self.args, machine) {
                Ok(ClauseOutcome::Definite(true)) => return self.solved(machine),
                Ok(ClauseOutcome::Definite(false)) => machine.undo_to(mark),
                Ok(ClauseOutcome::Body(body)) => self.body = Some((entry.position(), body)),
                Err(error) => {
                    self.exhausted = true;
                    return Err(self.frame(error, entry.position()));
                }
            }
        }
    }

    fn could_reevaluation_succeed(&self) -> bool {
        !self.exhausted
            && (self.next < self.candidates.len()
                || self
                    .body
                    .as_ref()
                    .map_or(false, |(_, body)| body.could_reevaluation_succeed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::TraceRecorder;
    use crate::error::ErrorKind;
    use crate::kb::KnowledgeBase;
    use crate::store::{ClauseModel, Clauses};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Listener that is switched off and counts what reaches it.
    #[derive(Default)]
    struct Muted {
        asked: AtomicUsize,
        received: AtomicUsize,
    }

    impl TraceListener for Muted {
        fn on_event(&self, _event: &TraceEvent) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        fn enabled(&self) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn candidates(clauses: &[&str]) -> Arc<[Arc<ClauseEntry>]> {
        let models: Vec<Arc<ClauseModel>> = clauses
            .iter()
            .map(|name| Arc::new(ClauseModel::fact(Term::structure("p", vec![Term::atom(name)])).unwrap()))
            .collect();
        Clauses::new(&models, 1, &EngineConfig::default()).entries().clone()
    }

    #[test]
    fn test_solutions_in_clause_order() {
        let kb = Arc::new(KnowledgeBase::new());
        let mut machine = Machine::new(kb);
        let x = machine.bindings_mut().fresh_var();
        let mut p = InterpretedPredicate::new(
            PredicateKey::new("p", 1),
            vec![x.clone()],
            candidates(&["a", "b"]),
            None,
        );

        assert_eq!(p.evaluate(&mut machine).unwrap(), Outcome::Solved);
        assert_eq!(machine.resolve(&x), Term::atom("a"));
        assert!(p.could_reevaluation_succeed());
        assert_eq!(p.evaluate(&mut machine).unwrap(), Outcome::Solved);
        assert_eq!(machine.resolve(&x), Term::atom("b"));
        assert!(!p.could_reevaluation_succeed());
        assert_eq!(p.evaluate(&mut machine).unwrap(), Outcome::Failed);
        assert!(machine.resolve(&x).is_variable());
    }

    #[test]
    fn test_trace_ports() {
        let kb = Arc::new(KnowledgeBase::new());
        let recorder = Arc::new(TraceRecorder::new());
        let mut machine = Machine::new(kb);
        let mut p = InterpretedPredicate::new(
            PredicateKey::new("p", 1),
            vec![Term::atom("b")],
            candidates(&["a", "b"]),
            Some(recorder.clone()),
        );
        assert_eq!(p.evaluate(&mut machine).unwrap(), Outcome::Solved);
        assert_eq!(p.evaluate(&mut machine).unwrap(), Outcome::Failed);

        let ports: Vec<TracePort> = recorder.events().iter().map(|e| e.port).collect();
        assert_eq!(
            ports,
            vec![TracePort::Call, TracePort::Exit, TracePort::Redo, TracePort::Fail]
        );
    }

    #[test]
    fn test_error_records_clause_frame() {
        let kb = KnowledgeBase::new();
        let body = Term::structure("is", vec![Term::var(1), Term::structure("foo", vec![Term::var(0)])]);
        kb.add_clause(&Term::structure(
            ":-",
            vec![Term::structure("q", vec![Term::var(0)]), body],
        ))
        .unwrap();
        let kb = Arc::new(kb);
        let mut query = kb.query(&Term::structure("q", vec![Term::integer(1)]));
        let error = query.evaluate().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Type { expected: "evaluable", .. }));
        assert_eq!(error.frames.len(), 1);
        assert_eq!(error.frames[0].key, PredicateKey::new("q", 1));
        assert_eq!(error.frames[0].clause, 0);
    }

    #[test]
    fn test_disabled_listener_receives_nothing() {
        let muted = Arc::new(Muted::default());
        let mut kb = KnowledgeBase::new();
        kb.set_trace_listener(muted.clone());
        kb.add_clause(&Term::structure("p", vec![Term::atom("a")])).unwrap();
        kb.add_clause(&Term::structure("p", vec![Term::atom("b")])).unwrap();
        kb.spy(&PredicateKey::new("p", 1));
        let kb = Arc::new(kb);

        let answers = kb.query(&Term::structure("p", vec![Term::var(0)])).collect(0).unwrap();
        assert_eq!(answers, vec![Term::atom("a"), Term::atom("b")]);
        assert!(muted.asked.load(Ordering::SeqCst) > 0);
        assert_eq!(muted.received.load(Ordering::SeqCst), 0);
    }
}
