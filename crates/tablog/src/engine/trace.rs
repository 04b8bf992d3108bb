//! Trace events for spied predicates.
//!
//! Interpreted predicates report the four classic ports. Events are only
//! built when a predicate is spied or global tracing is on.

use crate::logic::{Bindings, PredicateKey, Term};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Port of the box model a trace event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TracePort {
    Call,
    Redo,
    Exit,
    Fail,
}

impl fmt::Display for TracePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TracePort::Call => "CALL",
            TracePort::Redo => "REDO",
            TracePort::Exit => "EXIT",
            TracePort::Fail => "FAIL",
        };
        write!(f, "{}", name)
    }
}

/// One trace event. `args` are the call arguments, resolved and printed at
/// the time of the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub port: TracePort,
    pub key: PredicateKey,
    pub args: Vec<String>,
}

impl TraceEvent {
    pub fn new(port: TracePort, key: PredicateKey, args: &[Term], bindings: &Bindings) -> Self {
        TraceEvent {
            port,
            key,
            args: args
                .iter()
                .map(|arg| bindings.resolve(arg).to_string())
                .collect(),
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.port, self.key.name)?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(","))?;
        }
        Ok(())
    }
}

/// Receives trace events. Called on the evaluating thread.
pub trait TraceListener: Send + Sync {
    fn on_event(&self, event: &TraceEvent);

    /// Whether events are wanted at all. Events are not built otherwise.
    fn enabled(&self) -> bool {
        true
    }
}

/// Writes events to the `log` facade at debug level.
#[derive(Debug, Default)]
pub struct LogTraceListener;

impl TraceListener for LogTraceListener {
    fn on_event(&self, event: &TraceEvent) {
        log::debug!(target: "tablog::trace", "{}", event);
    }

    fn enabled(&self) -> bool {
        log::log_enabled!(target: "tablog::trace", log::Level::Debug)
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events as JSON lines.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for event in self.events().iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl TraceListener for TraceRecorder {
    fn on_event(&self, event: &TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display_and_json() {
        let mut bindings = Bindings::new();
        let x = bindings.fresh_var();
        let event = TraceEvent::new(
            TracePort::Call,
            PredicateKey::new("p", 2),
            &[Term::atom("a"), x],
            &bindings,
        );
        assert_eq!(event.to_string(), "CALL p(a,_G0)");

        let recorder = TraceRecorder::new();
        recorder.on_event(&event);
        assert_eq!(
            recorder.to_json_lines().unwrap(),
            "{\"port\":\"CALL\",\"key\":{\"name\":\"p\",\"arity\":2},\"args\":[\"a\",\"_G0\"]}\n"
        );
    }
}
