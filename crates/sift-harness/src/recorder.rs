#![forbid(unsafe_code)]

//! Event capture for scenario tests.

use serde_json::json;
use sift_core::{EngineEvent, EventBus, EventEnvelope, Subscription};
use std::cell::RefCell;
use std::rc::Rc;

/// Records every event emitted on a bus while it is alive.
pub struct EventRecorder {
    seen: Rc<RefCell<Vec<EventEnvelope>>>,
    _subscription: Subscription,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let subscription = bus.subscribe(move |envelope| sink.borrow_mut().push(envelope.clone()));
        Self {
            seen,
            _subscription: subscription,
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.seen.borrow().iter().map(|e| e.event.clone()).collect()
    }

    /// Event names in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.seen.borrow().iter().map(|e| e.event.name()).collect()
    }

    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.seen
            .borrow()
            .iter()
            .filter(|e| e.event.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }

    /// One JSON object per event: `{"seq", "at_ms", "event"}`.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for envelope in self.seen.borrow().iter() {
            let line = json!({
                "seq": envelope.seq,
                "at_ms": envelope.at.as_millis() as u64,
                "event": envelope.event.name(),
            });
            out.push_str(&line.to_string());
            out.push('\n');
        }
        out
    }
}
