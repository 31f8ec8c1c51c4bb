//! Notification channel between the engine and the presentation layer.
//!
//! # Design
//!
//! [`EventBus`] keeps subscriber callbacks as `Weak` references in shared,
//! reference-counted storage (`Rc<RefCell<..>>`). [`EventBus::subscribe`]
//! hands the only strong reference back inside a [`Subscription`] guard;
//! dropping the guard (or calling [`Subscription::unsubscribe`]) detaches
//! the callback. The engine never learns how many listeners exist or what
//! they do.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in registration order.
//! 2. A dropped [`Subscription`] is never invoked again.
//! 3. Dead subscribers are pruned lazily during `emit()`.
//! 4. No borrow is held while callbacks run, so a callback may emit or
//!    subscribe without panicking.

use crate::clock::Clock;
use crate::id::ItemId;
use crate::item::BulkAction;
use crate::source::{Filters, SortOrder};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

type CallbackRc = Rc<dyn Fn(&EventEnvelope)>;
type CallbackWeak = Weak<dyn Fn(&EventEnvelope)>;

/// Named engine notifications with small payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SelectionChanged {
        selected_count: usize,
        /// Ids whose membership changed in this mutation.
        changed: Vec<ItemId>,
    },
    ManageModeEntered,
    ManageModeExited,
    BulkActionInitiated {
        action: BulkAction,
        count: usize,
    },
    BulkActionCompleted {
        action: BulkAction,
        successful: usize,
        failed: usize,
    },
    BulkActionFailed {
        action: BulkAction,
        message: String,
    },
    PageChanged {
        page: usize,
        total_pages: usize,
    },
    FiltersChanged {
        filters: Filters,
    },
    SortChanged {
        sort_by: Option<String>,
        sort_order: SortOrder,
    },
    PageSizeChanged {
        page_size: usize,
    },
}

impl EngineEvent {
    /// Stable event name for logging and routing.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SelectionChanged { .. } => "selection_changed",
            Self::ManageModeEntered => "manage_mode_entered",
            Self::ManageModeExited => "manage_mode_exited",
            Self::BulkActionInitiated { .. } => "bulk_action_initiated",
            Self::BulkActionCompleted { .. } => "bulk_action_completed",
            Self::BulkActionFailed { .. } => "bulk_action_failed",
            Self::PageChanged { .. } => "page_changed",
            Self::FiltersChanged { .. } => "filters_changed",
            Self::SortChanged { .. } => "sort_changed",
            Self::PageSizeChanged { .. } => "page_size_changed",
        }
    }
}

/// An event stamped with the bus clock's time and a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub seq: u64,
    pub at: Duration,
    pub event: EngineEvent,
}

struct BusInner {
    subscribers: Vec<CallbackWeak>,
    next_seq: u64,
}

/// Shared fan-out channel for [`EngineEvent`]s.
///
/// Cloning an `EventBus` creates a new handle to the **same** subscriber
/// list.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
    clock: Rc<dyn Clock>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventBus")
            .field("subscriber_count", &inner.subscribers.len())
            .field("next_seq", &inner.next_seq)
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BusInner {
                subscribers: Vec::new(),
                next_seq: 0,
            })),
            clock,
        }
    }

    /// Register a callback. Keep the returned guard alive for as long as the
    /// callback should fire.
    pub fn subscribe(&self, callback: impl Fn(&EventEnvelope) + 'static) -> Subscription {
        let strong: CallbackRc = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&self, event: EngineEvent) {
        let (callbacks, envelope) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            let callbacks: Vec<CallbackRc> =
                inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            let envelope = EventEnvelope {
                seq: inner.next_seq,
                at: self.clock.now(),
                event,
            };
            inner.next_seq += 1;
            (callbacks, envelope)
        };

        tracing::trace!(
            event = envelope.event.name(),
            seq = envelope.seq,
            listeners = callbacks.len(),
            "emit"
        );
        for cb in &callbacks {
            cb(&envelope);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Total events emitted so far.
    #[must_use]
    pub fn emitted_count(&self) -> u64 {
        self.inner.borrow().next_seq
    }
}

/// RAII guard for a subscriber callback.
pub struct Subscription {
    /// Type-erased strong reference keeping the callback `Rc` alive.
    _guard: Box<dyn std::any::Any>,
}

impl Subscription {
    /// Detach the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;

    fn bus() -> (EventBus, ManualClock) {
        let clock = ManualClock::new();
        (EventBus::new(Rc::new(clock.clone())), clock)
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let (bus, _) = bus();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        let _a = bus.subscribe(move |e| l1.borrow_mut().push(("a", e.seq)));
        let _b = bus.subscribe(move |e| l2.borrow_mut().push(("b", e.seq)));

        bus.emit(EngineEvent::ManageModeEntered);

        assert_eq!(*log.borrow(), vec![("a", 0), ("b", 0)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (bus, _) = bus();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = bus.subscribe(move |_| h.set(h.get() + 1));

        bus.emit(EngineEvent::ManageModeEntered);
        sub.unsubscribe();
        bus.emit(EngineEvent::ManageModeExited);

        assert_eq!(hits.get(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn envelopes_carry_clock_time() {
        let (bus, clock) = bus();
        let seen = Rc::new(Cell::new(Duration::ZERO));
        let s = Rc::clone(&seen);
        let _sub = bus.subscribe(move |e| s.set(e.at));

        clock.advance(Duration::from_millis(250));
        bus.emit(EngineEvent::PageSizeChanged { page_size: 50 });

        assert_eq!(seen.get(), Duration::from_millis(250));
        assert_eq!(bus.emitted_count(), 1);
    }

    #[test]
    fn callback_may_emit_reentrantly() {
        let (bus, _) = bus();
        let inner_bus = bus.clone();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = bus.subscribe(move |e| {
            c.set(c.get() + 1);
            if e.event == EngineEvent::ManageModeEntered {
                inner_bus.emit(EngineEvent::ManageModeExited);
            }
        });

        bus.emit(EngineEvent::ManageModeEntered);

        assert_eq!(count.get(), 2);
    }
}
