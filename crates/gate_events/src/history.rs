//! Bounded log of recent gate events, newest first.

use crate::schema::GateAccessEvent;
use crate::GateEventBus;
use common::{EventName, Subscription};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

type Buffer = Arc<Mutex<VecDeque<GateAccessEvent>>>;

fn lock(buffer: &Buffer) -> MutexGuard<'_, VecDeque<GateAccessEvent>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every event published on `gate_event`, keeping at most `capacity`.
///
/// Unsubscribes from the bus when dropped.
pub struct EventHistory {
    events: Buffer,
    capacity: usize,
    subscription: Subscription<GateAccessEvent>,
}

impl EventHistory {
    /// Start recording. A capacity of zero is raised to one.
    pub fn attach(bus: &Arc<GateEventBus>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let events: Buffer = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));

        let sink = events.clone();
        let subscription = bus.subscribe(EventName::GateEvent, move |event: &GateAccessEvent| {
            let mut events = lock(&sink);
            events.push_front(event.clone());
            events.truncate(capacity);
            Ok(())
        });

        Self {
            events,
            capacity,
            subscription,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the recorded events, newest first.
    pub fn events(&self) -> Vec<GateAccessEvent> {
        lock(&self.events).iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<GateAccessEvent> {
        lock(&self.events).front().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Forget everything recorded so far. Recording continues.
    pub fn clear(&self) {
        let mut events = lock(&self.events);
        debug!("Clearing {} recorded gate events", events.len());
        events.clear();
    }
}

impl Drop for EventHistory {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
