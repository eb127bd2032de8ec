//! In-process publish/subscribe registry keyed by channel name.
//!
//! Delivery is synchronous: `publish` invokes every subscriber of the channel
//! on the caller's task, in registration order, before returning.
//!
//! ## Snapshot semantics
//!
//! `publish` copies the subscriber list before invoking anyone and releases the
//! registry lock while callbacks run. Consequently:
//! - a subscriber added during a publish is not invoked by that publish,
//! - a subscriber removed during a publish is still invoked by that publish if
//!   it was part of the snapshot,
//! - callbacks may freely call `publish`, `subscribe` or `unsubscribe`.
//!
//! ## Failure isolation
//!
//! A callback that returns `Err` or panics is logged and counted; the remaining
//! subscribers are still invoked and nothing reaches the publisher.

use metrics::counter;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, error};

/// Named bus channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventName {
    /// Carries every normalized gate access event.
    GateEvent,
}

impl EventName {
    /// Wire name of the channel.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventName::GateEvent => "gate_event",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a single registration.
pub type SubscriberId = u64;

type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

struct Listener<T> {
    id: SubscriberId,
    callback: Callback<T>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Channel-keyed event bus. Construct one per process (or per test) and share it by `Arc`.
pub struct EventBus<T> {
    listeners: RwLock<BTreeMap<EventName, Vec<Listener<T>>>>,
    next_id: AtomicU64,
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventBus<T> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` on `channel`.
    ///
    /// The returned [`Subscription`] removes exactly this registration.
    pub fn subscribe<F>(self: &Arc<Self>, channel: EventName, callback: F) -> Subscription<T>
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel)
            .or_default()
            .push(Listener {
                id,
                callback: Arc::new(callback),
            });

        debug!("Subscriber {} registered on '{}'", id, channel);

        Subscription {
            bus: Arc::downgrade(self),
            channel,
            id,
        }
    }

    /// Remove a registration. No-op if it is already gone.
    ///
    /// Returns true if a subscriber was removed.
    pub fn unsubscribe(&self, channel: EventName, id: SubscriberId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(channel_listeners) = listeners.get_mut(&channel) else {
            return false;
        };

        let before = channel_listeners.len();
        channel_listeners.retain(|l| l.id != id);
        let removed = channel_listeners.len() != before;

        if channel_listeners.is_empty() {
            listeners.remove(&channel);
        }

        if removed {
            debug!("Subscriber {} removed from '{}'", id, channel);
        }
        removed
    }

    /// Deliver `event` to every current subscriber of `channel`.
    ///
    /// Returns the number of subscribers invoked, including ones that failed.
    pub fn publish(&self, channel: EventName, event: &T) -> usize {
        let snapshot: Vec<Listener<T>> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            match listeners.get(&channel) {
                Some(l) => l.clone(),
                None => return 0,
            }
        };

        for listener in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| (listener.callback)(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        "Error in event listener {} for '{}': {:?}",
                        listener.id, channel, e
                    );
                    counter!("gate_bus_subscriber_failures_total", "channel" => channel.as_str())
                        .increment(1);
                }
                Err(_) => {
                    error!("Event listener {} for '{}' panicked", listener.id, channel);
                    counter!("gate_bus_subscriber_failures_total", "channel" => channel.as_str())
                        .increment(1);
                }
            }
        }

        snapshot.len()
    }

    /// Remove every listener of `channel`, or of all channels when `None`.
    pub fn remove_all_listeners(&self, channel: Option<EventName>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        match channel {
            Some(channel) => {
                listeners.remove(&channel);
            }
            None => listeners.clear(),
        }
    }

    /// Number of listeners registered on `channel`.
    pub fn listener_count(&self, channel: EventName) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Channels that currently have at least one listener.
    pub fn event_names(&self) -> Vec<EventName> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn has_listeners(&self, channel: EventName) -> bool {
        self.listener_count(channel) > 0
    }
}

/// Capability to remove one registration from an [`EventBus`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "dropping a Subscription leaves the callback registered with no way to remove it"]
pub struct Subscription<T> {
    bus: Weak<EventBus<T>>,
    channel: EventName,
    id: SubscriberId,
}

impl<T: 'static> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn channel(&self) -> EventName {
        self.channel
    }

    /// Deregister this callback. Idempotent, and a no-op once the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.unsubscribe(self.channel, self.id),
            None => false,
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<EventBus<String>>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(EventBus::new()))
    }

    #[test]
    fn test_publish_in_registration_order() {
        let (log, bus) = recorder();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            let _sub = bus.subscribe(EventName::GateEvent, move |e: &String| {
                log.lock().unwrap().push(format!("{}:{}", name, e));
                Ok(())
            });
        }

        let invoked = bus.publish(EventName::GateEvent, &"x".to_string());
        assert_eq!(invoked, 3);
        assert_eq!(*log.lock().unwrap(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus: Arc<EventBus<String>> = Arc::new(EventBus::new());
        assert_eq!(bus.publish(EventName::GateEvent, &"x".to_string()), 0);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_later_ones() {
        let (log, bus) = recorder();
        let _bad = bus.subscribe(EventName::GateEvent, |_: &String| {
            Err(anyhow::anyhow!("consumer exploded"))
        });
        let _panics = bus.subscribe(EventName::GateEvent, |_: &String| -> anyhow::Result<()> {
            panic!("consumer panicked")
        });
        let log2 = log.clone();
        let _good = bus.subscribe(EventName::GateEvent, move |e: &String| {
            log2.lock().unwrap().push(e.clone());
            Ok(())
        });

        let invoked = bus.publish(EventName::GateEvent, &"ping".to_string());
        assert_eq!(invoked, 3);
        assert_eq!(*log.lock().unwrap(), vec!["ping"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_prunes_channel() {
        let bus: Arc<EventBus<String>> = Arc::new(EventBus::new());
        let sub = bus.subscribe(EventName::GateEvent, |_: &String| Ok(()));
        assert!(bus.has_listeners(EventName::GateEvent));
        assert_eq!(bus.event_names(), vec![EventName::GateEvent]);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!bus.unsubscribe(EventName::GateEvent, sub.id()));
        assert_eq!(bus.listener_count(EventName::GateEvent), 0);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn test_unsubscribe_removes_only_its_own_callback() {
        let (log, bus) = recorder();
        let log1 = log.clone();
        let first = bus.subscribe(EventName::GateEvent, move |_: &String| {
            log1.lock().unwrap().push("first".into());
            Ok(())
        });
        let log2 = log.clone();
        let _second = bus.subscribe(EventName::GateEvent, move |_: &String| {
            log2.lock().unwrap().push("second".into());
            Ok(())
        });

        first.unsubscribe();
        bus.publish(EventName::GateEvent, &String::new());
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_subscribe_during_publish_uses_snapshot() {
        let (log, bus) = recorder();
        let inner_bus = Arc::downgrade(&bus);
        let log1 = log.clone();
        let _outer = bus.subscribe(EventName::GateEvent, move |e: &String| {
            log1.lock().unwrap().push(format!("outer:{}", e));
            if let Some(bus) = inner_bus.upgrade() {
                let log = log1.clone();
                let _late = bus.subscribe(EventName::GateEvent, move |e: &String| {
                    log.lock().unwrap().push(format!("late:{}", e));
                    Ok(())
                });
            }
            Ok(())
        });

        assert_eq!(bus.publish(EventName::GateEvent, &"1".to_string()), 1);
        assert_eq!(*log.lock().unwrap(), vec!["outer:1"]);

        // The late subscriber is live for the next publish.
        assert_eq!(bus.publish(EventName::GateEvent, &"2".to_string()), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:1", "outer:2", "late:2"]
        );
    }

    #[test]
    fn test_unsubscribe_during_publish_keeps_snapshot() {
        let (log, bus) = recorder();
        let second_id = Arc::new(AtomicU64::new(0));

        let weak = Arc::downgrade(&bus);
        let id_ref = second_id.clone();
        let _first = bus.subscribe(EventName::GateEvent, move |_: &String| {
            if let Some(bus) = weak.upgrade() {
                bus.unsubscribe(EventName::GateEvent, id_ref.load(Ordering::SeqCst));
            }
            Ok(())
        });
        let log2 = log.clone();
        let second = bus.subscribe(EventName::GateEvent, move |e: &String| {
            log2.lock().unwrap().push(e.clone());
            Ok(())
        });
        second_id.store(second.id(), Ordering::SeqCst);

        assert_eq!(bus.publish(EventName::GateEvent, &"a".to_string()), 2);
        assert_eq!(bus.publish(EventName::GateEvent, &"b".to_string()), 1);
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_publish_from_inside_callback() {
        let (log, bus) = recorder();
        let weak = Arc::downgrade(&bus);
        let log1 = log.clone();
        let _sub = bus.subscribe(EventName::GateEvent, move |e: &String| {
            log1.lock().unwrap().push(e.clone());
            if e == "outer" {
                if let Some(bus) = weak.upgrade() {
                    bus.publish(EventName::GateEvent, &"inner".to_string());
                }
            }
            Ok(())
        });

        bus.publish(EventName::GateEvent, &"outer".to_string());
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_remove_all_listeners() {
        let bus: Arc<EventBus<String>> = Arc::new(EventBus::new());
        let _a = bus.subscribe(EventName::GateEvent, |_: &String| Ok(()));
        let _b = bus.subscribe(EventName::GateEvent, |_: &String| Ok(()));
        assert_eq!(bus.listener_count(EventName::GateEvent), 2);

        bus.remove_all_listeners(Some(EventName::GateEvent));
        assert!(!bus.has_listeners(EventName::GateEvent));

        let _c = bus.subscribe(EventName::GateEvent, |_: &String| Ok(()));
        bus.remove_all_listeners(None);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn test_subscription_outliving_bus() {
        let bus: Arc<EventBus<String>> = Arc::new(EventBus::new());
        let sub = bus.subscribe(EventName::GateEvent, |_: &String| Ok(()));
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(EventName::GateEvent.as_str(), "gate_event");
        assert_eq!(EventName::GateEvent.to_string(), "gate_event");
    }
}
