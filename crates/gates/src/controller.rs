//! Per-gate open/closed state machine driven by the gate event bus.
//!
//! Transitions for events whose `gate_id` matches this gate:
//!
//! | event            | effect                                   |
//! |------------------|------------------------------------------|
//! | `access_granted` | open, (re)arm the auto-close timer       |
//! | `access_denied`  | close, cancel the timer                  |
//! | `exit_completed` | close, cancel the timer                  |
//! | `test_broadcast` | none                                     |
//! | any other kind   | none                                     |
//!
//! At most one auto-close timer is pending per gate. Arming a timer bumps the
//! gate's generation; a timer only closes the gate if its generation is still
//! current, so a superseded timer is inert even if it already woke up.
//!
//! The close happens on the timer task. A task woken at the same instant as
//! the deadline sees the gate closed once it has yielded to that task.

use crate::error::{Error, Result};
use common::{EventName, Subscription};
use gate_events::{EventType, GateAccessEvent, GateEventBus};
use metrics::counter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

struct GateState {
    is_open: bool,
    auto_close: Duration,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    active: bool,
}

struct GateShared {
    gate_id: String,
    runtime: Handle,
    state: Mutex<GateState>,
    open_tx: watch::Sender<bool>,
}

impl GateShared {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_event(self: &Arc<Self>, event: &GateAccessEvent) {
        if !event.is_for_gate(&self.gate_id) {
            return;
        }

        match &event.event_type {
            EventType::AccessGranted => self.open(),
            EventType::AccessDenied | EventType::ExitCompleted => {
                self.close(event.event_type.metric_label())
            }
            EventType::TestBroadcast | EventType::Other(_) => {
                debug!("Gate {} ignoring {}", self.gate_id, event.event_type);
            }
        }
    }

    fn open(self: &Arc<Self>) {
        let mut state = self.lock();
        if !state.active {
            return;
        }

        Self::cancel_timer(&mut state);
        let generation = state.generation;
        let deadline = Instant::now() + state.auto_close;
        let gate = Arc::downgrade(self);
        state.timer = Some(self.runtime.spawn(auto_close_after(deadline, gate, generation)));

        self.set_open(&mut state, true, "access_granted");
    }

    fn close(&self, cause: &str) {
        let mut state = self.lock();
        if !state.active {
            return;
        }
        Self::cancel_timer(&mut state);
        self.set_open(&mut state, false, cause);
    }

    fn timer_fired(&self, generation: u64) {
        let mut state = self.lock();
        if !state.active || state.generation != generation {
            return;
        }
        state.timer = None;
        self.set_open(&mut state, false, "auto_close");
    }

    /// Abort the pending timer (if any) and invalidate it.
    fn cancel_timer(state: &mut GateState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
    }

    fn set_open(&self, state: &mut GateState, open: bool, cause: &str) {
        if state.is_open != open {
            info!(
                "Gate {} {} ({})",
                self.gate_id,
                if open { "opened" } else { "closed" },
                cause
            );
            counter!("gate_transitions_total", "gate_id" => self.gate_id.clone(), "to" => if open { "open" } else { "closed" })
                .increment(1);
        }
        state.is_open = open;
        self.open_tx.send_if_modified(|current| {
            if *current == open {
                false
            } else {
                *current = open;
                true
            }
        });
    }
}

async fn auto_close_after(deadline: Instant, gate: Weak<GateShared>, generation: u64) {
    tokio::time::sleep_until(deadline).await;
    if let Some(gate) = gate.upgrade() {
        gate.timer_fired(generation);
    }
}

/// Open/closed state of one gate, derived from the shared event stream.
pub struct GateController {
    shared: Arc<GateShared>,
    subscription: Option<Subscription<GateAccessEvent>>,
}

impl GateController {
    /// Subscribe a controller for `gate_id` to `bus`. Must be called inside a Tokio runtime.
    pub fn activate(
        gate_id: impl Into<String>,
        auto_close: Duration,
        bus: &Arc<GateEventBus>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let gate_id = gate_id.into();
        let (open_tx, _) = watch::channel(false);

        let shared = Arc::new(GateShared {
            gate_id,
            runtime,
            state: Mutex::new(GateState {
                is_open: false,
                auto_close,
                timer: None,
                generation: 0,
                active: true,
            }),
            open_tx,
        });

        let gate = Arc::downgrade(&shared);
        let subscription = bus.subscribe(EventName::GateEvent, move |event: &GateAccessEvent| {
            if let Some(gate) = gate.upgrade() {
                gate.on_event(event);
            }
            Ok(())
        });

        debug!(
            "Gate {} activated (auto-close {:?})",
            shared.gate_id, auto_close
        );

        Ok(Self {
            shared,
            subscription: Some(subscription),
        })
    }

    pub fn gate_id(&self) -> &str {
        &self.shared.gate_id
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_open
    }

    /// Receiver notified whenever the gate opens or closes.
    pub fn watch_open(&self) -> watch::Receiver<bool> {
        self.shared.open_tx.subscribe()
    }

    pub fn auto_close(&self) -> Duration {
        self.shared.lock().auto_close
    }

    /// Change the delay used by timers armed from now on.
    pub fn set_auto_close(&self, delay: Duration) {
        self.shared.lock().auto_close = delay;
    }

    pub fn has_pending_timer(&self) -> bool {
        self.shared
            .lock()
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Unsubscribe from the bus and cancel any pending timer. Idempotent.
    pub fn deactivate(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        subscription.unsubscribe();

        let mut state = self.shared.lock();
        state.active = false;
        GateShared::cancel_timer(&mut state);
        debug!("Gate {} deactivated", self.shared.gate_id);
    }
}

impl Drop for GateController {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EventBus;

    const AUTO_CLOSE: Duration = Duration::from_millis(3000);

    fn event(event_type: EventType, gate_id: &str) -> GateAccessEvent {
        GateAccessEvent {
            event_type,
            gate_id: gate_id.to_string(),
            camera_id: gate_id.to_string(),
            user_id: None,
            access_result: None,
            message: String::new(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            webhook_id: None,
        }
    }

    fn publish(bus: &GateEventBus, event_type: EventType, gate_id: &str) {
        bus.publish(EventName::GateEvent, &event(event_type, gate_id));
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_closed() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();
        assert_eq!(gate.gate_id(), "1");
        assert!(!gate.is_open());
        assert!(!gate.has_pending_timer());
        assert_eq!(bus.listener_count(EventName::GateEvent), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_routes_only_matching_gate() {
        let bus = Arc::new(EventBus::new());
        let gates: Vec<GateController> = ["1", "2", "3"]
            .iter()
            .map(|id| GateController::activate(*id, AUTO_CLOSE, &bus).unwrap())
            .collect();

        publish(&bus, EventType::AccessGranted, "2");
        let open: Vec<bool> = gates.iter().map(GateController::is_open).collect();
        assert_eq!(open, vec![false, true, false]);

        publish(&bus, EventType::AccessGranted, "9");
        let open: Vec<bool> = gates.iter().map(GateController::is_open).collect();
        assert_eq!(open, vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_close() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", Duration::from_millis(2000), &bus).unwrap();

        publish(&bus, EventType::AccessGranted, "1");
        assert!(gate.is_open());
        assert!(gate.has_pending_timer());

        sleep_ms(1999).await;
        assert!(gate.is_open());

        // At exactly the deadline the timer task is woken alongside this one;
        // let it run before observing.
        sleep_ms(1).await;
        tokio::task::yield_now().await;
        assert!(!gate.is_open());
        assert!(!gate.has_pending_timer());

        sleep_ms(1).await;
        assert!(!gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_grant_supersedes_timer() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();

        publish(&bus, EventType::AccessGranted, "1");
        sleep_ms(1000).await;
        publish(&bus, EventType::AccessGranted, "1");

        sleep_ms(2500).await; // t = 3500
        assert!(gate.is_open());

        sleep_ms(499).await; // t = 3999
        assert!(gate.is_open());

        sleep_ms(2).await; // t = 4001
        assert!(!gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_and_exit_close_immediately() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();

        for closing in [EventType::AccessDenied, EventType::ExitCompleted] {
            publish(&bus, EventType::AccessGranted, "1");
            assert!(gate.is_open());

            publish(&bus, closing, "1");
            assert!(!gate.is_open());
            assert!(!gate.has_pending_timer());
        }

        // A cancelled timer never reopens or recloses anything later.
        let mut rx = gate.watch_open();
        rx.borrow_and_update();
        sleep_ms(5000).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_on_closed_gate_is_noop() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();
        let rx = gate.watch_open();

        publish(&bus, EventType::AccessDenied, "1");
        assert!(!gate.is_open());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_is_ignored() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();

        publish(&bus, EventType::TestBroadcast, "1");
        assert!(!gate.is_open());

        publish(&bus, EventType::AccessGranted, "1");
        publish(&bus, EventType::TestBroadcast, "1");
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_event_kind_is_ignored() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();

        publish(&bus, EventType::Other("door_forced".to_string()), "1");
        assert!(!gate.is_open());

        publish(&bus, EventType::AccessGranted, "1");
        publish(&bus, EventType::Other("door_forced".to_string()), "1");
        assert!(gate.is_open());
        assert!(gate.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reports_transitions() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", Duration::from_millis(1000), &bus).unwrap();
        let mut rx = gate.watch_open();

        publish(&bus, EventType::AccessGranted, "1");
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_auto_close_applies_to_next_open() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();
        gate.set_auto_close(Duration::from_millis(1000));
        assert_eq!(gate.auto_close(), Duration::from_millis(1000));

        publish(&bus, EventType::AccessGranted, "1");
        sleep_ms(1001).await;
        assert!(!gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_unsubscribes_and_cancels_timer() {
        let bus = Arc::new(EventBus::new());
        let mut gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();

        publish(&bus, EventType::AccessGranted, "1");
        assert!(gate.has_pending_timer());

        gate.deactivate();
        gate.deactivate();
        assert!(!gate.is_active());
        assert_eq!(bus.listener_count(EventName::GateEvent), 0);
        assert!(!gate.has_pending_timer());

        // Neither the old timer nor new events touch a deactivated gate.
        publish(&bus, EventType::ExitCompleted, "1");
        sleep_ms(5000).await;
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let gate = GateController::activate("1", AUTO_CLOSE, &bus).unwrap();
        let other = GateController::activate("2", AUTO_CLOSE, &bus).unwrap();
        assert_eq!(bus.listener_count(EventName::GateEvent), 2);

        drop(gate);
        assert_eq!(bus.listener_count(EventName::GateEvent), 1);

        publish(&bus, EventType::AccessGranted, "2");
        assert!(other.is_open());
    }

    #[test]
    fn test_activate_outside_runtime_fails() {
        let bus = Arc::new(EventBus::new());
        assert_eq!(
            GateController::activate("1", AUTO_CLOSE, &bus).err(),
            Some(Error::NoRuntime)
        );
    }
}
