//! Event dispatcher - routes incoming events to callbacks or the poll
//! queue.
//!
//! Runs as an independent background task ticking at a fixed rate
//! (default 20 Hz). Each tick it first drains the registration queue, so
//! callbacks can be registered from any task without locking the callback
//! table - the table is mutated only inside this loop. It then drains the
//! inbound event queue:
//!
//! - an event whose id has registered callbacks invokes each of them
//!   synchronously, in registration order;
//! - an event nobody claimed is pushed onto the user-facing poll queue
//!   for manual retrieval.
//!
//! A panicking callback is caught and logged; it never stops the
//! dispatch loop. Delivery to callbacks is at-most-once: a failed
//! callback is not retried and its event is not re-queued.
//!
//! Shutdown first drains the inbound queue completely, so no event
//! already delivered by the transport is silently dropped.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default dispatcher polling rate.
pub const DEFAULT_POLL_RATE_HZ: u32 = 20;

/// Callback invoked with the payload of a subscribed event.
pub type EventCallback = Box<dyn Fn(&Value) + Send>;

/// Poll queue of events that no registered callback claimed.
///
/// Cheaply cloneable handle; entries are kept in arrival order and
/// survive session close.
#[derive(Clone, Default)]
pub struct PolledEvents {
    queue: Arc<Mutex<VecDeque<(String, Value)>>>,
}

impl PolledEvents {
    /// Pop the oldest unclaimed event, if any.
    pub fn next(&self) -> Option<(String, Value)> {
        self.queue.lock().expect("poll queue poisoned").pop_front()
    }

    /// Number of unclaimed events waiting.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("poll queue poisoned").len()
    }

    /// Check if any unclaimed event is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, id: String, payload: Value) {
        self.queue
            .lock()
            .expect("poll queue poisoned")
            .push_back((id, payload));
    }
}

/// Handle to the running dispatcher task.
pub struct DispatcherHandle {
    registrations: mpsc::UnboundedSender<(String, EventCallback)>,
    polled: PolledEvents,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Register a callback for an event id.
    ///
    /// The registration takes effect at the dispatcher's next tick; it is
    /// not retroactive for events already routed to the poll queue.
    pub fn register(&self, event_id: String, callback: EventCallback) {
        if self.registrations.send((event_id, callback)).is_err() {
            tracing::warn!("dispatcher is gone; callback registration dropped");
        }
    }

    /// Get a handle on the poll queue.
    pub fn polled(&self) -> PolledEvents {
        self.polled.clone()
    }

    /// Drain the pending events, then stop the dispatcher task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Spawn the dispatcher task over the transport's inbound event queue.
pub fn spawn_dispatcher(
    events: mpsc::UnboundedReceiver<(String, Value)>,
    tick: Duration,
) -> DispatcherHandle {
    let (registration_tx, registration_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let polled = PolledEvents::default();

    let task = tokio::spawn(dispatch_loop(
        events,
        registration_rx,
        polled.clone(),
        shutdown_rx,
        tick,
    ));

    DispatcherHandle {
        registrations: registration_tx,
        polled,
        shutdown: shutdown_tx,
        task,
    }
}

/// Main dispatch loop.
async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<(String, Value)>,
    mut registrations: mpsc::UnboundedReceiver<(String, EventCallback)>,
    polled: PolledEvents,
    mut shutdown_rx: oneshot::Receiver<()>,
    tick: Duration,
) {
    let mut callbacks: HashMap<String, Vec<EventCallback>> = HashMap::new();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                drain_registrations(&mut registrations, &mut callbacks);
                drain_events(&mut events, &callbacks, &polled);
            }
            _ = &mut shutdown_rx => {
                // Final drain: handle everything already delivered before
                // stopping.
                drain_registrations(&mut registrations, &mut callbacks);
                drain_events(&mut events, &callbacks, &polled);
                tracing::debug!("event dispatcher stopped");
                return;
            }
        }
    }
}

/// Absorb newly registered callbacks into the table.
fn drain_registrations(
    registrations: &mut mpsc::UnboundedReceiver<(String, EventCallback)>,
    callbacks: &mut HashMap<String, Vec<EventCallback>>,
) {
    while let Ok((id, callback)) = registrations.try_recv() {
        callbacks.entry(id).or_default().push(callback);
    }
}

/// Route every pending event to its callbacks or the poll queue.
fn drain_events(
    events: &mut mpsc::UnboundedReceiver<(String, Value)>,
    callbacks: &HashMap<String, Vec<EventCallback>>,
    polled: &PolledEvents,
) {
    while let Ok((id, payload)) = events.try_recv() {
        match callbacks.get(&id) {
            Some(list) if !list.is_empty() => {
                for callback in list {
                    if catch_unwind(AssertUnwindSafe(|| callback(&payload))).is_err() {
                        tracing::error!(event = %id, "event callback panicked");
                    }
                }
            }
            _ => polled.push(id, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick() -> Duration {
        Duration::from_millis(5)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_callback_invoked_for_registered_event() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(event_rx, tick());

        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        dispatcher.register(
            "evt_1".to_string(),
            Box::new(move |payload| {
                seen_tx.send(payload.clone()).unwrap();
            }),
        );
        settle().await;

        event_tx.send(("evt_1".to_string(), json!(["alfred"]))).unwrap();
        settle().await;

        assert_eq!(seen_rx.try_recv().unwrap(), json!(["alfred"]));
        assert!(dispatcher.polled().is_empty());
    }

    #[tokio::test]
    async fn test_unclaimed_event_goes_to_poll_queue() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(event_rx, tick());

        event_tx.send(("evt_9".to_string(), json!(42))).unwrap();
        settle().await;

        let polled = dispatcher.polled();
        assert_eq!(polled.next(), Some(("evt_9".to_string(), json!(42))));
        assert!(polled.is_empty());
    }

    #[tokio::test]
    async fn test_registration_is_not_retroactive() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(event_rx, tick());

        // Arrives before any registration: lands on the poll queue.
        event_tx.send(("evt_1".to_string(), json!(1))).unwrap();
        settle().await;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        dispatcher.register(
            "evt_1".to_string(),
            Box::new(move |_| {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        settle().await;

        // Subsequent events do reach the callback.
        event_tx.send(("evt_1".to_string(), json!(2))).unwrap();
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            dispatcher.polled().next(),
            Some(("evt_1".to_string(), json!(1)))
        );
    }

    #[tokio::test]
    async fn test_callbacks_invoked_in_registration_order() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(event_rx, tick());

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            dispatcher.register(
                "evt_1".to_string(),
                Box::new(move |_| order.lock().unwrap().push(tag)),
            );
        }
        settle().await;

        event_tx.send(("evt_1".to_string(), json!(null))).unwrap();
        settle().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_dispatch() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(event_rx, tick());

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        dispatcher.register(
            "evt_bad".to_string(),
            Box::new(|_| panic!("callback failure")),
        );
        dispatcher.register(
            "evt_good".to_string(),
            Box::new(move |_| {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        settle().await;

        event_tx.send(("evt_bad".to_string(), json!(null))).unwrap();
        event_tx.send(("evt_good".to_string(), json!(null))).unwrap();
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_events() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // Slow tick: the drain must happen because of shutdown, not luck.
        let dispatcher = spawn_dispatcher(event_rx, Duration::from_secs(3600));

        for i in 1..=3 {
            event_tx.send((format!("evt_{}", i), json!(i))).unwrap();
        }

        let polled = dispatcher.polled();
        dispatcher.shutdown().await;

        assert_eq!(polled.len(), 3);
        assert_eq!(polled.next(), Some(("evt_1".to_string(), json!(1))));
        assert_eq!(polled.next(), Some(("evt_2".to_string(), json!(2))));
        assert_eq!(polled.next(), Some(("evt_3".to_string(), json!(3))));
    }
}
