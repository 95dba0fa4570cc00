//! Connection-Change Notifier
//!
//! Subscription registry for observers interested in the link going up or
//! down. Listeners fire synchronously with the state transition, in
//! registration order, and only for transitions into or out of the
//! connected state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Registry of connection-change listeners.
#[derive(Default)]
pub struct ConnectionChangeNotifier {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ConnectionChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Each call yields an independent subscription,
    /// even for reference-identical callbacks.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            notifier: Arc::clone(self),
        }
    }

    /// Deliver a transition to all listeners in registration order.
    ///
    /// A panicking listener is logged and skipped; delivery continues with
    /// the remaining listeners. Delivery runs against a snapshot taken at
    /// the transition, so a listener may subscribe or unsubscribe (itself
    /// included) from inside its callback; such changes take effect on the
    /// next transition.
    pub fn notify(&self, connected: bool) {
        let listeners: Vec<(u64, Listener)> = self
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
                error!("Connection-change listener {} panicked", id);
            }
        }
    }

    fn remove(&self, id: u64) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .retain(|(listener_id, _)| *listener_id != id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

/// Handle returned by [`ConnectionChangeNotifier::subscribe`].
///
/// Calling [`unsubscribe`](Subscription::unsubscribe) more than once is a
/// no-op after the first call.
pub struct Subscription {
    id: u64,
    notifier: Arc<ConnectionChangeNotifier>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.notifier.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: Arc<AtomicUsize>) -> impl Fn(bool) + Send + Sync {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let notifier = Arc::new(ConnectionChangeNotifier::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            notifier.subscribe(move |_| order.lock().unwrap().push(tag));
        }

        notifier.notify(true);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribed_listener_goes_silent() {
        let notifier = Arc::new(ConnectionChangeNotifier::new());
        let kept = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));

        let _keep = notifier.subscribe(counting_listener(Arc::clone(&kept)));
        let sub = notifier.subscribe(counting_listener(Arc::clone(&dropped)));

        notifier.notify(true);
        sub.unsubscribe();
        notifier.notify(false);

        assert_eq!(kept.load(Ordering::SeqCst), 2);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_unsubscribe_is_noop() {
        let notifier = Arc::new(ConnectionChangeNotifier::new());
        let _other = notifier.subscribe(|_| {});
        let sub = notifier.subscribe(|_| {});

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself_during_delivery() {
        let notifier = Arc::new(ConnectionChangeNotifier::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let handle = Arc::clone(&slot);
        let count = Arc::clone(&fired);
        let sub = notifier.subscribe(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            if let Some(own) = handle.lock().unwrap().take() {
                own.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        notifier.notify(true);
        notifier.notify(false);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.len(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_delivery() {
        let notifier = Arc::new(ConnectionChangeNotifier::new());
        let after = Arc::new(AtomicUsize::new(0));

        let _bad = notifier.subscribe(|_| panic!("listener exploded"));
        let _good = notifier.subscribe(counting_listener(Arc::clone(&after)));

        notifier.notify(true);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identical_callbacks_are_distinct_subscriptions() {
        let notifier = Arc::new(ConnectionChangeNotifier::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let _a = notifier.subscribe(counting_listener(Arc::clone(&counter)));
        let _b = notifier.subscribe(counting_listener(Arc::clone(&counter)));

        notifier.notify(true);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
