//! Backend-change notifications for status surfaces.
//!
//! # Invariants
//! - Listeners are called in registration order.
//! - A panicking listener is logged and skipped; the rest still run.

use crate::model::profile::BackendKind;
use log::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

/// Published after every committed switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendChanged {
    pub kind: BackendKind,
    pub profile: String,
    pub message: String,
}

pub trait ChangeListener: Send + Sync {
    fn on_backend_changed(&self, event: &BackendChanged);
}

impl<F> ChangeListener for F
where
    F: Fn(&BackendChanged) + Send + Sync,
{
    fn on_backend_changed(&self, event: &BackendChanged) {
        self(event)
    }
}

#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delivers `event`; returns how many listeners completed without panicking.
    pub fn publish(&self, event: &BackendChanged) -> usize {
        // Listeners run outside the lock.
        let snapshot: Vec<Arc<dyn ChangeListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut completed = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_backend_changed(event))) {
                Ok(()) => completed += 1,
                Err(_) => error!(
                    "event=notify_listener module=service status=error listener_index={index} profile={}",
                    event.profile
                ),
            }
        }
        debug!(
            "event=notify module=service status=ok profile={} listeners={} completed={completed}",
            event.profile,
            snapshot.len()
        );
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendChanged, ChangeNotifier};
    use crate::model::profile::BackendKind;
    use std::sync::{Arc, Mutex};

    fn event() -> BackendChanged {
        BackendChanged {
            kind: BackendKind::Embedded,
            profile: "embedded".to_string(),
            message: "connected".to_string(),
        }
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        notifier.subscribe(Arc::new(move |e: &BackendChanged| {
            first.lock().unwrap().push(format!("first:{}", e.profile))
        }));
        notifier.subscribe(Arc::new(|_: &BackendChanged| panic!("listener failure")));
        let last = Arc::clone(&seen);
        notifier.subscribe(Arc::new(move |e: &BackendChanged| {
            last.lock().unwrap().push(format!("last:{}", e.kind))
        }));

        assert_eq!(notifier.publish(&event()), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:embedded".to_string(), "last:embedded".to_string()]
        );
    }
}
