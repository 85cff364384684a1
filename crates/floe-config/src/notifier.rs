use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Reload notifier: a list of callbacks fired when a provider or the stack
/// reloads.
///
/// The callback list is copied under the lock and invoked outside it, so a
/// callback may re-enter the configuration without deadlocking. Each callback
/// is panic-isolated: one misbehaving observer does not stop the others.
#[derive(Default)]
pub struct ReloadNotifier {
    callbacks: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl ReloadNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("notifier lock poisoned")
            .push(Arc::new(callback));
    }

    pub fn notify(&self) {
        let callbacks = self
            .callbacks
            .lock()
            .expect("notifier lock poisoned")
            .clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::warn!("configuration reload callback panicked");
            }
        }
    }
}
