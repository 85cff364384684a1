use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

type Listener = Box<dyn Fn() + Send + Sync>;

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED_TWICE: u8 = 2;

/// Application-level lifecycle events and the stop trigger.
///
/// [`HostApplication::stop`] is idempotent: the first call fires the
/// `on_stopping` listeners and wakes the run loop, later calls are no-ops.
/// Starting successfully never triggers a stop.
#[derive(Default)]
pub struct HostApplication {
    state: AtomicU8,
    stop_token: CancellationToken,
    started_listeners: Mutex<Vec<Listener>>,
    stopping_listeners: Mutex<Vec<Listener>>,
    stopped_listeners: Mutex<Vec<Listener>>,
}

impl HostApplication {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_started(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.started_listeners
            .lock()
            .expect("listener lock poisoned")
            .push(Box::new(listener));
    }

    pub fn on_stopping(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.stopping_listeners
            .lock()
            .expect("listener lock poisoned")
            .push(Box::new(listener));
    }

    pub fn on_stopped(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.stopped_listeners
            .lock()
            .expect("listener lock poisoned")
            .push(Box::new(listener));
    }

    /// Requests application shutdown. The first call wins; it fires the
    /// stopping listeners exactly once.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            fire(&self.stopping_listeners);
            self.stop_token.cancel();
            return;
        }
        let _ = self.state.compare_exchange(
            STOPPING,
            STOPPED_TWICE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn is_stopping(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop_token
    }

    pub(crate) fn emit_started(&self) {
        fire(&self.started_listeners);
    }

    pub(crate) fn emit_stopped(&self) {
        fire(&self.stopped_listeners);
    }
}

fn fire(listeners: &Mutex<Vec<Listener>>) {
    let guard = listeners.lock().expect("listener lock poisoned");
    for listener in guard.iter() {
        if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
            tracing::warn!("application lifecycle listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn stop_fires_stopping_listeners_exactly_once() {
        let app = HostApplication::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        app.on_stopping(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            app.stop();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(app.is_stopping());
        assert!(app.stop_token().is_cancelled());
    }

    #[test]
    fn started_and_stopped_listeners_fire_on_emit() {
        let app = HostApplication::new();
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));

        let s = started.clone();
        app.on_started(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let s = stopped.clone();
        app.on_stopped(move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        app.emit_started();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);

        app.emit_stopped();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let app = HostApplication::new();
        let fired = Arc::new(AtomicUsize::new(0));

        app.on_stopping(|| panic!("listener bug"));
        let f = fired.clone();
        app.on_stopping(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        app.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
