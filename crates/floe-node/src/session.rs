use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use floe_common::Message;

pub(crate) type SessionFn = Box<dyn FnOnce(Message) + Send>;

/// One-shot continuation gate.
///
/// Both the response path and the context watcher hold a clone; whichever
/// fires first consumes the callback, the loser finds it already taken. The
/// `done` token lets the watcher stand down once a real response won.
#[derive(Clone)]
pub(crate) struct SessionCallback {
    cb: Arc<Mutex<Option<SessionFn>>>,
    done: CancellationToken,
}

impl SessionCallback {
    pub fn new(f: SessionFn) -> Self {
        SessionCallback {
            cb: Arc::new(Mutex::new(Some(f))),
            done: CancellationToken::new(),
        }
    }

    /// Runs the continuation with `m` if it has not fired yet.
    pub fn fire(&self, m: Message) {
        let f = self.cb.lock().expect("session lock poisoned").take();
        if let Some(f) = f {
            self.done.cancel();
            f(m);
        }
    }

    pub fn done(&self) -> &CancellationToken {
        &self.done
    }
}

/// Pending remote calls keyed by caller-assigned session id.
///
/// Session id 0 is the post marker and never enters the table; the id
/// counter skips zero and negatives when it wraps.
#[derive(Default)]
pub(crate) struct SessionTable {
    next: AtomicI32,
    pending: Mutex<HashMap<i32, SessionCallback>>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable {
            next: AtomicI32::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_id(&self) -> i32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id > 0 {
                return id;
            }
            // Wrapped past i32::MAX; push the counter back into range.
            let _ = self
                .next
                .compare_exchange(id.wrapping_add(1), 1, Ordering::Relaxed, Ordering::Relaxed);
        }
    }

    pub fn install(&self, id: i32, cb: SessionCallback) {
        debug_assert!(id > 0);
        self.pending
            .lock()
            .expect("session table lock poisoned")
            .insert(id, cb);
    }

    /// Removes and returns the pending callback, if the session is still
    /// waiting. Late responses get `None` and are discarded by the caller.
    pub fn complete(&self, id: i32) -> Option<SessionCallback> {
        self.pending
            .lock()
            .expect("session table lock poisoned")
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .expect("session table lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn callback_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let cb = SessionCallback::new(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        cb.fire(Message::default());
        cb.fire(Message::default());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cb.done().is_cancelled());
    }

    #[test]
    fn complete_removes_entry() {
        let table = SessionTable::new();
        let id = table.next_id();
        table.install(id, SessionCallback::new(Box::new(|_| {})));
        assert_eq!(table.len(), 1);

        assert!(table.complete(id).is_some());
        assert_eq!(table.len(), 0);
        // Late response: nothing left to fire.
        assert!(table.complete(id).is_none());
    }

    #[test]
    fn ids_are_positive_and_distinct() {
        let table = SessionTable::new();
        let a = table.next_id();
        let b = table.next_id();
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }
}
