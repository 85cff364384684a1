use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Cancellation scope and optional deadline for one call chain.
///
/// Every RPC flows through one of these: the default parent is the caller
/// service's lifetime context, an explicit override comes in through
/// `Promise::with_context`. Child contexts are cancelled with their parent.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A root context with no deadline.
    pub fn new() -> Self {
        CallContext {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A root context that cancels after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        CallContext {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A child scope: cancelled when the parent cancels, inheriting the
    /// parent deadline.
    pub fn child(&self) -> CallContext {
        CallContext {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// A child scope with its own deadline. The effective deadline is the
    /// earlier of the parent's and `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> CallContext {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(own),
            None => own,
        };
        CallContext {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline; `None` without a deadline, zero when
    /// already past it.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}
