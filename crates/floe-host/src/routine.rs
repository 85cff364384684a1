use std::sync::Arc;

use async_trait::async_trait;

use floe_common::Result;

use crate::application::HostApplication;

/// Something the host starts and stops with the process.
#[async_trait]
pub trait HostedRoutine: Send + Sync {
    /// Brings the routine up. An error here stops the application.
    async fn start(&self, app: &Arc<HostApplication>) -> Result<()>;

    async fn stop(&self);
}

/// A hosted routine with hooks around the main start/stop transitions.
///
/// Start phases run `before_start`, `start`, `after_start` across all
/// routines in registration order; stop phases run `before_stop`, `stop`,
/// `after_stop` in reverse order. Every phase is bounded by the host's
/// phase timeout.
#[async_trait]
pub trait LifecycleRoutine: HostedRoutine {
    async fn before_start(&self) -> Result<()> {
        Ok(())
    }

    async fn after_start(&self) -> Result<()> {
        Ok(())
    }

    async fn before_stop(&self) {}

    async fn after_stop(&self) {}
}
