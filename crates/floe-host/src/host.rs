use std::sync::Arc;
use std::time::Duration;

use floe_common::{Error, ErrorCode, Result};

use crate::application::HostApplication;
use crate::routine::LifecycleRoutine;

const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Assembles lifecycle routines in dependency order.
pub struct HostBuilder {
    routines: Vec<Arc<dyn LifecycleRoutine>>,
    phase_timeout: Duration,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        HostBuilder {
            routines: Vec::new(),
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
        }
    }

    /// Registers a routine. Start phases run in registration order, stop
    /// phases in reverse.
    pub fn add_routine(mut self, routine: Arc<dyn LifecycleRoutine>) -> Self {
        self.routines.push(routine);
        self
    }

    /// Upper bound for each start/stop phase of each routine.
    pub fn phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn build(self) -> Host {
        Host {
            routines: self.routines,
            phase_timeout: self.phase_timeout,
            app: Arc::new(HostApplication::new()),
        }
    }
}

/// The assembled process host.
pub struct Host {
    routines: Vec<Arc<dyn LifecycleRoutine>>,
    phase_timeout: Duration,
    app: Arc<HostApplication>,
}

impl Host {
    pub fn application(&self) -> Arc<HostApplication> {
        self.app.clone()
    }

    /// Runs the full lifecycle:
    ///
    /// 1. `before_start`, `start`, `after_start` on every routine in order;
    ///    then the `on_started` listeners fire. Starting never triggers a
    ///    stop by itself.
    /// 2. Block until SIGINT/SIGTERM/SIGQUIT or [`HostApplication::stop`].
    /// 3. `on_stopping`; `before_stop`, `stop`, `after_stop` in reverse
    ///    order; then `on_stopped`.
    ///
    /// A failed start phase skips the wait, runs no stop phases, and
    /// returns the failure.
    pub async fn run(self) -> Result<()> {
        if let Err(err) = self.start_phases().await {
            tracing::error!(%err, "host start failed");
            self.app.stop();
            return Err(err);
        }
        self.app.emit_started();
        tracing::info!("application started");

        self.wait_for_shutdown().await;
        // Covers the signal path; a no-op when stop() already ran.
        self.app.stop();

        self.stop_phases().await;
        self.app.emit_stopped();
        tracing::info!("application stopped");
        Ok(())
    }

    async fn start_phases(&self) -> Result<()> {
        for routine in &self.routines {
            self.bounded("before_start", routine.before_start()).await??;
        }
        for routine in &self.routines {
            self.bounded("start", routine.start(&self.app)).await??;
        }
        for routine in &self.routines {
            self.bounded("after_start", routine.after_start()).await??;
        }
        Ok(())
    }

    async fn stop_phases(&self) {
        for routine in self.routines.iter().rev() {
            if self.bounded("before_stop", routine.before_stop()).await.is_err() {
                tracing::warn!("before_stop phase timed out");
            }
        }
        for routine in self.routines.iter().rev() {
            if self.bounded("stop", routine.stop()).await.is_err() {
                tracing::warn!("stop phase timed out");
            }
        }
        for routine in self.routines.iter().rev() {
            if self.bounded("after_stop", routine.after_stop()).await.is_err() {
                tracing::warn!("after_stop phase timed out");
            }
        }
    }

    async fn bounded<T>(
        &self,
        phase: &str,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T> {
        tokio::time::timeout(self.phase_timeout, fut)
            .await
            .map_err(|_| {
                Error::with_op(
                    ErrorCode::Timeout,
                    "host.lifecycle",
                    format!("{phase} phase exceeded {:?}", self.phase_timeout),
                )
            })
    }

    async fn wait_for_shutdown(&self) {
        let stop = self.app.stop_token().clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown by SIGINT"),
                _ = term.recv() => tracing::info!("shutdown by SIGTERM"),
                _ = quit.recv() => tracing::info!("shutdown by SIGQUIT"),
                _ = stop.cancelled() => tracing::info!("shutdown requested"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown by signal"),
                _ = stop.cancelled() => tracing::info!("shutdown requested"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl Recorder {
        fn new(name: &'static str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Recorder {
                name,
                events,
                fail_start: false,
            })
        }

        fn failing(name: &'static str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Recorder {
                name,
                events,
                fail_start: true,
            })
        }

        fn record(&self, phase: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}.{}", self.name, phase));
        }
    }

    #[async_trait]
    impl crate::HostedRoutine for Recorder {
        async fn start(&self, _app: &Arc<HostApplication>) -> Result<()> {
            self.record("start");
            if self.fail_start {
                return Err(Error::with_op(
                    ErrorCode::Internal,
                    "test",
                    "start failure",
                ));
            }
            Ok(())
        }

        async fn stop(&self) {
            self.record("stop");
        }
    }

    #[async_trait]
    impl LifecycleRoutine for Recorder {
        async fn before_start(&self) -> Result<()> {
            self.record("before_start");
            Ok(())
        }

        async fn after_start(&self) -> Result<()> {
            self.record("after_start");
            Ok(())
        }

        async fn before_stop(&self) {
            self.record("before_stop");
        }

        async fn after_stop(&self) {
            self.record("after_stop");
        }
    }

    #[tokio::test]
    async fn phases_run_in_order_and_stop_reversed() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let host = HostBuilder::new()
            .add_routine(Recorder::new("a", events.clone()))
            .add_routine(Recorder::new("b", events.clone()))
            .build();

        let app = host.application();
        let run = tokio::spawn(host.run());

        // Give the start phases a moment, then stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.stop();
        run.await.unwrap().unwrap();

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "a.before_start",
                "b.before_start",
                "a.start",
                "b.start",
                "a.after_start",
                "b.after_start",
                "b.before_stop",
                "a.before_stop",
                "b.stop",
                "a.stop",
                "b.after_stop",
                "a.after_stop",
            ]
        );
    }

    #[tokio::test]
    async fn successful_start_does_not_stop_the_application() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let host = HostBuilder::new()
            .add_routine(Recorder::new("a", events.clone()))
            .build();
        let app = host.application();

        let stopping_fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = stopping_fired.clone();
        app.on_stopping(move || {
            f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let run = tokio::spawn(host.run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Still running: start success must not have triggered a stop.
        assert!(!app.is_stopping());
        assert_eq!(stopping_fired.load(std::sync::atomic::Ordering::SeqCst), 0);

        app.stop();
        run.await.unwrap().unwrap();
        assert_eq!(stopping_fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_start_returns_error_and_skips_stop_phases() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let host = HostBuilder::new()
            .add_routine(Recorder::failing("a", events.clone()))
            .add_routine(Recorder::new("b", events.clone()))
            .build();
        let app = host.application();

        let err = host.run().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(app.is_stopping());

        let events = events.lock().unwrap().clone();
        // b's start never ran, and no stop phases ran.
        assert_eq!(
            events,
            vec!["a.before_start", "b.before_start", "a.start"]
        );
    }

    #[tokio::test]
    async fn phase_timeout_fails_start() {
        struct Hanging;

        #[async_trait]
        impl crate::HostedRoutine for Hanging {
            async fn start(&self, _app: &Arc<HostApplication>) -> Result<()> {
                std::future::pending::<()>().await;
                Ok(())
            }

            async fn stop(&self) {}
        }

        #[async_trait]
        impl LifecycleRoutine for Hanging {}

        let host = HostBuilder::new()
            .add_routine(Arc::new(Hanging))
            .phase_timeout(Duration::from_millis(50))
            .build();

        let err = host.run().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }
}
