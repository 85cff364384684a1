//! In-process RPC: echo, posts, FIFO ordering, errors, panics, timeouts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use floe_common::{Error, ErrorCode};
use floe_node::{
    CallContext, MethodTable, Node, NodeElement, NodeOptions, RegisterOptions, RpcContext,
    Service, ServiceRegistry,
};

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[derive(Default, Clone)]
struct EchoState {
    bumps: Arc<Mutex<Vec<u32>>>,
    held: Arc<Mutex<Vec<RpcContext>>>,
}

struct Echo {
    state: EchoState,
}

impl Service for Echo {
    fn methods(table: &mut MethodTable<Self>) {
        table.register("Echo", |_svc: &mut Echo, ctx: RpcContext, (msg,): (String,)| {
            ctx.return_args((msg,));
        });
        table.register("Bump", |svc: &mut Echo, _ctx: RpcContext, (n,): (u32,)| {
            svc.state.bumps.lock().unwrap().push(n);
        });
        table.register("Fail", |_svc: &mut Echo, ctx: RpcContext, (): ()| {
            ctx.error(Error::with_op(
                ErrorCode::InvalidArgument,
                "echo.fail",
                "requested failure",
            ));
        });
        table.register("Boom", |_svc: &mut Echo, _ctx: RpcContext, (): ()| {
            panic!("handler bug");
        });
        // Never replies; the caller's deadline is the only way out.
        table.register("Hold", |svc: &mut Echo, ctx: RpcContext, (): ()| {
            svc.state.held.lock().unwrap().push(ctx);
        });
    }
}

#[derive(Default, Clone)]
struct Probe {
    got: Arc<Mutex<Option<String>>>,
    errors: Arc<Mutex<Vec<ErrorCode>>>,
    finals: Arc<AtomicUsize>,
}

struct Caller {
    probe: Probe,
}

impl Service for Caller {}

async fn start_node() -> (Node, EchoState, Probe) {
    let (node, state, probe, _metrics) = start_node_with_metrics().await;
    (node, state, probe)
}

async fn start_node_with_metrics() -> (Node, EchoState, Probe, floe_metrics::MemoryCollector) {
    let echo_state = EchoState::default();
    let probe = Probe::default();
    let metrics = floe_metrics::MemoryCollector::new();

    let mut registry = ServiceRegistry::new();
    {
        let state = echo_state.clone();
        registry.register::<Echo, _>("Echo", move || Echo {
            state: state.clone(),
        });
    }
    {
        let probe = probe.clone();
        registry.register::<Caller, _>("Caller", move || Caller {
            probe: probe.clone(),
        });
    }

    let options = NodeOptions::new("test", "127.0.0.1").element(
        "test",
        NodeElement {
            services: registry.service_names(),
            ..Default::default()
        },
    );
    let node = Node::new(
        options,
        RegisterOptions::new(registry.into_registrations())
            .with_metrics(std::sync::Arc::new(metrics.clone())),
    )
    .unwrap();
    node.start().await.unwrap();
    (node, echo_state, probe, metrics)
}

#[tokio::test]
async fn local_echo_round_trip() {
    let (node, _state, probe) = start_node().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("Echo", ("hi",))
            .then(|svc, (reply,): (String,)| {
                *svc.probe.got.lock().unwrap() = Some(reply);
            })
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .finally(|svc| {
                svc.probe.finals.fetch_add(1, Ordering::SeqCst);
            })
            .done();
    });

    assert!(
        wait_until(
            || probe.got.lock().unwrap().as_deref() == Some("hi"),
            Duration::from_secs(2)
        )
        .await
    );
    assert!(
        wait_until(
            || probe.finals.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        )
        .await,
        "finally must run after then"
    );
    assert!(probe.errors.lock().unwrap().is_empty());
    assert_eq!(node.pending_sessions(), 0);

    node.stop().await;
}

#[tokio::test]
async fn posts_preserve_fifo_order() {
    let (node, state, _probe) = start_node().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        for n in 0..50u32 {
            proxy.post("Bump", (n,));
        }
    });

    assert!(
        wait_until(
            || state.bumps.lock().unwrap().len() == 50,
            Duration::from_secs(2)
        )
        .await
    );
    let bumps = state.bumps.lock().unwrap().clone();
    assert_eq!(bumps, (0..50).collect::<Vec<_>>());

    node.stop().await;
}

#[tokio::test]
async fn handler_error_reaches_catch_with_code() {
    let (node, _state, probe, metrics) = start_node_with_metrics().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("Fail", ())
            .then(|svc, (): ()| {
                *svc.probe.got.lock().unwrap() = Some("unexpected".into());
            })
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .finally(|svc| {
                svc.probe.finals.fetch_add(1, Ordering::SeqCst);
            })
            .done();
    });

    assert!(
        wait_until(
            || !probe.errors.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(probe.errors.lock().unwrap()[0], ErrorCode::InvalidArgument);
    assert!(probe.got.lock().unwrap().is_none());
    assert!(
        wait_until(
            || probe.finals.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        )
        .await
    );

    // Handler errors count per service through the metric collector.
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.counters.get("[ServiceError] Echo"), Some(&1));

    node.stop().await;
}

#[tokio::test]
async fn unknown_method_is_invalid_argument() {
    let (node, _state, probe) = start_node().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("NoSuchMethod", ())
            .then(|_svc, (): ()| {})
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .done();
    });

    assert!(
        wait_until(
            || !probe.errors.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(probe.errors.lock().unwrap()[0], ErrorCode::InvalidArgument);

    node.stop().await;
}

#[tokio::test]
async fn empty_function_name_is_invalid_argument() {
    let (node, _state, probe) = start_node().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("", ())
            .then(|_svc, (): ()| {})
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .done();
    });

    assert!(
        wait_until(
            || !probe.errors.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(probe.errors.lock().unwrap()[0], ErrorCode::InvalidArgument);

    node.stop().await;
}

#[tokio::test]
async fn handler_panic_returns_internal_and_service_survives() {
    let (node, _state, probe) = start_node().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("Boom", ())
            .then(|_svc, (): ()| {})
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .done();
    });

    assert!(
        wait_until(
            || !probe.errors.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(probe.errors.lock().unwrap()[0], ErrorCode::Internal);

    // The service must still answer after the panic.
    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("Echo", ("alive",))
            .then(|svc, (reply,): (String,)| {
                *svc.probe.got.lock().unwrap() = Some(reply);
            })
            .done();
    });

    assert!(
        wait_until(
            || probe.got.lock().unwrap().as_deref() == Some("alive"),
            Duration::from_secs(2)
        )
        .await
    );

    node.stop().await;
}

#[tokio::test]
async fn explicit_deadline_times_out() {
    let (node, _state, probe) = start_node().await;

    let started = std::time::Instant::now();
    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("Hold", ())
            .then(|_svc, (): ()| {})
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .finally(|svc| {
                svc.probe.finals.fetch_add(1, Ordering::SeqCst);
            })
            .with_context(CallContext::with_timeout(Duration::from_millis(150)))
            .done();
    });

    assert!(
        wait_until(
            || !probe.errors.lock().unwrap().is_empty(),
            Duration::from_secs(3)
        )
        .await
    );
    assert_eq!(probe.errors.lock().unwrap()[0], ErrorCode::Timeout);
    assert!(
        wait_until(
            || probe.finals.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(started.elapsed() < Duration::from_secs(4));

    node.stop().await;
}

#[tokio::test]
async fn context_cancellation_beats_deadline() {
    let (node, _state, probe) = start_node().await;

    let call_ctx = CallContext::new();
    let handle = call_ctx.clone();

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", move |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Echo");
        proxy
            .call::<Caller>("Hold", ())
            .then(|_svc, (): ()| {})
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .with_context(call_ctx)
            .done();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    assert!(
        wait_until(
            || !probe.errors.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(probe.errors.lock().unwrap()[0], ErrorCode::Cancelled);

    node.stop().await;
}

#[tokio::test]
async fn dumb_proxy_runs_no_callbacks() {
    let (node, _state, probe) = start_node().await;

    let ctx = node.service_context("Caller").unwrap();
    ctx.fork("drive", |_svc: &mut Caller, sctx| {
        let proxy = sctx.create_proxy("Ghost");
        assert!(!proxy.is_available());
        proxy
            .call::<Caller>("Anything", ())
            .then(|svc, (): ()| {
                *svc.probe.got.lock().unwrap() = Some("then".into());
            })
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .finally(|svc| {
                svc.probe.finals.fetch_add(1, Ordering::SeqCst);
            })
            .done();
        proxy.post("Anything", ());
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(probe.got.lock().unwrap().is_none());
    assert!(probe.errors.lock().unwrap().is_empty());
    assert_eq!(probe.finals.load(Ordering::SeqCst), 0);

    node.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (node, _state, _probe) = start_node().await;
    node.stop().await;
    node.stop().await;
    assert!(node.is_draining());
    assert!(node.service_context("Echo").is_none());
}
