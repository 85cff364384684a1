//! HTTP RPC endpoint and health check.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use floe_common::{Error, ErrorCode};
use floe_node::{
    MethodTable, Node, NodeElement, NodeOptions, RegisterOptions, RpcContext, Service,
    ServiceRegistry,
};
use serde_json::json;

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
struct CalcState {
    posted: Arc<Mutex<Vec<i64>>>,
}

struct Calc {
    state: CalcState,
}

impl Service for Calc {
    fn methods(table: &mut MethodTable<Self>) {
        table.register("Add", |_svc: &mut Calc, ctx: RpcContext, (a, b): (i64, i64)| {
            ctx.return_args((a + b,));
        });
        table.register("Record", |svc: &mut Calc, _ctx: RpcContext, (n,): (i64,)| {
            svc.state.posted.lock().unwrap().push(n);
        });
        table.register("Reject", |_svc: &mut Calc, ctx: RpcContext, (): ()| {
            ctx.error(Error::with_op(
                ErrorCode::InvalidArgument,
                "calc.reject",
                "always rejects",
            ));
        });
    }
}

async fn start_http_node() -> (Node, CalcState, String) {
    let state = CalcState::default();

    let mut registry = ServiceRegistry::new();
    {
        let state = state.clone();
        registry.register::<Calc, _>("Calc", move || Calc {
            state: state.clone(),
        });
    }

    // Reserve an ephemeral HTTP port.
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_port = reserved.local_addr().unwrap().port();
    drop(reserved);

    let options = NodeOptions::new("test", "127.0.0.1").element(
        "test",
        NodeElement {
            http_port,
            services: registry.service_names(),
            ..Default::default()
        },
    );
    let node = Node::new(options, RegisterOptions::new(registry.into_registrations())).unwrap();
    node.start().await.unwrap();

    let base = format!("http://{}", node.http_addr().unwrap());
    (node, state, base)
}

#[tokio::test]
async fn http_call_returns_result_array() {
    let (node, _state, base) = start_http_node().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/node/rpc/Calc"))
        .json(&json!({"Func": "Add", "Post": false, "Args": [2, 40]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"Result": [42]}));

    node.stop().await;
}

#[tokio::test]
async fn http_post_returns_empty_result() {
    let (node, state, base) = start_http_node().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/node/rpc/Calc"))
        .json(&json!({"Func": "Record", "Post": true, "Args": [7]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"Result": []}));

    assert!(
        wait_until(
            || state.posted.lock().unwrap().as_slice() == [7],
            Duration::from_secs(2)
        )
        .await
    );

    node.stop().await;
}

#[tokio::test]
async fn http_handler_error_is_textual_400() {
    let (node, _state, base) = start_http_node().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/node/rpc/Calc"))
        .json(&json!({"Func": "Reject", "Post": false, "Args": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body = response.text().await.unwrap();
    assert!(body.contains("[INVALID_ARGUMENT]"), "got: {body}");

    node.stop().await;
}

#[tokio::test]
async fn http_unknown_service_is_404() {
    let (node, _state, base) = start_http_node().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/node/rpc/Nope"))
        .json(&json!({"Func": "Add", "Post": false, "Args": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    node.stop().await;
}

#[tokio::test]
async fn http_malformed_body_is_400() {
    let (node, _state, base) = start_http_node().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/node/rpc/Calc"))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    node.stop().await;
}

#[tokio::test]
async fn health_flips_to_draining_on_stop() {
    let (node, _state, base) = start_http_node().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    // Start the stop and probe health while the node drains.
    let stopping = {
        let node = node.clone();
        tokio::spawn(async move { node.stop().await })
    };

    let mut saw_draining = false;
    for _ in 0..50 {
        match client.get(format!("{base}/health")).send().await {
            Ok(response) if response.status() == 503 => {
                assert_eq!(response.text().await.unwrap(), "draining");
                saw_draining = true;
                break;
            }
            Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            // The server goes away once the stop completes.
            Err(_) => break,
        }
    }
    stopping.await.unwrap();
    assert!(
        saw_draining || node.is_draining(),
        "health must flip before shutdown completes"
    );
}

#[tokio::test]
async fn http_call_via_service_proxy() {
    // A service on one node calls another node's HTTP endpoint.
    let (server_node, _state, base) = start_http_node().await;

    #[derive(Default, Clone)]
    struct Probe {
        sum: Arc<Mutex<Option<i64>>>,
        errors: Arc<Mutex<Vec<ErrorCode>>>,
    }

    struct Client {
        probe: Probe,
    }
    impl Service for Client {}

    let probe = Probe::default();
    let mut registry = ServiceRegistry::new();
    {
        let probe = probe.clone();
        registry.register::<Client, _>("Client", move || Client {
            probe: probe.clone(),
        });
    }
    let options = NodeOptions::new("client", "127.0.0.1").element(
        "client",
        NodeElement {
            services: registry.service_names(),
            ..Default::default()
        },
    );
    let client_node =
        Node::new(options, RegisterOptions::new(registry.into_registrations())).unwrap();
    client_node.start().await.unwrap();

    let ctx = client_node.service_context("Client").unwrap();
    ctx.fork("drive", move |_svc: &mut Client, sctx| {
        let proxy = sctx.create_http_proxy(&base, "Calc");
        proxy
            .call::<Client>("Add", (20, 22))
            .then(|svc, (sum,): (i64,)| {
                *svc.probe.sum.lock().unwrap() = Some(sum);
            })
            .catch(|svc, err| svc.probe.errors.lock().unwrap().push(err.code()))
            .done();
    });

    assert!(
        wait_until(
            || *probe.sum.lock().unwrap() == Some(42),
            Duration::from_secs(5)
        )
        .await,
        "errors: {:?}",
        probe.errors.lock().unwrap()
    );

    client_node.stop().await;
    server_node.stop().await;
}
