//! Two services on one node, resolved through an in-memory service
//! discovery: `Ping` calls `Pong.Hello` every three seconds until the
//! process receives a shutdown signal.
//!
//! ```bash
//! cargo run -p ping-pong
//! curl -X POST localhost:8080/node/rpc/Pong \
//!     -d '{"Func": "Hello", "Post": false, "Args": ["curl"]}'
//! curl localhost:8080/health
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use floe_common::{Error, ErrorCode, NodeAddr, Result};
use floe_host::HostBuilder;
use floe_node::{
    MethodTable, Node, NodeElement, NodeOptions, Proxy, RegisterOptions, RpcContext, Service,
    ServiceContext, ServiceDiscovery, ServiceRegistry,
};

/// In-memory stand-in for a real registry (etcd, Consul, ...).
#[derive(Default)]
struct MapDiscovery {
    routes: Mutex<HashMap<String, NodeAddr>>,
}

impl MapDiscovery {
    fn register(&self, service: &str, host: &str, port: u16) -> Result<()> {
        let addr = NodeAddr::new(host, port)?;
        self.routes.lock().unwrap().insert(service.to_string(), addr);
        tracing::info!(service, %addr, "discovery registered");
        Ok(())
    }
}

impl ServiceDiscovery for MapDiscovery {
    fn resolve(&self, service: &str) -> Result<NodeAddr> {
        self.routes
            .lock()
            .unwrap()
            .get(service)
            .copied()
            .ok_or_else(|| {
                Error::with_op(
                    ErrorCode::ServiceNotFound,
                    "discovery",
                    format!("{service:?} not registered"),
                )
            })
    }

    fn deregister(&self, node: NodeAddr, services: &[String]) {
        let mut routes = self.routes.lock().unwrap();
        for service in services {
            routes.remove(service);
            tracing::info!(service, %node, "discovery deregistered");
        }
    }
}

#[derive(Default)]
struct Ping {
    pong: Option<Proxy>,
}

impl Ping {
    fn tick(&mut self, _ctx: &ServiceContext) {
        let Some(pong) = &self.pong else { return };
        pong.call::<Ping>("Hello", ("ping via discovery",))
            .then(|_svc, (reply,): (String,)| tracing::info!(%reply, "received"))
            .catch(|_svc, err| tracing::warn!(%err, "hello failed"))
            .done();
    }
}

impl Service for Ping {
    fn on_start(&mut self, ctx: &ServiceContext) {
        tracing::info!("ping start");
        self.pong = Some(ctx.create_proxy("Pong"));

        let ticker_ctx = ctx.clone();
        let stopped = ctx.lifetime().token().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3));
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = interval.tick() => {
                        ticker_ctx.fork("tick", Ping::tick);
                    }
                }
            }
        });
    }

    fn on_stop(&mut self, _ctx: &ServiceContext) {
        tracing::info!("ping stop");
    }
}

struct Pong;

impl Service for Pong {
    fn on_start(&mut self, _ctx: &ServiceContext) {
        tracing::info!("pong start");
    }

    fn on_stop(&mut self, _ctx: &ServiceContext) {
        tracing::info!("pong stop");
    }

    fn methods(table: &mut MethodTable<Self>) {
        table.register("Hello", |_svc: &mut Pong, ctx: RpcContext, (msg,): (String,)| {
            tracing::info!(%msg, "received");
            ctx.return_args(("pong from discovery!",));
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let discovery = Arc::new(MapDiscovery::default());
    discovery.register("Pong", "127.0.0.1", 8000)?;

    let mut registry = ServiceRegistry::new();
    registry.register::<Ping, _>("Ping", Ping::default);
    registry.register::<Pong, _>("Pong", || Pong);

    let options = NodeOptions::new("MyNode", "127.0.0.1").element(
        "MyNode",
        NodeElement {
            port: 8000,
            http_port: 8080,
            services: registry.service_names(),
            ..Default::default()
        },
    );

    let node = Node::new(
        options,
        RegisterOptions::new(registry.into_registrations()).with_discovery(discovery),
    )?;

    let host = HostBuilder::new().add_routine(Arc::new(node)).build();
    host.run().await?;
    Ok(())
}
