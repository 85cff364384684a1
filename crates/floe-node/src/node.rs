use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use floe_common::transport::{Connection, Listener, TransportConfig};
use floe_common::{Codec, Error, ErrorCode, Message, NodeAddr, Result, ServiceAddr};
use floe_host::{HostApplication, HostedRoutine, LifecycleRoutine};
use floe_metrics::MetricCollector;

use crate::discovery::ServiceDiscovery;
use crate::mailbox::{InboundRpc, MailboxItem};
use crate::options::NodeOptions;
use crate::pool::ConnectionPool;
use crate::proxy::Proxy;
use crate::registry::ServiceRegistration;
use crate::rpc_context::ReplyRoute;
use crate::service::ServiceContext;
use crate::session::SessionTable;

/// Everything a node needs besides the topology: the service types it can
/// host and its collaborators.
pub struct RegisterOptions {
    pub registrations: Vec<ServiceRegistration>,
    pub discovery: Option<Arc<dyn ServiceDiscovery>>,
    pub metrics: Option<Arc<dyn MetricCollector>>,
    pub codec: Codec,
}

impl RegisterOptions {
    pub fn new(registrations: Vec<ServiceRegistration>) -> Self {
        RegisterOptions {
            registrations,
            discovery: None,
            metrics: None,
            codec: Codec::default(),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The codec is fixed for the lifetime of the node.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

/// A process-level host for services: local registry, transport listeners,
/// peer connection pool, session table, HTTP RPC endpoint and health check.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

#[derive(Clone)]
pub(crate) struct ServiceEntry {
    pub addr: ServiceAddr,
    pub ctx: ServiceContext,
    pub tx: mpsc::UnboundedSender<MailboxItem>,
}

#[derive(Default)]
struct ServiceMap {
    by_name: HashMap<String, ServiceEntry>,
    by_addr: HashMap<ServiceAddr, String>,
}

pub(crate) struct NodeInner {
    options: NodeOptions,
    addr: NodeAddr,
    codec: Codec,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    metrics: Option<Arc<dyn MetricCollector>>,
    sessions: SessionTable,
    pool: ConnectionPool,
    /// Every known service name, local or not; remote targets are addressed
    /// by kind.
    kinds: HashMap<String, u16>,
    registrations: Mutex<HashMap<String, ServiceRegistration>>,
    services: Mutex<ServiceMap>,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
    start_order: Mutex<Vec<String>>,
    draining: AtomicBool,
    stopped: AtomicBool,
    trace: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    http_task: Mutex<Option<JoinHandle<()>>>,
    http_addr: Mutex<Option<SocketAddr>>,
}

impl Node {
    pub fn new(options: NodeOptions, register: RegisterOptions) -> Result<Node> {
        let addr = options.listen_addr()?;
        let kinds = register
            .registrations
            .iter()
            .map(|r| (r.name().to_string(), r.kind()))
            .collect();
        let registrations = register
            .registrations
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();

        Ok(Node {
            inner: Arc::new(NodeInner {
                options,
                addr,
                codec: register.codec,
                discovery: register.discovery,
                metrics: register.metrics,
                sessions: SessionTable::new(),
                pool: ConnectionPool::new(),
                kinds,
                registrations: Mutex::new(registrations),
                services: Mutex::new(ServiceMap::default()),
                workers: Mutex::new(HashMap::new()),
                start_order: Mutex::new(Vec::new()),
                draining: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                trace: AtomicU64::new(0),
                tasks: Mutex::new(Vec::new()),
                http_task: Mutex::new(None),
                http_addr: Mutex::new(None),
            }),
        })
    }

    /// Starts services in dependency order, then the transports and the
    /// HTTP server.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let element = inner
            .options
            .local_element()
            .cloned()
            .ok_or_else(|| {
                Error::with_op(
                    ErrorCode::InvalidArgument,
                    "node.start",
                    format!("node {:?} not present in configuration", inner.options.node_name),
                )
            })?;

        let services = element.services.clone();
        for (i, name) in services.iter().enumerate() {
            if services[..i].contains(name) {
                return Err(Error::with_op(
                    ErrorCode::InvalidArgument,
                    "node.start",
                    format!("duplicate service name {name:?}"),
                ));
            }
        }
        validate_dependencies(&services, &inner.options.dependencies)?;
        let order = resolve_start_order(&services, &inner.options.dependencies);

        // Every service is created and addressable before any `on_start`
        // runs, so startup hooks can resolve proxies to their siblings; the
        // gates then release the hooks strictly in dependency order.
        let mut startups = Vec::with_capacity(order.len());
        {
            let registrations = inner.registrations.lock().expect("node lock poisoned");
            for name in &order {
                if !registrations.contains_key(name) {
                    return Err(Error::with_op(
                        ErrorCode::InvalidArgument,
                        "node.start",
                        format!("service {name:?} not registered"),
                    ));
                }
            }

            let mut map = inner.services.lock().expect("node lock poisoned");
            let mut workers = inner.workers.lock().expect("node lock poisoned");
            for name in &order {
                let registration = &registrations[name];
                let addr = ServiceAddr::new(registration.kind(), 1);
                let (tx, rx) = mpsc::unbounded_channel();
                let (gate_tx, gate_rx) = tokio::sync::oneshot::channel();
                let (started_tx, started_rx) = tokio::sync::oneshot::channel();
                let ctx =
                    ServiceContext::new(name.clone(), addr, tx.clone(), Arc::downgrade(inner));
                let worker = (registration.spawn)(ctx.clone(), rx, gate_rx, started_tx);

                map.by_name.insert(name.clone(), ServiceEntry { addr, ctx, tx });
                map.by_addr.insert(addr, name.clone());
                workers.insert(name.clone(), worker);
                startups.push((name.clone(), addr, gate_tx, started_rx));
            }
        }
        *inner.start_order.lock().expect("node lock poisoned") = order;

        for (name, addr, gate, started) in startups {
            let _ = gate.send(());
            if started.await.is_err() {
                tracing::error!(service = %name, "service worker died during startup");
            }
            tracing::debug!(service = %name, %addr, "service started");
        }

        let mut tasks = Vec::new();

        if element.port > 0 || element.ws_port > 0 {
            let transport = TransportConfig {
                tcp_host: inner.options.local_ip.clone(),
                tcp_port: element.port,
                ws_host: inner.options.local_ip.clone(),
                ws_port: element.ws_port,
                ws_path: "/ws".into(),
            };
            for listener in Listener::bind_all(&transport).await? {
                let node = inner.clone();
                tasks.push(tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok(conn) => {
                                let node = node.clone();
                                tokio::spawn(handle_connection(node, conn));
                            }
                            Err(err) => {
                                if node.is_draining() {
                                    break;
                                }
                                tracing::warn!(%err, "accept failed");
                            }
                        }
                    }
                }));
            }
        }

        if element.http_port > 0 {
            let listener = tokio::net::TcpListener::bind((
                inner.options.local_ip.as_str(),
                element.http_port,
            ))
            .await
            .map_err(|e| Error::wrap(ErrorCode::Transport, "http.listen", e))?;
            *inner.http_addr.lock().expect("node lock poisoned") =
                listener.local_addr().ok();
            let node = inner.clone();
            *inner.http_task.lock().expect("node lock poisoned") =
                Some(tokio::spawn(crate::http::serve(node, listener)));
        }

        inner
            .tasks
            .lock()
            .expect("node lock poisoned")
            .extend(tasks);

        tracing::info!(node = %inner.options.node_name, addr = %inner.addr, "node started");
        Ok(())
    }

    /// Drains and stops: the health endpoint flips first, discovery
    /// deregisters, then services stop in reverse start order with the
    /// configured grace period. Idempotent.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.draining.store(true, Ordering::SeqCst);
        tracing::info!(node = %inner.options.node_name, "node stopping");

        let order = inner.start_order.lock().expect("node lock poisoned").clone();

        if let Some(discovery) = &inner.discovery {
            discovery.deregister(inner.addr, &order);
        }

        // Transport listeners go down now; the HTTP server stays up through
        // the drain so /health keeps answering 503.
        let tasks: Vec<_> = inner
            .tasks
            .lock()
            .expect("node lock poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        for name in order.iter().rev() {
            let entry = {
                let mut map = inner.services.lock().expect("node lock poisoned");
                let entry = map.by_name.remove(name);
                if let Some(entry) = &entry {
                    map.by_addr.remove(&entry.addr);
                }
                entry
            };
            let worker = inner
                .workers
                .lock()
                .expect("node lock poisoned")
                .remove(name);

            if let Some(entry) = entry {
                entry.ctx.lifetime().cancel();
                let _ = entry.tx.send(MailboxItem::Stop);
            }
            if let Some(mut worker) = worker {
                if tokio::time::timeout(inner.options.stop_grace, &mut worker)
                    .await
                    .is_err()
                {
                    tracing::warn!(service = %name, "stop grace period elapsed; aborting worker");
                    worker.abort();
                }
            }
            tracing::debug!(service = %name, "service stopped");
        }

        inner.pool.shutdown();
        if let Some(http) = inner.http_task.lock().expect("node lock poisoned").take() {
            http.abort();
        }
        tracing::info!(node = %inner.options.node_name, "node stopped");
    }

    pub fn addr(&self) -> NodeAddr {
        self.inner.addr
    }

    /// Actual HTTP listen address once started; useful with ephemeral
    /// ports.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        *self.inner.http_addr.lock().expect("node lock poisoned")
    }

    pub fn is_draining(&self) -> bool {
        self.inner.is_draining()
    }

    /// Outstanding remote sessions; drops back to zero once calls settle.
    pub fn pending_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// The context of a hosted service, for scheduling work onto it from
    /// outside the runtime (tests, adapters).
    pub fn service_context(&self, name: &str) -> Option<ServiceContext> {
        self.inner.service_by_name(name).map(|e| e.ctx)
    }
}

#[async_trait]
impl HostedRoutine for Node {
    async fn start(&self, _app: &Arc<HostApplication>) -> Result<()> {
        Node::start(self).await
    }

    async fn stop(&self) {
        Node::stop(self).await;
    }
}

#[async_trait]
impl LifecycleRoutine for Node {}

impl NodeInner {
    pub(crate) fn addr(&self) -> NodeAddr {
        self.addr
    }

    pub(crate) fn codec(&self) -> &Codec {
        &self.codec
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<dyn MetricCollector>> {
        self.metrics.as_ref()
    }

    pub(crate) fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub(crate) fn next_trace(&self) -> u64 {
        self.trace.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn service_by_name(&self, name: &str) -> Option<ServiceEntry> {
        self.services
            .lock()
            .expect("node lock poisoned")
            .by_name
            .get(name)
            .cloned()
    }

    fn service_by_addr(&self, addr: ServiceAddr) -> Option<ServiceEntry> {
        let map = self.services.lock().expect("node lock poisoned");
        map.by_addr
            .get(&addr)
            .and_then(|name| map.by_name.get(name))
            .cloned()
    }

    /// Pushes a request onto a local service's mailbox.
    pub(crate) fn deliver_local(&self, msg: Message, reply: ReplyRoute) -> Result<()> {
        let entry = self.service_by_addr(msg.dst).ok_or_else(|| {
            Error::with_op(
                ErrorCode::ServiceNotFound,
                "rpc.call",
                format!("no local service at {}", msg.dst),
            )
        })?;
        entry
            .tx
            .send(MailboxItem::Rpc(InboundRpc {
                msg,
                reply,
                remote_node: self.addr,
            }))
            .map_err(|_| {
                Error::with_op(ErrorCode::ServiceNotFound, "rpc.call", "service stopped")
            })
    }

    /// Hands a message to the peer's sender task, dialing lazily.
    pub(crate) fn pool_send(node: &Arc<NodeInner>, peer: NodeAddr, msg: Message) {
        let tx = node.pool.sender(node, peer);
        if let Err(rejected) = tx.send(msg) {
            crate::pool::fail_session(node, &rejected.0);
        }
    }

    /// Routes one decoded frame from a peer connection.
    pub(crate) fn route_incoming(
        node: &Arc<NodeInner>,
        msg: Message,
        reply_tx: mpsc::UnboundedSender<Message>,
        peer: NodeAddr,
    ) {
        if msg.is_response() {
            if msg.session > 0 {
                match node.sessions.complete(msg.session) {
                    Some(cb) => cb.fire(msg),
                    None => tracing::debug!(session = msg.session, "late response discarded"),
                }
            }
            return;
        }

        let trace = msg.trace;
        let session = msg.session;
        let requester = msg.src;

        match node.service_by_addr(msg.dst) {
            Some(entry) => {
                let reply = if session > 0 {
                    ReplyRoute::Remote(reply_tx.clone())
                } else {
                    ReplyRoute::None
                };
                let delivered = entry.tx.send(MailboxItem::Rpc(InboundRpc {
                    msg,
                    reply,
                    remote_node: peer,
                }));
                if delivered.is_err() && session > 0 {
                    send_error_reply(
                        &reply_tx,
                        trace,
                        session,
                        requester,
                        Error::with_op(ErrorCode::ServiceNotFound, "rpc.route", "service stopped"),
                    );
                }
            }
            None => {
                if session > 0 {
                    send_error_reply(
                        &reply_tx,
                        trace,
                        session,
                        requester,
                        Error::with_op(
                            ErrorCode::ServiceNotFound,
                            "rpc.route",
                            format!("no service at {}", msg.dst),
                        ),
                    );
                } else {
                    tracing::debug!("post for unknown service dropped");
                }
            }
        }
    }

    /// Resolution order: local service, discovery, static routes, dumb.
    pub(crate) fn create_proxy(node: &Arc<NodeInner>, caller: &ServiceContext, name: &str) -> Proxy {
        if let Some(entry) = node.service_by_name(name) {
            return Proxy::service(caller.clone(), entry.addr, NodeAddr::INVALID);
        }

        let Some(kind) = node.kinds.get(name).copied() else {
            tracing::warn!(service = name, "proxy target unknown; calls will be dropped");
            return Proxy::dumb();
        };
        let target = ServiceAddr::new(kind, 1);

        if let Some(discovery) = &node.discovery {
            match discovery.resolve(name) {
                Ok(addr) if addr.is_valid() && addr != node.addr => {
                    return Proxy::service(caller.clone(), target, addr);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(service = name, %err, "discovery resolve failed");
                }
            }
        }

        if let Some(addr) = node.options.static_route(name) {
            if addr != node.addr {
                return Proxy::service(caller.clone(), target, addr);
            }
        }

        Proxy::dumb()
    }
}

fn send_error_reply(
    reply_tx: &mpsc::UnboundedSender<Message>,
    trace: u64,
    session: i32,
    requester: ServiceAddr,
    err: Error,
) {
    let _ = reply_tx.send(Message {
        trace,
        session,
        src: ServiceAddr::NONE,
        dst: requester,
        func_name: String::new(),
        payload: Vec::new(),
        err: Some(err.to_string()),
        timeout: None,
    });
}

/// Reader/writer pair for one accepted connection. Replies and any
/// peer-initiated requests share the outgoing queue.
async fn handle_connection(node: Arc<NodeInner>, conn: Connection) {
    let peer = match conn.peer_addr() {
        Some(SocketAddr::V4(v4)) => NodeAddr::from_parts(*v4.ip(), v4.port()),
        _ => NodeAddr::INVALID,
    };

    let (mut reader, mut writer) = conn.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.encode() {
                Ok(body) => {
                    if let Err(err) = writer.write_frame(&body).await {
                        tracing::debug!(%peer, %err, "reply write failed");
                        break;
                    }
                }
                Err(err) => tracing::warn!(%peer, %err, "dropping unencodable reply"),
            }
        }
    });

    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%peer, %err, "connection closed");
                break;
            }
        };
        match Message::decode(&frame) {
            Ok(msg) => NodeInner::route_incoming(&node, msg, tx.clone(), peer),
            Err(err) => {
                tracing::warn!(%peer, %err, "malformed frame; dropping connection");
                break;
            }
        }
    }
}

/// Every service named in the dependency map, on either side of an edge,
/// must exist; the graph must be acyclic.
pub(crate) fn validate_dependencies(
    services: &[String],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Result<()> {
    for (service, targets) in dependencies {
        if !services.contains(service) {
            return Err(Error::with_op(
                ErrorCode::InvalidArgument,
                "node.dependencies",
                format!("dependency declared for unknown service {service:?}"),
            ));
        }
        for target in targets {
            if !services.contains(target) {
                return Err(Error::with_op(
                    ErrorCode::InvalidArgument,
                    "node.dependencies",
                    format!("unknown dependency {target:?} of service {service:?}"),
                ));
            }
        }
    }

    // Depth-first coloring; a back edge is a cycle.
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = services.iter().map(|s| (s.as_str(), Mark::New)).collect();

    fn visit<'a>(
        name: &'a str,
        dependencies: &'a BTreeMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(name).copied() {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| *p == name).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(name);
                return Err(Error::with_op(
                    ErrorCode::InvalidArgument,
                    "node.dependencies",
                    format!("dependency cycle: {}", cycle.join(" -> ")),
                ));
            }
            _ => {}
        }
        marks.insert(name, Mark::Visiting);
        path.push(name);
        if let Some(targets) = dependencies.get(name) {
            for target in targets {
                visit(target, dependencies, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut path = Vec::new();
    for service in services {
        visit(service, dependencies, &mut marks, &mut path)?;
    }
    Ok(())
}

/// Topological start order: dependencies before dependents, declaration
/// order breaking ties. Stop order is the exact reverse. Assumes
/// [`validate_dependencies`] passed.
pub(crate) fn resolve_start_order(
    services: &[String],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Vec<String> {
    let mut remaining: Vec<&String> = services.iter().collect();
    let mut started: Vec<String> = Vec::with_capacity(services.len());

    while !remaining.is_empty() {
        let mut progressed = false;
        let mut index = 0;
        while index < remaining.len() {
            let name = remaining[index];
            let ready = dependencies
                .get(name)
                .map(|deps| deps.iter().all(|d| started.contains(d)))
                .unwrap_or(true);
            if ready {
                started.push(name.clone());
                remaining.remove(index);
                progressed = true;
            } else {
                index += 1;
            }
        }
        if !progressed {
            // Unreachable after validation; keep declaration order rather
            // than looping forever.
            started.extend(remaining.drain(..).cloned());
        }
    }

    started
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn deps(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn start_order_puts_dependencies_first() {
        let services = names(&["Gateway", "World", "DB"]);
        let dependencies = deps(&[("Gateway", &["World"]), ("World", &["DB"])]);

        let start = resolve_start_order(&services, &dependencies);
        assert_eq!(start, names(&["DB", "World", "Gateway"]));

        let stop: Vec<String> = start.into_iter().rev().collect();
        assert_eq!(stop, names(&["Gateway", "World", "DB"]));
    }

    #[test]
    fn start_order_without_dependencies_is_declaration_order() {
        let services = names(&["A", "B", "C"]);
        let start = resolve_start_order(&services, &BTreeMap::new());
        assert_eq!(start, services);
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        let services = names(&["Gateway", "World", "DB"]);
        let dependencies = deps(&[("Gateway", &["World"]), ("World", &["DB"])]);
        assert!(validate_dependencies(&services, &dependencies).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let services = names(&["Gateway", "World", "DB"]);
        let dependencies = deps(&[("Gateway", &["World"]), ("World", &["Cache"])]);
        let err = validate_dependencies(&services, &dependencies).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("Cache"));
    }

    #[test]
    fn validate_rejects_cycle() {
        let services = names(&["A", "B", "C"]);
        let dependencies = deps(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        let err = validate_dependencies(&services, &dependencies).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("cycle"), "got: {err}");
    }

    #[test]
    fn diamond_dependency_orders_once() {
        let services = names(&["App", "Left", "Right", "Base"]);
        let dependencies = deps(&[
            ("App", &["Left", "Right"]),
            ("Left", &["Base"]),
            ("Right", &["Base"]),
        ]);

        let start = resolve_start_order(&services, &dependencies);
        assert_eq!(start.len(), 4);
        let pos = |n: &str| start.iter().position(|s| s == n).unwrap();
        assert!(pos("Base") < pos("Left"));
        assert!(pos("Base") < pos("Right"));
        assert!(pos("Left") < pos("App"));
        assert!(pos("Right") < pos("App"));
    }
}
