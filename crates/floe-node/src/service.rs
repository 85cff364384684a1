use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use floe_common::{Codec, Error, ErrorCode, NodeAddr, ServiceAddr};

use crate::context::CallContext;
use crate::mailbox::{InboundRpc, MailboxItem, TaskFn};
use crate::node::NodeInner;
use crate::promise::decode_args;
use crate::proxy::Proxy;
use crate::rpc_context::RpcContext;

/// A single-threaded actor hosted on a node.
///
/// All state mutation happens on the service's own worker: RPC handlers,
/// forked tasks and promise continuations are serialized through one
/// mailbox. A handler that blocks, blocks the whole service.
pub trait Service: Send + 'static {
    /// Runs on the worker before the first mailbox item.
    fn on_start(&mut self, _ctx: &ServiceContext) {}

    /// Runs on the worker after the mailbox has drained at stop.
    fn on_stop(&mut self, _ctx: &ServiceContext) {}

    /// Registers the service's RPC handlers.
    fn methods(_table: &mut MethodTable<Self>)
    where
        Self: Sized,
    {
    }
}

type MethodThunk<S> = Box<dyn Fn(&mut S, &ServiceContext, RpcContext, &[u8]) + Send + Sync>;

/// Dispatch table mapping function names to typed handler thunks.
///
/// A thunk decodes the request payload into the handler's argument tuple
/// with the node codec; a decode failure answers `CODEC` without invoking
/// the handler.
pub struct MethodTable<S> {
    methods: HashMap<String, MethodThunk<S>>,
}

impl<S: Service> Default for MethodTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Service> MethodTable<S> {
    pub fn new() -> Self {
        MethodTable {
            methods: HashMap::new(),
        }
    }

    /// Registers `handler` under `name`. Argument tuples arrive encoded as
    /// arrays; a zero-argument handler takes `()`.
    pub fn register<Args, F>(&mut self, name: impl Into<String>, handler: F)
    where
        Args: DeserializeOwned + 'static,
        F: Fn(&mut S, RpcContext, Args) + Send + Sync + 'static,
    {
        let thunk: MethodThunk<S> = Box::new(
            move |svc: &mut S, ctx: &ServiceContext, rpc: RpcContext, payload: &[u8]| {
                match decode_args::<Args>(&ctx.codec(), payload) {
                    Ok(args) => handler(svc, rpc, args),
                    Err(err) => rpc.error(err),
                }
            },
        );
        self.methods.insert(name.into(), thunk);
    }

    fn get(&self, name: &str) -> Option<&MethodThunk<S>> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Handle to a service's identity, mailbox and node.
///
/// Cheap to clone; closures capture it to schedule work back onto the
/// owning service.
#[derive(Clone)]
pub struct ServiceContext {
    inner: Arc<CtxInner>,
}

struct CtxInner {
    name: String,
    addr: ServiceAddr,
    lifetime: CallContext,
    tx: mpsc::UnboundedSender<MailboxItem>,
    node: Weak<NodeInner>,
}

impl ServiceContext {
    pub(crate) fn new(
        name: String,
        addr: ServiceAddr,
        tx: mpsc::UnboundedSender<MailboxItem>,
        node: Weak<NodeInner>,
    ) -> Self {
        ServiceContext {
            inner: Arc::new(CtxInner {
                name,
                addr,
                lifetime: CallContext::new(),
                tx,
                node,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn addr(&self) -> ServiceAddr {
        self.inner.addr
    }

    pub fn node_addr(&self) -> NodeAddr {
        self.inner
            .node
            .upgrade()
            .map(|n| n.addr())
            .unwrap_or(NodeAddr::INVALID)
    }

    /// The service lifetime context. Cancelled when the service stops,
    /// which cancels every outstanding call derived from it.
    pub fn lifetime(&self) -> &CallContext {
        &self.inner.lifetime
    }

    /// Enqueues a closure on this service's own worker. Continuations
    /// scheduled this way observe the same serialization guarantee as
    /// direct handlers.
    pub fn fork<S, F>(&self, label: impl Into<Cow<'static, str>>, f: F)
    where
        S: Service,
        F: FnOnce(&mut S, &ServiceContext) + Send + 'static,
    {
        let label = label.into();
        let name = self.inner.name.clone();
        let task: TaskFn = Box::new(move |any: &mut dyn Any, ctx: &ServiceContext| {
            match any.downcast_mut::<S>() {
                Some(svc) => f(svc, ctx),
                None => tracing::error!(service = %name, "forked closure service type mismatch"),
            }
        });
        if !self.enqueue(MailboxItem::Task { label, f: task }) {
            tracing::debug!(service = %self.inner.name, "fork on stopped service dropped");
        }
    }

    /// Resolves a proxy for `name`: local service, then discovery, then the
    /// static route table, then a dumb proxy that drops everything.
    pub fn create_proxy(&self, name: &str) -> Proxy {
        match self.inner.node.upgrade() {
            Some(node) => crate::node::NodeInner::create_proxy(&node, self, name),
            None => Proxy::dumb(),
        }
    }

    /// A proxy calling `service` on a peer's HTTP RPC endpoint.
    pub fn create_http_proxy(&self, base_url: &str, service: &str) -> Proxy {
        let base = base_url.trim_end_matches('/');
        Proxy::http(self.clone(), format!("{base}/node/rpc/{service}"))
    }

    pub(crate) fn codec(&self) -> Codec {
        self.inner
            .node
            .upgrade()
            .map(|n| n.codec().clone())
            .unwrap_or_default()
    }

    pub(crate) fn node(&self) -> Option<Arc<NodeInner>> {
        self.inner.node.upgrade()
    }

    pub(crate) fn node_weak(&self) -> Weak<NodeInner> {
        self.inner.node.clone()
    }

    pub(crate) fn enqueue(&self, item: MailboxItem) -> bool {
        self.inner.tx.send(item).is_ok()
    }
}

/// Spawns the single worker that owns `svc` and drains its mailbox.
///
/// The worker idles until the node fires `gate`, runs `on_start`, then
/// acknowledges through `started`; the node uses the handshake to serialize
/// service startup into dependency order.
pub(crate) fn spawn_worker<S: Service>(
    mut svc: S,
    ctx: ServiceContext,
    mut rx: mpsc::UnboundedReceiver<MailboxItem>,
    gate: tokio::sync::oneshot::Receiver<()>,
    started: tokio::sync::oneshot::Sender<()>,
) -> JoinHandle<()> {
    let mut table = MethodTable::new();
    S::methods(&mut table);

    tokio::spawn(async move {
        let _ = gate.await;
        if catch_unwind(AssertUnwindSafe(|| svc.on_start(&ctx))).is_err() {
            tracing::error!(service = %ctx.name(), "on_start panicked");
        }
        let _ = started.send(());

        while let Some(item) = rx.recv().await {
            match item {
                MailboxItem::Stop => break,
                MailboxItem::Task { label, f } => {
                    if catch_unwind(AssertUnwindSafe(|| f(&mut svc, &ctx))).is_err() {
                        tracing::error!(
                            service = %ctx.name(),
                            task = %label,
                            "forked task panicked"
                        );
                    }
                }
                MailboxItem::Rpc(inbound) => dispatch_rpc(&mut svc, &table, &ctx, inbound),
            }
        }

        if catch_unwind(AssertUnwindSafe(|| svc.on_stop(&ctx))).is_err() {
            tracing::error!(service = %ctx.name(), "on_stop panicked");
        }
    })
}

fn dispatch_rpc<S: Service>(
    svc: &mut S,
    table: &MethodTable<S>,
    ctx: &ServiceContext,
    inbound: InboundRpc,
) {
    let InboundRpc {
        msg,
        reply,
        remote_node,
    } = inbound;

    let rpc = RpcContext::new(
        ctx.name(),
        ctx.lifetime(),
        ctx.node_weak(),
        ctx.codec(),
        &msg,
        remote_node,
        reply,
    );

    if msg.func_name.is_empty() {
        rpc.error(Error::with_op(
            ErrorCode::InvalidArgument,
            "rpc.dispatch",
            "empty function name",
        ));
        return;
    }

    let Some(thunk) = table.get(&msg.func_name) else {
        rpc.error(Error::with_op(
            ErrorCode::InvalidArgument,
            "rpc.dispatch",
            format!("unknown rpc method {:?}", msg.func_name),
        ));
        return;
    };

    // A clone shares the one-shot reply state so a panicking handler still
    // answers the caller.
    let guard = rpc.clone();
    let func = msg.func_name.clone();
    let payload = msg.payload;

    if catch_unwind(AssertUnwindSafe(|| thunk(svc, ctx, rpc, &payload))).is_err() {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(
            service = %ctx.name(),
            func = %func,
            %backtrace,
            "rpc handler panicked"
        );
        if !guard.is_flushed() {
            guard.flush_internal(format!("handler {func} panicked"));
        }
    }
}
