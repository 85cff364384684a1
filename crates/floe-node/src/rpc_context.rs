use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use floe_common::{Codec, Error, ErrorCode, Message, NodeAddr, ServiceAddr};

use crate::context::CallContext;
use crate::node::NodeInner;
use crate::promise::encode_args;

/// Where a handler's reply goes.
pub(crate) enum ReplyRoute {
    /// Caller lives in this process; the one-shot continuation rides along
    /// with the request.
    Local(crate::session::SessionCallback),
    /// Reply travels back over the connection the request arrived on.
    Remote(mpsc::UnboundedSender<Message>),
    /// Reply resolves the HTTP handler waiting on the other end.
    Http(oneshot::Sender<HttpRpcReply>),
    /// Post: nobody waits for a response.
    None,
}

pub(crate) struct HttpRpcReply {
    /// Encoded result tuple on success, the handler error otherwise.
    pub result: Result<Vec<u8>, Error>,
}

/// Handler-side response builder.
///
/// Exactly one of [`RpcContext::return_args`] / [`RpcContext::error`] takes
/// effect; later calls are no-ops. Clones share the same one-shot state, so
/// a context can be moved into a fork and flushed there.
#[derive(Clone)]
pub struct RpcContext {
    shared: Arc<RpcShared>,
    ctx: CallContext,
}

struct RpcShared {
    pending: Mutex<Option<PendingReply>>,
    remote_node: NodeAddr,
    remote_service: ServiceAddr,
    service_name: String,
    node: Weak<NodeInner>,
}

struct PendingReply {
    trace: u64,
    session: i32,
    /// Responder address; zeroed on error replies.
    src: ServiceAddr,
    /// The original requester.
    dst: ServiceAddr,
    route: ReplyRoute,
    codec: Codec,
}

impl RpcContext {
    pub(crate) fn new(
        service_name: &str,
        service_ctx: &CallContext,
        node: Weak<NodeInner>,
        codec: Codec,
        msg: &Message,
        remote_node: NodeAddr,
        route: ReplyRoute,
    ) -> Self {
        RpcContext {
            shared: Arc::new(RpcShared {
                pending: Mutex::new(Some(PendingReply {
                    trace: msg.trace,
                    session: msg.session,
                    src: msg.dst,
                    dst: msg.src,
                    route,
                    codec,
                })),
                remote_node,
                remote_service: msg.src,
                service_name: service_name.to_string(),
                node,
            }),
            ctx: service_ctx.child(),
        }
    }

    /// The call-scoped context; derive downstream timeouts from it.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn remote_node_addr(&self) -> NodeAddr {
        self.shared.remote_node
    }

    pub fn remote_service_addr(&self) -> ServiceAddr {
        self.shared.remote_service
    }

    /// Sends a successful reply carrying `args`.
    pub fn return_args(&self, args: impl Serialize) {
        let codec = {
            let guard = self.shared.pending.lock().expect("rpc context lock poisoned");
            match guard.as_ref() {
                Some(pending) => pending.codec.clone(),
                None => return,
            }
        };
        match encode_args(&codec, &args) {
            Ok(payload) => self.flush(payload, None),
            // An error reply instead, so the caller is not left waiting on
            // its timeout.
            Err(err) => self.error(err),
        }
    }

    /// Sends an error reply. The source address is zeroed so the caller can
    /// tell error responses apart without decoding.
    pub fn error(&self, err: Error) {
        if let Some(node) = self.shared.node.upgrade() {
            if let Some(metrics) = node.metrics() {
                metrics.counter(&format!("[ServiceError] {}", self.shared.service_name), 1);
            }
        }
        self.flush(Vec::new(), Some(err));
    }

    fn flush(&self, payload: Vec<u8>, err: Option<Error>) {
        let Some(pending) = self
            .shared
            .pending
            .lock()
            .expect("rpc context lock poisoned")
            .take()
        else {
            return;
        };

        // The reply is on its way; release everything derived from this
        // call's context.
        self.ctx.cancel();

        let is_err = err.is_some();
        let reply = Message {
            trace: pending.trace,
            session: pending.session,
            src: if is_err { ServiceAddr::NONE } else { pending.src },
            dst: pending.dst,
            func_name: String::new(),
            payload,
            err: err.as_ref().map(|e| e.to_string()),
            timeout: None,
        };

        match pending.route {
            ReplyRoute::None => {}
            ReplyRoute::Local(cb) => cb.fire(reply),
            ReplyRoute::Remote(tx) => {
                if pending.session > 0 && tx.send(reply).is_err() {
                    tracing::warn!(
                        service = %self.shared.service_name,
                        "peer connection gone before rpc reply could be sent"
                    );
                }
            }
            ReplyRoute::Http(tx) => {
                let result = match err {
                    Some(err) => Err(err),
                    None => Ok(reply.payload),
                };
                let _ = tx.send(HttpRpcReply { result });
            }
        }
    }

    /// Responds `INTERNAL` if the handler died without flushing.
    pub(crate) fn flush_internal(&self, detail: String) {
        self.error(Error::with_op(ErrorCode::Internal, "rpc.dispatch", detail));
    }

    pub(crate) fn is_flushed(&self) -> bool {
        self.shared
            .pending
            .lock()
            .expect("rpc context lock poisoned")
            .is_none()
    }
}
