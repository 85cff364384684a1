use std::time::Duration;

use serde::Serialize;

use floe_common::{Error, ErrorCode, Message, NodeAddr, ServiceAddr};

use crate::promise::{encode_args, post_completion, Outcome, Promise};
use crate::rpc_context::ReplyRoute;
use crate::service::{Service, ServiceContext};
use crate::session::SessionCallback;

/// Default deadline for local/TCP/WebSocket calls whose context carries
/// none.
pub(crate) const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client handle bound to a target service.
///
/// Obtained from [`ServiceContext::create_proxy`]; resolution happened at
/// creation time. A proxy for an unresolvable name is *dumb*: calls run no
/// callbacks and posts are dropped.
#[derive(Clone)]
pub struct Proxy {
    pub(crate) inner: ProxyInner,
}

#[derive(Clone)]
pub(crate) enum ProxyInner {
    Dumb,
    Service {
        caller: ServiceContext,
        target: ServiceAddr,
        /// Invalid marks a local target.
        node_addr: NodeAddr,
    },
    Http {
        caller: ServiceContext,
        url: String,
    },
}

impl Proxy {
    pub(crate) fn dumb() -> Self {
        Proxy {
            inner: ProxyInner::Dumb,
        }
    }

    pub(crate) fn service(caller: ServiceContext, target: ServiceAddr, node_addr: NodeAddr) -> Self {
        if target.is_none() {
            return Proxy::dumb();
        }
        Proxy {
            inner: ProxyInner::Service {
                caller,
                target,
                node_addr,
            },
        }
    }

    pub(crate) fn http(caller: ServiceContext, url: String) -> Self {
        Proxy {
            inner: ProxyInner::Http { caller, url },
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.inner, ProxyInner::Dumb)
    }

    /// Target node address; invalid for local targets, dumb and HTTP
    /// proxies.
    pub fn node_addr(&self) -> NodeAddr {
        match &self.inner {
            ProxyInner::Service { node_addr, .. } => *node_addr,
            _ => NodeAddr::INVALID,
        }
    }

    /// Starts building a call. `S` is the calling service; its continuation
    /// closures receive `&mut S` back on the caller's own worker.
    pub fn call<S: Service>(&self, func: &str, args: impl Serialize) -> Promise<S> {
        let payload = match &self.inner {
            ProxyInner::Dumb => Ok(Vec::new()),
            ProxyInner::Service { caller, .. } | ProxyInner::Http { caller, .. } => {
                encode_args(&caller.codec(), &args)
            }
        };
        Promise::new(self.inner.clone(), func.to_string(), payload)
    }

    /// Fire-and-forget: session id 0, no response, no continuations.
    pub fn post(&self, func: &str, args: impl Serialize) {
        if func.is_empty() {
            return;
        }
        match &self.inner {
            ProxyInner::Dumb => {}
            ProxyInner::Service {
                caller,
                target,
                node_addr,
            } => {
                let payload = match encode_args(&caller.codec(), &args) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(service = %caller.name(), func, %err, "post encode failed");
                        return;
                    }
                };
                let Some(node) = caller.node() else { return };
                if node.is_draining() {
                    return;
                }
                let mut msg = Message::request(caller.addr(), *target, func, payload);
                msg.trace = node.next_trace();

                if node_addr.is_valid() {
                    crate::node::NodeInner::pool_send(&node, *node_addr, msg);
                } else if let Err(err) = node.deliver_local(msg, ReplyRoute::None) {
                    tracing::warn!(service = %caller.name(), func, %err, "post dropped");
                }
            }
            ProxyInner::Http { caller, url } => {
                crate::proxy_http::do_http_post(caller, url, func, &args);
            }
        }
    }
}

/// Call dispatch for local and TCP/WebSocket targets.
pub(crate) fn do_service_call<S: Service>(promise: Promise<S>) {
    let Promise {
        kind,
        func,
        payload,
        success,
        catch,
        finally,
        context,
    } = promise;

    let ProxyInner::Service {
        caller,
        target,
        node_addr,
    } = kind
    else {
        return;
    };

    // Address 0 silences sends entirely.
    if target.is_none() {
        return;
    }

    // An empty name would make the frame indistinguishable from a response.
    if func.is_empty() {
        post_completion::<S>(
            &caller,
            &func,
            Outcome::Failure(Error::with_op(
                ErrorCode::InvalidArgument,
                "rpc.call",
                "empty function name",
            )),
            success,
            catch,
            finally,
        );
        return;
    }

    let Some(node) = caller.node() else {
        post_completion::<S>(
            &caller,
            &func,
            Outcome::Failure(Error::with_op(
                ErrorCode::ServiceNotFound,
                "rpc.call",
                "node stopped",
            )),
            success,
            catch,
            finally,
        );
        return;
    };

    if node.is_draining() {
        post_completion::<S>(
            &caller,
            &func,
            Outcome::Failure(Error::with_op(
                ErrorCode::Cancelled,
                "rpc.call",
                "node is draining",
            )),
            success,
            catch,
            finally,
        );
        return;
    }

    let payload = match payload {
        Ok(payload) => payload,
        Err(err) => {
            post_completion::<S>(&caller, &func, Outcome::Failure(err), success, catch, finally);
            return;
        }
    };

    // Parent context: explicit override, else the caller service lifetime.
    // A parent without a deadline gets the transport default.
    let parent = context.unwrap_or_else(|| caller.lifetime().clone());
    let call_ctx = if parent.deadline().is_some() {
        parent.child()
    } else {
        parent.child_with_timeout(DEFAULT_CALL_TIMEOUT)
    };

    let mut msg = Message::request(caller.addr(), target, func.clone(), payload);
    msg.trace = node.next_trace();
    msg.timeout = call_ctx.remaining();

    if success.is_none() {
        // Post semantics: session 0, nothing awaits a response. Only a
        // delivery failure reaches `catch`; `finally` always runs.
        let outcome = if node_addr.is_valid() {
            crate::node::NodeInner::pool_send(&node, node_addr, msg);
            Outcome::Success(Vec::new())
        } else {
            match node.deliver_local(msg, ReplyRoute::None) {
                Ok(()) => Outcome::Success(Vec::new()),
                Err(err) => Outcome::Failure(err),
            }
        };
        post_completion::<S>(&caller, &func, outcome, None, catch, finally);
        return;
    }

    let session = node.sessions().next_id();
    msg.session = session;
    let trace = msg.trace;
    let caller_addr = caller.addr();

    let continuation_caller = caller.clone();
    let continuation_func = func.clone();
    let session_cb = SessionCallback::new(Box::new(move |m: Message| {
        // Error responses carry src 0; everything else is a payload.
        let outcome = if m.src.is_none() {
            Outcome::Failure(m.error())
        } else {
            Outcome::Success(m.payload)
        };
        post_completion::<S>(
            &continuation_caller,
            &continuation_func,
            outcome,
            success,
            catch,
            finally,
        );
    }));

    let delivered = if node_addr.is_valid() {
        node.sessions().install(session, session_cb.clone());
        crate::node::NodeInner::pool_send(&node, node_addr, msg);
        Ok(())
    } else {
        node.deliver_local(msg, ReplyRoute::Local(session_cb.clone()))
    };

    if let Err(err) = delivered {
        node.sessions().complete(session);
        session_cb.fire(synthetic_error(trace, session, caller_addr, err));
        return;
    }

    // Sole timeout/cancellation watcher: the same one-shot guarantees the
    // continuation fires exactly once whichever path wins.
    let deadline = call_ctx
        .deadline()
        .expect("call context always carries a deadline here");
    let token = call_ctx.token().clone();
    let watcher_cb = session_cb.clone();
    let node_weak = std::sync::Arc::downgrade(&node);

    tokio::spawn(async move {
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
        tokio::select! {
            _ = watcher_cb.done().cancelled() => {}
            _ = token.cancelled() => {
                if let Some(node) = node_weak.upgrade() {
                    node.sessions().complete(session);
                }
                watcher_cb.fire(synthetic_error(
                    trace,
                    session,
                    caller_addr,
                    Error::with_op(ErrorCode::Cancelled, "rpc.call", "request cancelled by context"),
                ));
            }
            _ = sleep => {
                if let Some(node) = node_weak.upgrade() {
                    node.sessions().complete(session);
                }
                watcher_cb.fire(synthetic_error(
                    trace,
                    session,
                    caller_addr,
                    Error::with_op(ErrorCode::Timeout, "rpc.call", "session deadline exceeded"),
                ));
            }
        }
    });
}

/// Builds the synthetic error response delivered through the one-shot when
/// a call fails without a peer reply.
fn synthetic_error(trace: u64, session: i32, caller: ServiceAddr, err: Error) -> Message {
    Message {
        trace,
        session,
        src: ServiceAddr::NONE,
        dst: caller,
        func_name: String::new(),
        payload: Vec::new(),
        err: Some(err.to_string()),
        timeout: None,
    }
}
