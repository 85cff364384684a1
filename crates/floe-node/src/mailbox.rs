use std::any::Any;
use std::borrow::Cow;

use floe_common::Message;

use crate::rpc_context::ReplyRoute;
use crate::service::ServiceContext;

/// Closure scheduled on a service's own worker. The `dyn Any` is the service
/// instance; the scheduler downcasts before invoking.
pub(crate) type TaskFn = Box<dyn FnOnce(&mut dyn Any, &ServiceContext) + Send>;

/// One unit of work in a service mailbox. Strict FIFO, one worker per
/// service: no two items for the same service ever run concurrently.
pub(crate) enum MailboxItem {
    /// An inbound RPC invocation with its reply route.
    Rpc(InboundRpc),
    /// A forked closure (RPC continuations use this too).
    Task { label: Cow<'static, str>, f: TaskFn },
    /// Terminates the worker after everything queued ahead of it.
    Stop,
}

pub(crate) struct InboundRpc {
    pub msg: Message,
    pub reply: ReplyRoute,
    /// Node the request came from; invalid for HTTP-originated requests.
    pub remote_node: floe_common::NodeAddr,
}
