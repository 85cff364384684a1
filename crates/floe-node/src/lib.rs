//! Floe Node Runtime
//!
//! A node hosts named, single-threaded *services* and connects them with an
//! asynchronous request/response RPC that behaves the same over local
//! dispatch, TCP, WebSocket and HTTP.
//!
//! # Execution model
//!
//! Every service owns a FIFO mailbox drained by exactly one worker task:
//! RPC handlers, forked closures and promise continuations for a service
//! never run concurrently with each other. Cross-service concurrency is
//! free. Blocking work belongs on the shared pool, re-entering the service
//! through [`ServiceContext::fork`].
//!
//! # Calls
//!
//! ```no_run
//! # use floe_node::{MethodTable, RpcContext, Service, ServiceContext};
//! struct Ping {
//!     pong: Option<floe_node::Proxy>,
//! }
//!
//! impl Service for Ping {
//!     fn on_start(&mut self, ctx: &ServiceContext) {
//!         let pong = ctx.create_proxy("Pong");
//!         pong.call::<Ping>("Hello", ("hi",))
//!             .then(|_svc, (reply,): (String,)| tracing::info!(%reply))
//!             .catch(|_svc, err| tracing::warn!(%err))
//!             .done();
//!         self.pong = Some(pong);
//!     }
//! }
//!
//! struct Pong;
//!
//! impl Service for Pong {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.register("Hello", |_svc: &mut Pong, ctx: RpcContext, (msg,): (String,)| {
//!             ctx.return_args((format!("pong: {msg}"),));
//!         });
//!     }
//! }
//! ```

mod context;
mod discovery;
mod http;
mod mailbox;
mod node;
mod options;
mod pool;
mod promise;
mod proxy;
mod proxy_http;
mod registry;
mod rpc_context;
mod service;
mod session;

pub use context::CallContext;
pub use discovery::ServiceDiscovery;
pub use node::{Node, RegisterOptions};
pub use options::{NodeElement, NodeOptions, DEFAULT_STOP_GRACE};
pub use promise::Promise;
pub use proxy::Proxy;
pub use registry::{ServiceRegistration, ServiceRegistry};
pub use rpc_context::RpcContext;
pub use service::{MethodTable, Service, ServiceContext};
