use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::mailbox::MailboxItem;
use crate::service::{Service, ServiceContext};

pub(crate) type SpawnFn = Box<
    dyn Fn(
            ServiceContext,
            mpsc::UnboundedReceiver<MailboxItem>,
            oneshot::Receiver<()>,
            oneshot::Sender<()>,
        ) -> JoinHandle<()>
        + Send
        + Sync,
>;

/// Describes one registrable service: its kind, unique name, and a factory
/// that builds a fresh instance when the node starts it.
pub struct ServiceRegistration {
    pub(crate) kind: u16,
    pub(crate) name: String,
    pub(crate) spawn: SpawnFn,
}

impl ServiceRegistration {
    pub fn new<S, F>(kind: u16, name: impl Into<String>, factory: F) -> Self
    where
        S: Service,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let spawn: SpawnFn = Box::new(move |ctx, rx, gate, started| {
            crate::service::spawn_worker(factory(), ctx, rx, gate, started)
        });
        ServiceRegistration {
            kind,
            name: name.into(),
            spawn,
        }
    }

    pub fn kind(&self) -> u16 {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registration list with automatic kind assignment, for callers that do
/// not care about stable kinds.
#[derive(Default)]
pub struct ServiceRegistry {
    registrations: Vec<ServiceRegistration>,
    next_kind: u16,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry {
            registrations: Vec::new(),
            next_kind: 0,
        }
    }

    /// Registers `S` under `name` with the next free kind.
    pub fn register<S, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        S: Service,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.next_kind += 1;
        self.registrations
            .push(ServiceRegistration::new(self.next_kind, name, factory));
        self
    }

    /// All registered names, in registration order. Feeds directly into a
    /// node element's service list.
    pub fn service_names(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn into_registrations(self) -> Vec<ServiceRegistration> {
        self.registrations
    }
}
