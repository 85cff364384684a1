use floe_common::{NodeAddr, Result};

/// External name-resolution collaborator (a registry like etcd or Consul in
/// production; a map in tests).
///
/// `resolve` is consulted after the local registry and before the static
/// route table. `deregister` runs during node stop, before transports
/// close, so peers stop routing to a draining node early.
pub trait ServiceDiscovery: Send + Sync {
    fn resolve(&self, service: &str) -> Result<NodeAddr>;

    fn deregister(&self, node: NodeAddr, services: &[String]);
}
