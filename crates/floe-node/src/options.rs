use std::collections::BTreeMap;
use std::time::Duration;

use floe_common::{Error, ErrorCode, NodeAddr, Result};
use floe_config::Section;

/// Default grace period for in-flight handlers at stop.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Node topology configuration: which node this process is, and where every
/// node of the cluster listens.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Name of the element this process runs as.
    pub node_name: String,
    /// IPv4 this node binds and advertises.
    pub local_ip: String,
    /// All known nodes, including this one. Doubles as the static fallback
    /// route table: a service name maps to the first element listing it.
    pub nodes: BTreeMap<String, NodeElement>,
    /// Service dependency edges; a service starts after its dependencies.
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub stop_grace: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct NodeElement {
    /// Advertised host; falls back to the cluster's `local_ip` when empty.
    pub host: Option<String>,
    /// TCP transport port; 0 disables the TCP listener.
    pub port: u16,
    /// HTTP RPC/health port; 0 disables the HTTP server.
    pub http_port: u16,
    /// WebSocket transport port; 0 disables the WebSocket listener.
    pub ws_port: u16,
    /// Services hosted on this element.
    pub services: Vec<String>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl NodeOptions {
    pub fn new(node_name: impl Into<String>, local_ip: impl Into<String>) -> Self {
        NodeOptions {
            node_name: node_name.into(),
            local_ip: local_ip.into(),
            nodes: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn element(mut self, name: impl Into<String>, element: NodeElement) -> Self {
        self.nodes.insert(name.into(), element);
        self
    }

    pub fn dependency(mut self, service: impl Into<String>, on: &[&str]) -> Self {
        self.dependencies
            .insert(service.into(), on.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Reads the options from a configuration section laid out as
    ///
    /// ```text
    /// BootName = <name>
    /// LocalIP = <ipv4>
    /// Nodes:<name>:Port / HttpPort / WsPort
    /// Nodes:<name>:Services:<index> = <service>
    /// Dependencies:<service>:<index> = <service>
    /// ```
    pub fn from_section(section: &Section) -> Result<Self> {
        let node_name = section.get("BootName");
        if node_name.is_empty() {
            return Err(Error::with_op(
                ErrorCode::InvalidArgument,
                "node.options",
                "BootName missing",
            ));
        }
        let local_ip = section.get("LocalIP");
        if local_ip.is_empty() {
            return Err(Error::with_op(
                ErrorCode::InvalidArgument,
                "node.options",
                "LocalIP missing",
            ));
        }

        let mut options = NodeOptions::new(node_name, local_ip);

        let nodes = section.section("Nodes");
        for name in nodes.child_keys() {
            let node = nodes.section(&name);
            let element = NodeElement {
                host: node.try_get("Host").filter(|h| !h.is_empty()),
                port: parse_port(&node, "Port")?,
                http_port: parse_port(&node, "HttpPort")?,
                ws_port: parse_port(&node, "WsPort")?,
                services: indexed_values(&node.section("Services")),
            };
            options.nodes.insert(name, element);
        }

        let deps = section.section("Dependencies");
        for service in deps.child_keys() {
            let targets = indexed_values(&deps.section(&service));
            options.dependencies.insert(service, targets);
        }

        Ok(options)
    }

    pub fn local_element(&self) -> Option<&NodeElement> {
        self.nodes.get(&self.node_name)
    }

    /// The address this node advertises for its TCP transport.
    pub fn listen_addr(&self) -> Result<NodeAddr> {
        let element = self.local_element().ok_or_else(|| {
            Error::with_op(
                ErrorCode::InvalidArgument,
                "node.options",
                format!("node {:?} not present in configuration", self.node_name),
            )
        })?;
        NodeAddr::new(&self.local_ip, element.port)
    }

    /// Static fallback route: the first element hosting `service`.
    pub(crate) fn static_route(&self, service: &str) -> Option<NodeAddr> {
        for element in self.nodes.values() {
            if element.services.iter().any(|s| s == service) {
                let host = element.host.as_deref().unwrap_or(&self.local_ip);
                return NodeAddr::new(host, element.port).ok();
            }
        }
        None
    }
}

fn parse_port(section: &Section, key: &str) -> Result<u16> {
    match section.try_get(key) {
        None => Ok(0),
        Some(raw) if raw.is_empty() => Ok(0),
        Some(raw) => raw.parse().map_err(|_| {
            Error::with_op(
                ErrorCode::InvalidArgument,
                "node.options",
                format!("{key} is not a port: {raw:?}"),
            )
        }),
    }
}

/// Collects `0..n` indexed children in index order.
fn indexed_values(section: &Section) -> Vec<String> {
    let mut keys: Vec<(usize, String)> = section
        .child_keys()
        .into_iter()
        .filter_map(|k| k.parse::<usize>().ok().map(|i| (i, k)))
        .collect();
    keys.sort();
    keys.into_iter()
        .map(|(_, key)| section.get(&key))
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_config::sources::MemorySource;
    use floe_config::ConfigurationManager;

    #[test]
    fn from_section_reads_topology() {
        let config = ConfigurationManager::new();
        config.add_source(
            &MemorySource::default()
                .entry("Node:BootName", "MyNode")
                .entry("Node:LocalIP", "127.0.0.1")
                .entry("Node:Nodes:MyNode:Port", "8000")
                .entry("Node:Nodes:MyNode:HttpPort", "8080")
                .entry("Node:Nodes:MyNode:Services:0", "Ping")
                .entry("Node:Nodes:MyNode:Services:1", "Pong")
                .entry("Node:Dependencies:Ping:0", "Pong"),
        );

        let options = NodeOptions::from_section(&config.section("Node")).unwrap();
        assert_eq!(options.node_name, "MyNode");
        let element = options.local_element().unwrap();
        assert_eq!(element.port, 8000);
        assert_eq!(element.http_port, 8080);
        assert_eq!(element.services, vec!["Ping", "Pong"]);
        assert_eq!(options.dependencies["Ping"], vec!["Pong"]);
        assert_eq!(
            options.listen_addr().unwrap(),
            NodeAddr::new("127.0.0.1", 8000).unwrap()
        );
    }

    #[test]
    fn missing_boot_name_is_invalid() {
        let config = ConfigurationManager::new();
        config.add_source(&MemorySource::default().entry("Node:LocalIP", "127.0.0.1"));
        let err = NodeOptions::from_section(&config.section("Node")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn bad_port_is_invalid() {
        let config = ConfigurationManager::new();
        config.add_source(
            &MemorySource::default()
                .entry("Node:BootName", "N")
                .entry("Node:LocalIP", "127.0.0.1")
                .entry("Node:Nodes:N:Port", "not-a-port"),
        );
        let err = NodeOptions::from_section(&config.section("Node")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn static_route_finds_hosting_element() {
        let options = NodeOptions::new("A", "127.0.0.1")
            .element(
                "A",
                NodeElement {
                    port: 8000,
                    services: vec!["Ping".into()],
                    ..Default::default()
                },
            )
            .element(
                "B",
                NodeElement {
                    host: Some("10.0.0.2".into()),
                    port: 9000,
                    services: vec!["Pong".into()],
                    ..Default::default()
                },
            );

        assert_eq!(
            options.static_route("Pong"),
            Some(NodeAddr::new("10.0.0.2", 9000).unwrap())
        );
        assert_eq!(options.static_route("Nope"), None);
    }
}
