use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use floe_common::transport::Connection;
use floe_common::{Error, ErrorCode, Message, NodeAddr, ServiceAddr};

use crate::node::NodeInner;

/// Outgoing connections, one per peer node, shared by every local service.
///
/// Peers are dialed lazily on first send. A failed connection removes its
/// entry; the next send dials again. Sessions waiting on a dead peer are
/// failed when the dial fails, otherwise their own context deadline is the
/// authoritative signal.
#[derive(Default)]
pub(crate) struct ConnectionPool {
    peers: Mutex<HashMap<NodeAddr, mpsc::UnboundedSender<Message>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender for `peer`, spawning the connection task on first use.
    pub fn sender(&self, node: &Arc<NodeInner>, peer: NodeAddr) -> mpsc::UnboundedSender<Message> {
        let mut peers = self.peers.lock().expect("pool lock poisoned");
        if let Some(tx) = peers.get(&peer) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        peers.insert(peer, tx.clone());
        tokio::spawn(run_peer(Arc::downgrade(node), peer, rx));
        tx
    }

    pub fn remove(&self, peer: NodeAddr) {
        self.peers
            .lock()
            .expect("pool lock poisoned")
            .remove(&peer);
    }

    /// Drops every sender; peer tasks drain and exit.
    pub fn shutdown(&self) {
        self.peers.lock().expect("pool lock poisoned").clear();
    }
}

async fn run_peer(
    node: Weak<NodeInner>,
    peer: NodeAddr,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let conn = match Connection::dial_tcp(peer.to_socket_addr()).await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::warn!(%peer, %err, "peer dial failed");
            let Some(node) = node.upgrade() else { return };
            // Drop the pool entry first so retries dial fresh, then fail
            // everything queued; those sessions would otherwise sit out
            // their full timeout. recv() drains until the last sender is
            // gone, so nothing slips in behind the drain.
            node.pool().remove(peer);
            while let Some(msg) = rx.recv().await {
                fail_session(&node, &msg);
            }
            return;
        }
    };

    let (mut reader, mut writer) = conn.split();

    // The peer may route requests back over this connection; replies ride
    // the same outgoing queue.
    let reply_tx = {
        let peers = node.upgrade();
        match peers {
            Some(node) => {
                let pool = node.pool();
                pool.peers
                    .lock()
                    .expect("pool lock poisoned")
                    .get(&peer)
                    .cloned()
            }
            None => None,
        }
    };

    let read_node = node.clone();
    let read_task = tokio::spawn(async move {
        loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::debug!(%peer, %err, "peer connection closed");
                    break;
                }
            };
            let msg = match Message::decode(&frame) {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(%peer, %err, "malformed frame from peer");
                    break;
                }
            };
            let Some(node) = read_node.upgrade() else { break };
            let reply = match &reply_tx {
                Some(tx) => tx.clone(),
                None => break,
            };
            crate::node::NodeInner::route_incoming(&node, msg, reply, peer);
        }
        if let Some(node) = read_node.upgrade() {
            node.pool().remove(peer);
        }
    });

    while let Some(msg) = rx.recv().await {
        let body = match msg.encode() {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(%peer, %err, "dropping unencodable message");
                continue;
            }
        };
        if let Err(err) = writer.write_frame(&body).await {
            tracing::warn!(%peer, %err, "peer write failed");
            // Affected sessions are left to their context timers.
            break;
        }
    }

    if let Some(node) = node.upgrade() {
        node.pool().remove(peer);
    }
    read_task.abort();
}

/// Fails the pending session of an undeliverable request, if it has one.
pub(crate) fn fail_session(node: &Arc<NodeInner>, msg: &Message) {
    if msg.session <= 0 {
        return;
    }
    if let Some(cb) = node.sessions().complete(msg.session) {
        let err = Error::with_op(
            ErrorCode::ServiceNotFound,
            "rpc.call",
            "peer node unreachable",
        );
        cb.fire(Message {
            trace: msg.trace,
            session: msg.session,
            src: ServiceAddr::NONE,
            dst: msg.src,
            func_name: String::new(),
            payload: Vec::new(),
            err: Some(err.to_string()),
            timeout: None,
        });
    }
}
