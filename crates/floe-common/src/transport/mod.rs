//! Listener set and framed connections.
//!
//! A node accepts peers over plain TCP and/or WebSocket. Both carry the same
//! length-prefixed frame stream: WebSocket binary messages are treated as a
//! byte stream, so frame boundaries do not depend on WebSocket message
//! boundaries.

mod conn;

pub use conn::{ConnReader, ConnWriter, Connection};

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};

use crate::error::{Error, ErrorCode, Result};

/// Maximum frame body size. Oversized frames fail the connection.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Listener settings. TCP and WebSocket can be enabled at the same time; a
/// port of zero disables that listener.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tcp_host: String,
    pub tcp_port: u16,
    pub ws_host: String,
    pub ws_port: u16,
    pub ws_path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            tcp_host: "0.0.0.0".into(),
            tcp_port: 0,
            ws_host: "0.0.0.0".into(),
            ws_port: 0,
            ws_path: "/ws".into(),
        }
    }
}

/// A bound listener accepting framed connections.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Ws { listener: TcpListener, path: String },
}

impl Listener {
    /// Binds every listener the configuration enables. No listener enabled
    /// is a configuration error.
    pub async fn bind_all(cfg: &TransportConfig) -> Result<Vec<Listener>> {
        let mut listeners = Vec::new();

        if cfg.tcp_port > 0 {
            let addr = format!("{}:{}", cfg.tcp_host, cfg.tcp_port);
            let l = TcpListener::bind(&addr)
                .await
                .map_err(|e| Error::wrap(ErrorCode::Transport, "tcp.listen", e))?;
            listeners.push(Listener::Tcp(l));
        }

        if cfg.ws_port > 0 {
            let addr = format!("{}:{}", cfg.ws_host, cfg.ws_port);
            let l = TcpListener::bind(&addr)
                .await
                .map_err(|e| Error::wrap(ErrorCode::Transport, "ws.listen", e))?;
            let path = if cfg.ws_path.is_empty() {
                "/ws".to_string()
            } else {
                cfg.ws_path.clone()
            };
            listeners.push(Listener::Ws { listener: l, path });
        }

        if listeners.is_empty() {
            return Err(Error::with_op(
                ErrorCode::InvalidArgument,
                "transport",
                "no listener configured: set tcp_port or ws_port",
            ));
        }

        Ok(listeners)
    }

    pub async fn accept(&self) -> Result<Connection> {
        match self {
            Listener::Tcp(l) => {
                let (stream, _) = l
                    .accept()
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "tcp.accept", e))?;
                stream.set_nodelay(true).ok();
                Ok(Connection::tcp(stream))
            }
            Listener::Ws { listener, path } => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "ws.accept", e))?;
                stream.set_nodelay(true).ok();

                let expected = path.clone();
                let check_path = move |req: &WsRequest, rsp: WsResponse| {
                    if req.uri().path() == expected {
                        Ok(rsp)
                    } else {
                        Err(ErrorResponse::new(Some("unknown path".into())))
                    }
                };
                let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "ws.upgrade", e))?;
                Ok(Connection::ws(ws))
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let l = match self {
            Listener::Tcp(l) => l,
            Listener::Ws { listener, .. } => listener,
        };
        l.local_addr()
            .map_err(|e| Error::wrap(ErrorCode::Transport, "local_addr", e))
    }
}
