use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, ErrorCode, Result};
use crate::transport::MAX_FRAME_SIZE;

/// A peer connection carrying length-prefixed frames.
pub enum Connection {
    Tcp(TcpStream),
    Ws(WebSocketStream<TcpStream>),
}

impl Connection {
    pub(crate) fn tcp(stream: TcpStream) -> Self {
        Connection::Tcp(stream)
    }

    pub(crate) fn ws(stream: WebSocketStream<TcpStream>) -> Self {
        Connection::Ws(stream)
    }

    pub async fn dial_tcp(addr: SocketAddr) -> Result<Connection> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::wrap(ErrorCode::Transport, "tcp.dial", e))?;
        stream.set_nodelay(true).ok();
        Ok(Connection::Tcp(stream))
    }

    pub async fn dial_ws(addr: SocketAddr, path: &str) -> Result<Connection> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::wrap(ErrorCode::Transport, "ws.dial", e))?;
        stream.set_nodelay(true).ok();
        let url = format!("ws://{addr}{path}");
        let (ws, _) = tokio_tungstenite::client_async(url, stream)
            .await
            .map_err(|e| Error::wrap(ErrorCode::Transport, "ws.handshake", e))?;
        Ok(Connection::Ws(ws))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Connection::Tcp(s) => s.peer_addr().ok(),
            Connection::Ws(s) => s.get_ref().peer_addr().ok(),
        }
    }

    /// Splits into independent read and write halves so a reader task and a
    /// writer task can run without sharing a lock.
    pub fn split(self) -> (ConnReader, ConnWriter) {
        match self {
            Connection::Tcp(stream) => {
                let (r, w) = stream.into_split();
                (
                    ConnReader(ReadHalf::Tcp(r)),
                    ConnWriter(WriteHalf::Tcp(w)),
                )
            }
            Connection::Ws(stream) => {
                let (sink, source) = stream.split();
                (
                    ConnReader(ReadHalf::Ws {
                        stream: source,
                        buf: BytesMut::new(),
                    }),
                    ConnWriter(WriteHalf::Ws(sink)),
                )
            }
        }
    }
}

pub struct ConnReader(ReadHalf);

enum ReadHalf {
    Tcp(OwnedReadHalf),
    Ws {
        stream: SplitStream<WebSocketStream<TcpStream>>,
        buf: BytesMut,
    },
}

impl ConnReader {
    /// Reads the next frame body. Errors cover peer close, I/O failure and
    /// oversized frames; all of them mean the connection is dead.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        match &mut self.0 {
            ReadHalf::Tcp(stream) => {
                let mut len_buf = [0u8; 4];
                stream
                    .read_exact(&mut len_buf)
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "frame.read_len", e))?;
                let len = u32::from_be_bytes(len_buf) as usize;
                check_frame_len(len)?;

                let mut body = vec![0u8; len];
                stream
                    .read_exact(&mut body)
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "frame.read_body", e))?;
                Ok(body)
            }
            ReadHalf::Ws { stream, buf } => loop {
                if buf.len() >= 4 {
                    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                    check_frame_len(len)?;
                    if buf.len() >= 4 + len {
                        buf.advance(4);
                        let body = buf.split_to(len);
                        return Ok(body.to_vec());
                    }
                }

                match stream.next().await {
                    Some(Ok(WsMessage::Binary(data))) => buf.extend_from_slice(&data),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(Error::with_op(
                            ErrorCode::Transport,
                            "frame.read",
                            "websocket closed",
                        ));
                    }
                    // Control and text frames carry no frame bytes.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(Error::wrap(ErrorCode::Transport, "frame.read", e));
                    }
                }
            },
        }
    }
}

pub struct ConnWriter(WriteHalf);

enum WriteHalf {
    Tcp(OwnedWriteHalf),
    Ws(SplitSink<WebSocketStream<TcpStream>, WsMessage>),
}

impl ConnWriter {
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        check_frame_len(body.len())?;
        match &mut self.0 {
            WriteHalf::Tcp(stream) => {
                let len = (body.len() as u32).to_be_bytes();
                stream
                    .write_all(&len)
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "frame.write_len", e))?;
                stream
                    .write_all(body)
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "frame.write_body", e))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "frame.flush", e))?;
                Ok(())
            }
            WriteHalf::Ws(sink) => {
                let mut framed = Vec::with_capacity(4 + body.len());
                framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
                framed.extend_from_slice(body);
                sink.send(WsMessage::Binary(framed.into()))
                    .await
                    .map_err(|e| Error::wrap(ErrorCode::Transport, "frame.write", e))
            }
        }
    }
}

fn check_frame_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_SIZE {
        return Err(Error::with_op(
            ErrorCode::Transport,
            "frame",
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    Ok(())
}
