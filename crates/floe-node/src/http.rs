//! HTTP surface of a node: `POST /node/rpc/<service>` and `GET /health`.
//!
//! The RPC body is `{"Func": string, "Post": bool, "Args": [json-values]}`;
//! replies are `{"Result": [json-values]}` with status 200, or a textual
//! error body with a 4xx/5xx status. HTTP always speaks JSON regardless of
//! the node codec.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use floe_common::{Error, ErrorCode, Message, NodeAddr, ServiceAddr};

use crate::mailbox::{InboundRpc, MailboxItem};
use crate::node::NodeInner;
use crate::proxy_http::HttpRpcRequest;
use crate::rpc_context::ReplyRoute;

const RPC_PATH_PREFIX: &str = "/node/rpc/";

/// Reject oversized bodies before buffering them.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Server-side cap on how long a handler may sit on an HTTP request.
const HTTP_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) async fn serve(node: Arc<NodeInner>, listener: TcpListener) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                if node.is_draining() {
                    break;
                }
                tracing::warn!(%err, "http accept failed");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let node = node.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let node = node.clone();
                async move { Ok::<_, Infallible>(handle(node, req).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(%err, "http connection error");
            }
        });
    }
}

async fn handle(node: Arc<NodeInner>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();

    if req.method() == Method::GET && path == "/health" {
        return if node.is_draining() {
            text(StatusCode::SERVICE_UNAVAILABLE, "draining")
        } else {
            text(StatusCode::OK, "ok")
        };
    }

    if req.method() == Method::POST && path.starts_with(RPC_PATH_PREFIX) {
        let service = path[RPC_PATH_PREFIX.len()..].to_string();
        return handle_rpc(node, req, &service).await;
    }

    text(StatusCode::NOT_FOUND, "not found")
}

async fn handle_rpc(
    node: Arc<NodeInner>,
    req: Request<Incoming>,
    service: &str,
) -> Response<Full<Bytes>> {
    if node.is_draining() {
        return text(StatusCode::SERVICE_UNAVAILABLE, "draining");
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return text(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            );
        }
    };
    if body.len() > MAX_BODY_SIZE {
        return text(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body too large: {} bytes", body.len()),
        );
    }

    let rpc: HttpRpcRequest = match serde_json::from_slice(&body) {
        Ok(rpc) => rpc,
        Err(err) => {
            return text(StatusCode::BAD_REQUEST, format!("invalid rpc body: {err}"));
        }
    };

    let Some(entry) = node.service_by_name(service) else {
        return text(
            StatusCode::NOT_FOUND,
            format!("service {service:?} not found"),
        );
    };

    let payload = rpc
        .args
        .map(|raw| raw.get().as_bytes().to_vec())
        .unwrap_or_else(|| b"[]".to_vec());

    let msg = Message {
        session: 0,
        src: ServiceAddr::NONE,
        dst: entry.addr,
        func_name: rpc.func,
        payload,
        ..Default::default()
    };

    if rpc.post {
        let item = MailboxItem::Rpc(InboundRpc {
            msg,
            reply: ReplyRoute::None,
            remote_node: NodeAddr::INVALID,
        });
        if entry.tx.send(item).is_err() {
            return text(StatusCode::SERVICE_UNAVAILABLE, "service stopped");
        }
        return json_result(b"[]");
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let item = MailboxItem::Rpc(InboundRpc {
        msg,
        reply: ReplyRoute::Http(reply_tx),
        remote_node: NodeAddr::INVALID,
    });
    if entry.tx.send(item).is_err() {
        return text(StatusCode::SERVICE_UNAVAILABLE, "service stopped");
    }

    match tokio::time::timeout(HTTP_REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(reply)) => match reply.result {
            Ok(payload) => {
                if payload == b"null" || payload.is_empty() {
                    json_result(b"[]")
                } else {
                    json_result(&payload)
                }
            }
            Err(err) => text(status_for(&err), err.to_string()),
        },
        Ok(Err(_)) | Err(_) => text(
            StatusCode::INTERNAL_SERVER_ERROR,
            "rpc response dropped or timed out",
        ),
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err.code() {
        ErrorCode::ServiceNotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.into())))
        .expect("static response")
}

fn json_result(result: &[u8]) -> Response<Full<Bytes>> {
    let mut body = Vec::with_capacity(result.len() + 12);
    body.extend_from_slice(b"{\"Result\":");
    body.extend_from_slice(result);
    body.push(b'}');
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}
