use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use floe_common::{Error, ErrorCode};

use crate::promise::{encode_args, post_completion, Outcome, Promise};
use crate::proxy::ProxyInner;
use crate::service::Service;

/// Default deadline for HTTP calls whose context carries none.
pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// Body of `POST /node/rpc/<service>`.
#[derive(Serialize, Deserialize)]
pub(crate) struct HttpRpcRequest {
    #[serde(rename = "Func")]
    pub func: String,
    #[serde(rename = "Post", default)]
    pub post: bool,
    #[serde(rename = "Args", default)]
    pub args: Option<Box<RawValue>>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct HttpRpcResponse {
    #[serde(rename = "Result")]
    pub result: Option<Box<RawValue>>,
}

/// Call dispatch for HTTP targets.
///
/// HTTP is JSON no matter the node codec, so the request body is built with
/// `serde_json` directly. The round trip runs on the shared pool and
/// re-enters the caller through its mailbox.
pub(crate) fn do_http_call<S: Service>(promise: Promise<S>) {
    let Promise {
        kind,
        func,
        payload,
        success,
        catch,
        finally,
        context,
    } = promise;

    let ProxyInner::Http { caller, url } = kind else {
        return;
    };

    let payload = match payload {
        Ok(payload) => payload,
        Err(err) => {
            post_completion::<S>(&caller, &func, Outcome::Failure(err), success, catch, finally);
            return;
        }
    };

    let parent = context.unwrap_or_else(|| caller.lifetime().clone());
    let call_ctx = if parent.deadline().is_some() {
        parent.child()
    } else {
        parent.child_with_timeout(DEFAULT_HTTP_TIMEOUT)
    };

    let is_post = success.is_none();
    let func_task = func.clone();

    tokio::spawn(async move {
        let deadline = call_ctx
            .deadline()
            .expect("http call context always carries a deadline");
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
        let round = round_trip(&url, &func_task, is_post, payload);

        let outcome = tokio::select! {
            _ = call_ctx.token().cancelled() => Outcome::Failure(Error::with_op(
                ErrorCode::Cancelled,
                "http.rpc",
                "request cancelled by context",
            )),
            _ = sleep => Outcome::Failure(Error::with_op(
                ErrorCode::Timeout,
                "http.rpc",
                "request deadline exceeded",
            )),
            outcome = round => outcome,
        };

        post_completion::<S>(&caller, &func_task, outcome, success, catch, finally);
    });
}

/// Fire-and-forget HTTP post; failures are logged, never surfaced.
pub(crate) fn do_http_post(
    caller: &crate::service::ServiceContext,
    url: &str,
    func: &str,
    args: &impl Serialize,
) {
    let payload = match encode_args(&floe_common::Codec::json(), args) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(service = %caller.name(), func, %err, "http post encode failed");
            return;
        }
    };
    let url = url.to_string();
    let func = func.to_string();
    let service = caller.name().to_string();

    tokio::spawn(async move {
        let result = tokio::time::timeout(
            DEFAULT_HTTP_TIMEOUT,
            round_trip(&url, &func, true, payload),
        )
        .await;
        match result {
            Ok(Outcome::Failure(err)) => {
                tracing::warn!(service = %service, func = %func, %err, "http post failed");
            }
            Err(_) => {
                tracing::warn!(service = %service, func = %func, "http post timed out");
            }
            Ok(Outcome::Success(_)) => {}
        }
    });
}

async fn round_trip(url: &str, func: &str, post: bool, payload: Vec<u8>) -> Outcome {
    let args = match String::from_utf8(payload)
        .map_err(|e| e.to_string())
        .and_then(|s| RawValue::from_string(s).map_err(|e| e.to_string()))
    {
        Ok(raw) => Some(raw),
        Err(err) => {
            return Outcome::Failure(Error::with_op(
                ErrorCode::Codec,
                "http.rpc",
                format!("argument encoding not valid json: {err}"),
            ));
        }
    };

    let body = HttpRpcRequest {
        func: func.to_string(),
        post,
        args,
    };
    let body = match serde_json::to_vec(&body) {
        Ok(body) => body,
        Err(err) => return Outcome::Failure(Error::wrap(ErrorCode::Codec, "http.rpc", err)),
    };

    let client = reqwest::Client::new();
    let response = match client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return Outcome::Failure(Error::wrap(ErrorCode::Transport, "http.rpc", err)),
    };

    let status = response.status();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return Outcome::Failure(Error::wrap(ErrorCode::Transport, "http.rpc", err)),
    };

    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        // Error bodies are the rendered error string; the code tag survives
        // the round trip.
        let err = Error::from_wire(text.trim());
        let err = match err.code() {
            ErrorCode::Unknown => Error::with_op(
                ErrorCode::Transport,
                "http.rpc",
                format!("http status {status}: {text}"),
            ),
            _ => err,
        };
        return Outcome::Failure(err);
    }

    if post {
        return Outcome::Success(Vec::new());
    }

    match serde_json::from_slice::<HttpRpcResponse>(&bytes) {
        Ok(reply) => Outcome::Success(
            reply
                .result
                .map(|raw| raw.get().as_bytes().to_vec())
                .unwrap_or_else(|| b"[]".to_vec()),
        ),
        Err(err) => Outcome::Failure(Error::wrap(ErrorCode::Codec, "http.rpc", err)),
    }
}
