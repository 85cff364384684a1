use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use serde::Serialize;

use floe_common::{Codec, Error, Result};

use crate::context::CallContext;
use crate::mailbox::{MailboxItem, TaskFn};
use crate::proxy::ProxyInner;
use crate::service::{Service, ServiceContext};

/// Canonical argument encoding: tuples serialize as JSON arrays, the empty
/// tuple as `[]`.
pub(crate) fn encode_args<T: Serialize + ?Sized>(codec: &Codec, args: &T) -> Result<Vec<u8>> {
    let bytes = codec.marshal(args)?;
    if bytes.as_slice() == b"null" {
        Ok(b"[]".to_vec())
    } else {
        Ok(bytes)
    }
}

/// Inverse of [`encode_args`]: an empty or `[]` payload decodes as the unit
/// tuple; anything else must match the handler's arity.
pub(crate) fn decode_args<T: DeserializeOwned>(codec: &Codec, payload: &[u8]) -> Result<T> {
    if payload.is_empty() || payload == &b"[]"[..] {
        if let Ok(value) = codec.unmarshal::<T>(b"null") {
            return Ok(value);
        }
    }
    codec.unmarshal(payload)
}

pub(crate) type SuccessFn<S> = Box<dyn FnOnce(&mut S, &ServiceContext, &Codec, Vec<u8>) + Send>;
pub(crate) type CatchFn<S> = Box<dyn FnOnce(&mut S, Error) + Send>;
pub(crate) type FinalFn<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Result of a call as seen by the continuation machinery.
pub(crate) enum Outcome {
    Success(Vec<u8>),
    Failure(Error),
}

/// Fluent continuation builder returned by [`crate::Proxy::call`].
///
/// Nothing happens until [`Promise::done`]; the builder only collects the
/// continuations and the optional context override. A session id is
/// assigned iff a `then` continuation is installed.
///
/// `S` is the *calling* service type: continuations run on the caller's
/// worker and receive the exclusive service reference back.
pub struct Promise<S: Service> {
    pub(crate) kind: ProxyInner,
    pub(crate) func: String,
    pub(crate) payload: Result<Vec<u8>>,
    pub(crate) success: Option<SuccessFn<S>>,
    pub(crate) catch: Option<CatchFn<S>>,
    pub(crate) finally: Option<FinalFn<S>>,
    pub(crate) context: Option<CallContext>,
}

impl<S: Service> Promise<S> {
    pub(crate) fn new(kind: ProxyInner, func: String, payload: Result<Vec<u8>>) -> Self {
        Promise {
            kind,
            func,
            payload,
            success: None,
            catch: None,
            finally: None,
            context: None,
        }
    }

    /// Installs the success continuation. The response payload decodes into
    /// `Args`; a decode failure is logged and the continuation skipped
    /// (`finally` still runs).
    pub fn then<Args, F>(mut self, f: F) -> Self
    where
        Args: DeserializeOwned + 'static,
        F: FnOnce(&mut S, Args) + Send + 'static,
    {
        let func = self.func.clone();
        self.success = Some(Box::new(
            move |svc: &mut S, ctx: &ServiceContext, codec: &Codec, payload: Vec<u8>| {
                match decode_args::<Args>(codec, &payload) {
                    Ok(args) => f(svc, args),
                    Err(err) => tracing::error!(
                        service = %ctx.name(),
                        func = %func,
                        %err,
                        "rpc response decode failed"
                    ),
                }
            },
        ));
        self
    }

    /// Installs the error continuation; the error carries its stable code.
    pub fn catch<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut S, Error) + Send + 'static,
    {
        self.catch = Some(Box::new(f));
        self
    }

    /// Runs after either continuation, success or error.
    pub fn finally<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.finally = Some(Box::new(f));
        self
    }

    /// Overrides the parent context (default: the caller service's
    /// lifetime). Without a deadline on the override, the transport-class
    /// default timeout still applies.
    pub fn with_context(mut self, ctx: CallContext) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Fires the call. Terminal: the promise is consumed.
    pub fn done(self) {
        if matches!(self.kind, ProxyInner::Dumb) {
            return;
        }
        if matches!(self.kind, ProxyInner::Http { .. }) {
            crate::proxy_http::do_http_call(self);
        } else {
            crate::proxy::do_service_call(self);
        }
    }
}

/// Posts the completion onto the caller's mailbox, so the continuation
/// observes the caller's single-threaded guarantee. Fires at most one of
/// success/catch, then finally; a missing catch logs the error with its
/// code and continues.
pub(crate) fn post_completion<S: Service>(
    caller: &ServiceContext,
    func: &str,
    outcome: Outcome,
    success: Option<SuccessFn<S>>,
    catch: Option<CatchFn<S>>,
    finally: Option<FinalFn<S>>,
) {
    let func = func.to_string();
    let func_for_closure = func.clone();
    let codec = caller.codec();

    let task: TaskFn = Box::new(move |any: &mut dyn std::any::Any, ctx: &ServiceContext| {
        let Some(svc) = any.downcast_mut::<S>() else {
            tracing::error!(func = %func_for_closure, "rpc continuation service type mismatch");
            return;
        };

        match outcome {
            Outcome::Success(payload) => {
                if let Some(success) = success {
                    if catch_unwind(AssertUnwindSafe(|| success(svc, ctx, &codec, payload)))
                        .is_err()
                    {
                        tracing::error!(
                            service = %ctx.name(),
                            func = %func_for_closure,
                            "rpc continuation panicked"
                        );
                    }
                }
            }
            Outcome::Failure(err) => match catch {
                Some(catch) => {
                    if catch_unwind(AssertUnwindSafe(|| catch(svc, err))).is_err() {
                        tracing::error!(
                            service = %ctx.name(),
                            func = %func_for_closure,
                            "rpc catch continuation panicked"
                        );
                    }
                }
                None => tracing::warn!(
                    service = %ctx.name(),
                    func = %func_for_closure,
                    code = %err.code(),
                    %err,
                    "rpc error without catch"
                ),
            },
        }

        if let Some(finally) = finally {
            if catch_unwind(AssertUnwindSafe(|| finally(svc))).is_err() {
                tracing::error!(
                    service = %ctx.name(),
                    func = %func_for_closure,
                    "rpc finally continuation panicked"
                );
            }
        }
    });

    if !caller.enqueue(MailboxItem::Task {
        label: Cow::Borrowed("rpc.continuation"),
        f: task,
    }) {
        tracing::debug!(
            service = %caller.name(),
            func = %func,
            "caller mailbox closed; rpc continuation dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_args_encode_as_empty_array() {
        let codec = Codec::default();
        assert_eq!(encode_args(&codec, &()).unwrap(), b"[]");
        let back: () = decode_args(&codec, b"[]").unwrap();
        let _ = back;
    }

    #[test]
    fn tuple_args_round_trip() {
        let codec = Codec::default();
        let encoded = encode_args(&codec, &("hi", 3)).unwrap();
        assert_eq!(encoded, br#"["hi",3]"#);
        let (s, n): (String, i32) = decode_args(&codec, &encoded).unwrap();
        assert_eq!((s.as_str(), n), ("hi", 3));
    }

    #[test]
    fn arity_mismatch_is_codec_error() {
        let codec = Codec::default();
        let encoded = encode_args(&codec, &("hi",)).unwrap();
        let err = decode_args::<(String, String)>(&codec, &encoded).unwrap_err();
        assert_eq!(err.code(), floe_common::ErrorCode::Codec);
    }

    #[test]
    fn empty_payload_decodes_as_unit() {
        let codec = Codec::default();
        let back: Result<()> = decode_args(&codec, b"");
        assert!(back.is_ok());
    }
}
