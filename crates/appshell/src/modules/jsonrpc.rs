//! The `jsonrpc` module: a JSON-RPC 2.0 client over HTTP POST.
//!
//! Requests run on a helper thread while the evaluating thread polls the
//! kernel's context, so cancelling the context abandons the call.

use std::{
    cell::Cell,
    rc::Rc,
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use reqwest::{StatusCode, blocking::Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{expect_args, register, text::format_radix};
use crate::{
    context::{Context, ContextSlot},
    convert::{from_json, to_json},
    exception::RuntimeError,
    resource::ResourceLimits,
    value::{Value, ValueMap},
};

/// JSON-RPC "internal error", used for failures detected on the client side.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Json,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Json>,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl Reply {
    fn internal(message: String) -> Self {
        Self {
            result: None,
            error: Some(ReplyError {
                code: INTERNAL_ERROR_CODE,
                message,
            }),
        }
    }
}

/// Builds the module. `counter` numbers calls across every evaluation of one
/// kernel; `ctx` is read at call time.
pub fn module(ctx: &ContextSlot, counter: Rc<Cell<u64>>) -> ValueMap {
    let ctx = Rc::clone(ctx);
    let mut attrs = ValueMap::new();
    register(&mut attrs, "call", move |limits, args| {
        let current = ctx.borrow().clone();
        call(&current, &counter, limits, args)
    });
    attrs
}

fn call(ctx: &Context, counter: &Cell<u64>, limits: &ResourceLimits, args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args(args, 3)?;
    let endpoint = string_arg(args, 0, "endpoint")?;
    let method = string_arg(args, 1, "method")?;
    let params = to_json(&args[2])
        .map_err(|_| RuntimeError::invalid_argument("params", "any (json serializable)", args[2].type_name()))?;

    counter.set(counter.get().saturating_add(1));
    let id = format_radix(i64::try_from(counter.get()).unwrap_or(i64::MAX), 36);
    let request = Request {
        jsonrpc: "2.0",
        method: &method,
        params,
        id,
    };
    let body = serde_json::to_vec(&request).map_err(|error| RuntimeError::custom(error.to_string()))?;
    tracing::debug!(%endpoint, %method, id = %request.id, "json-rpc call");

    let reply = post(ctx, endpoint, body)?;
    reply_value(reply, limits)
}

fn string_arg(args: &[Value], index: usize, name: &str) -> Result<String, RuntimeError> {
    match &args[index] {
        Value::String(value) => Ok(value.to_string()),
        other => Err(RuntimeError::invalid_argument(name, "string", other.type_name())),
    }
}

fn post(ctx: &Context, endpoint: String, body: Vec<u8>) -> Result<Reply, RuntimeError> {
    ctx.check()?;
    let timeout = ctx.remaining();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone when the caller gave up on the request.
        let _ = tx.send(send(&endpoint, body, timeout));
    });
    loop {
        ctx.check()?;
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(outcome) => return outcome.map_err(|error| RuntimeError::custom(error.to_string())),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err(RuntimeError::custom("json-rpc request aborted")),
        }
    }
}

fn send(endpoint: &str, body: Vec<u8>, timeout: Option<Duration>) -> Result<Reply, reqwest::Error> {
    let client = Client::builder().build()?;
    let mut request = client
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .body(body);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let response = request.send()?;
    let status = response.status();
    if status != StatusCode::OK {
        return Ok(Reply::internal(format!(
            "unexpected status code from server: {}",
            status.as_u16()
        )));
    }
    let bytes = response.bytes()?;
    Ok(serde_json::from_slice(&bytes).unwrap_or_else(|error| Reply::internal(format!("decoding error: {error}"))))
}

fn reply_value(reply: Reply, limits: &ResourceLimits) -> Result<Value, RuntimeError> {
    if let Some(error) = reply.error.filter(|error| error.code != 0) {
        return Err(rpc_error(error.code, &error.message));
    }
    let Some(result) = reply.result else {
        return Err(rpc_error(INTERNAL_ERROR_CODE, "empty result"));
    };
    from_json(&result, limits).map_err(|error| rpc_error(INTERNAL_ERROR_CODE, &format!("decoding error: {error}")))
}

fn rpc_error(code: i64, message: &str) -> RuntimeError {
    RuntimeError::custom(format!("[json-rpc-error: {code}] {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> Reply {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn server_errors_carry_their_code() {
        let err = reply_value(
            reply(r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"no such method"}}"#),
            &ResourceLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "[json-rpc-error: -32601] no such method");
    }

    #[test]
    fn null_result_is_empty() {
        let err = reply_value(reply(r#"{"jsonrpc":"2.0","id":"1","result":null}"#), &ResourceLimits::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "[json-rpc-error: -32603] empty result");
    }

    #[test]
    fn result_converts_to_a_value() {
        let value = reply_value(
            reply(r#"{"jsonrpc":"2.0","id":"1","result":[1,"a"],"error":null}"#),
            &ResourceLimits::default(),
        )
        .unwrap();
        assert_eq!(value, Value::array(vec![Value::Int(1), Value::from("a")]));
    }

    #[test]
    fn arguments_are_checked_before_sending() {
        let counter = Cell::new(0);
        let ctx = Context::background();
        let limits = ResourceLimits::default();
        let err = call(&ctx, &counter, &limits, &[Value::from("http://x"), Value::Int(1), Value::Undefined])
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid type for argument 'method': expected string, found int");
        let err = call(&ctx, &counter, &limits, &[Value::from("http://x")]).unwrap_err();
        assert_eq!(err, RuntimeError::WrongNumArguments);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn cancelled_context_stops_the_call() {
        let counter = Cell::new(0);
        let ctx = Context::background();
        ctx.cancel();
        let args = [Value::from("http://127.0.0.1:9"), Value::from("echo"), Value::Undefined];
        let err = call(&ctx, &counter, &ResourceLimits::default(), &args).unwrap_err();
        assert_eq!(err, RuntimeError::Context(crate::context::ContextError::Cancelled));
    }
}
