//! The `jsonrpc` module against a minimal HTTP server on a local port.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::TcpListener,
    sync::mpsc::{self, Receiver},
    thread,
};

use appshell::{CollectOutput, Context, ReplError, Shell};
use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

/// Serves `count` requests, answering each with `respond(request body)`.
/// Returns the endpoint URL and the received request bodies.
fn serve(count: usize, respond: impl Fn(&Json) -> (u16, String) + Send + 'static) -> (String, Receiver<Json>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/rpc", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for stream in listener.incoming().take(count) {
            let mut stream = stream.unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
            let request: Json = serde_json::from_slice(&body).unwrap();

            let (status, reply) = respond(&request);
            tx.send(request).unwrap();
            let head = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                reply.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(reply.as_bytes()).unwrap();
        }
    });
    (endpoint, rx)
}

fn echo(request: &Json) -> (u16, String) {
    let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"]});
    (200, reply.to_string())
}

fn run(shell: &mut Shell, code: &str) -> Result<String, ReplError> {
    let out = CollectOutput::new();
    shell.eval(&Context::background(), out.clone(), io::sink(), code, io::empty())?;
    Ok(out.output())
}

fn rpc_shell() -> Shell {
    let mut shell = Shell::new();
    shell.enable_jsonrpc_client();
    run(&mut shell, r#"rpc := import("jsonrpc")"#).unwrap();
    shell
}

#[test]
fn echo_calls_number_their_requests() {
    let (endpoint, requests) = serve(2, echo);
    let mut shell = rpc_shell();

    let output = run(&mut shell, &format!(r#"r := rpc.call("{endpoint}", "echo", {{a: 1}})"#)).unwrap();
    assert_eq!(output, "{a: 1}\n");
    let output = run(&mut shell, &format!(r#"rpc.call("{endpoint}", "echo", [r.a, "two"])"#)).unwrap();
    assert_eq!(output, "[1, \"two\"]\n");

    let first = requests.recv().unwrap();
    assert_eq!(
        first,
        json!({"jsonrpc": "2.0", "method": "echo", "params": {"a": 1}, "id": "1"})
    );
    assert_eq!(requests.recv().unwrap()["id"], "2");
}

#[test]
fn server_error_is_a_runtime_error() {
    let (endpoint, _requests) = serve(1, |request| {
        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": -32601, "message": "no such method"}});
        (200, reply.to_string())
    });
    let mut shell = rpc_shell();
    let err = run(&mut shell, &format!(r#"rpc.call("{endpoint}", "nope", {{}})"#)).unwrap_err();
    assert!(matches!(err, ReplError::Runtime(_)));
    assert!(err.to_string().contains("[json-rpc-error: -32601] no such method"), "{err}");
}

#[test]
fn bad_status_and_empty_result() {
    let (endpoint, _requests) = serve(2, |request| {
        if request["method"] == "broken" {
            (500, String::new())
        } else {
            (200, json!({"jsonrpc": "2.0", "id": request["id"], "result": null}).to_string())
        }
    });
    let mut shell = rpc_shell();

    let err = run(&mut shell, &format!(r#"rpc.call("{endpoint}", "broken", 1)"#)).unwrap_err();
    assert!(
        err.to_string().contains("[json-rpc-error: -32603] unexpected status code from server: 500"),
        "{err}"
    );
    let err = run(&mut shell, &format!(r#"rpc.call("{endpoint}", "void", 1)"#)).unwrap_err();
    assert!(err.to_string().contains("[json-rpc-error: -32603] empty result"), "{err}");
}

#[test]
fn module_is_absent_unless_enabled() {
    let mut shell = Shell::new();
    let err = run(&mut shell, r#"import("jsonrpc")"#).unwrap_err();
    assert!(matches!(err, ReplError::Compile(_)));
}

#[test]
fn unserializable_params_are_rejected_before_sending() {
    let mut shell = rpc_shell();
    let err = run(&mut shell, r#"rpc.call("http://127.0.0.1:1/", "m", func() {})"#).unwrap_err();
    assert!(err.to_string().contains("json serializable"), "{err}");
}
