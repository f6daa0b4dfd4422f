//! Snapshot and restore of session globals.

use std::io;

use appshell::{CollectOutput, Context, Failed, ReplError, Shell, SnapshotDocument, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

fn run(shell: &mut Shell, code: &str) -> String {
    let out = CollectOutput::new();
    shell
        .eval(&Context::background(), out.clone(), io::sink(), code, io::empty())
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"));
    out.output()
}

fn snapshot_bytes(shell: &Shell) -> Vec<u8> {
    let mut bytes = Vec::new();
    shell.snapshot(&Context::background(), &mut bytes).unwrap();
    bytes
}

#[test]
fn restored_session_sees_the_same_values() {
    let mut shell = Shell::new();
    run(&mut shell, "x := 1");
    run(&mut shell, "x = x + 5");
    let bytes = snapshot_bytes(&shell);

    let mut restored = Shell::new();
    restored
        .restore_snapshot(&Context::background(), bytes.as_slice())
        .unwrap();
    assert_eq!(run(&mut restored, "x"), "6\n");
    assert_eq!(run(&mut restored, "x * 2"), "12\n");
}

#[test]
fn document_lists_data_and_failed_names() {
    let mut shell = Shell::new();
    run(
        &mut shell,
        r#"n := 3
f := 2.5
s := "text"
flags := [true, false]
m := {k: [1, {z: "y"}]}
im := immutable({a: 1})
b := bytes("hi")
callback := func() { return 1 }
with_fn := [1, callback]
nothing := undefined"#,
    );

    let document: SnapshotDocument = serde_json::from_slice(&snapshot_bytes(&shell)).unwrap();
    let data: serde_json::Value = serde_json::to_value(&document.data).unwrap();
    assert_eq!(
        data,
        json!({
            "b": "aGk=",
            "f": 2.5,
            "flags": [true, false],
            "im": {"a": 1},
            "m": {"k": [1, {"z": "y"}]},
            "n": 3,
            "s": "text",
        })
    );
    let mut failed: Vec<&str> = document.failed.keys().map(String::as_str).collect();
    failed.sort_unstable();
    assert_eq!(failed, ["callback", "nothing", "with_fn"]);
}

#[test]
fn failed_entries_serialize_as_empty_objects() {
    let mut shell = Shell::new();
    run(&mut shell, "g := func() {}");
    let text = String::from_utf8(snapshot_bytes(&shell)).unwrap();
    assert_eq!(text, "{\"data\":{},\"failed\":{\"g\":{}}}\n");
}

#[test]
fn restore_keeps_unrelated_globals_and_overwrites_named_ones() {
    let mut shell = Shell::new();
    run(&mut shell, "a := 1\nb := \"old\"");

    let document = r#"{"data": {"b": "new", "c": {"list": [1.5, null]}}, "failed": {"x": {}}, "extra": 1}"#;
    shell
        .restore_snapshot(&Context::background(), document.as_bytes())
        .unwrap();

    assert_eq!(run(&mut shell, "a"), "1\n");
    assert_eq!(run(&mut shell, "b"), "new\n");
    assert_eq!(run(&mut shell, "c.list[0]"), "1.5\n");
    assert_eq!(shell.get_global("x"), None);
}

#[test]
fn malformed_documents_are_rejected() {
    let mut shell = Shell::new();
    let err = shell
        .restore_snapshot(&Context::background(), &b"{\"data\": [1, 2"[..])
        .unwrap_err();
    assert!(matches!(err, ReplError::Snapshot(_)));
    assert!(shell.globals().is_empty());
}

#[test]
fn empty_session_snapshot() {
    let shell = Shell::new();
    let document: SnapshotDocument = serde_json::from_slice(&snapshot_bytes(&shell)).unwrap();
    assert_eq!(document, SnapshotDocument::default());

    let restored: SnapshotDocument = serde_json::from_str(r#"{"failed": {"q": {}}}"#).unwrap();
    assert!(restored.data.is_empty());
    assert_eq!(restored.failed.get("q"), Some(&Failed {}));
}

#[test]
fn undecodable_entries_are_skipped_on_restore() {
    let mut shell = Shell::new();
    let document = r#"{"data": {"ok": 1, "bad": 12e999999}, "failed": {}}"#;
    shell
        .restore_snapshot(&Context::background(), document.as_bytes())
        .unwrap();
    assert_eq!(shell.get_global("ok"), Some(Value::Int(1)));
    assert_eq!(shell.get_global("bad"), None);
}

#[test]
fn deeply_nested_global_is_listed_as_failed() {
    let mut shell = Shell::new();
    run(&mut shell, "a := []\nfor i := 0; i < 100000; i++ { a = [a] }\nb := [[1]]");
    let document: SnapshotDocument = serde_json::from_slice(&snapshot_bytes(&shell)).unwrap();
    assert_eq!(document.failed.keys().collect::<Vec<_>>(), ["a"]);
    assert_eq!(serde_json::to_value(&document.data).unwrap(), json!({"b": [[1]]}));
}
