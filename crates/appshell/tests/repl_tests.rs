//! End-to-end tests of the session kernel: auto-print, persistent globals,
//! error reporting and stream redirection.

use std::io;

use appshell::{AUTO_PRINT_NAME, CollectOutput, Context, GLOBALS_SIZE, ReplError, Shell, Value};
use pretty_assertions::assert_eq;

/// Evaluates `code` and returns what it printed, panicking on any error.
fn run(shell: &mut Shell, code: &str) -> String {
    let out = CollectOutput::new();
    shell
        .eval(&Context::background(), out.clone(), io::sink(), code, io::empty())
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"));
    out.output()
}

fn run_err(shell: &mut Shell, code: &str) -> ReplError {
    let result = shell.eval(&Context::background(), io::sink(), io::sink(), code, io::empty());
    match result {
        Ok(()) => panic!("{code:?} should have failed"),
        Err(err) => err,
    }
}

#[test]
fn expression_is_printed_without_binding() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, "1+1"), "2\n");
    assert!(shell.globals().is_empty());
}

#[test]
fn definition_prints_and_binds() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, "x := 40 + 2"), "42\n");
    assert_eq!(shell.get_global("x"), Some(Value::Int(42)));
}

#[test]
fn globals_persist_between_fragments() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, "x := 1"), "1\n");
    assert_eq!(run(&mut shell, "x = x + 5"), "6\n");
    assert_eq!(run(&mut shell, "x"), "6\n");
    assert_eq!(shell.globals(), vec![("x".to_owned(), Value::Int(6))]);
}

#[test]
fn printf_output_precedes_the_auto_print_line() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, r#"import("fmt").printf("hi %d", 7)"#), "hi 7\n");
}

#[test]
fn strings_print_verbatim_and_quoted_inside_containers() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, r#""a" + "b""#), "ab\n");
    assert_eq!(run(&mut shell, r#"[1, "a", {k: true}]"#), "[1, \"a\", {k: true}]\n");
}

#[test]
fn nested_statements_are_not_printed() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, "if true { 5 }"), "");
    assert_eq!(run(&mut shell, "total := 0\nfor i := 1; i <= 4; i++ { total += i }"), "0\n");
    assert_eq!(run(&mut shell, "total"), "10\n");
}

#[test]
fn multi_line_fragment_prints_each_statement() {
    let mut shell = Shell::new();
    let code = "a := 2\nb := [a,\n  a * 3]\nb[1]";
    assert_eq!(run(&mut shell, code), "2\n[2, 6]\n6\n");
}

#[test]
fn closures_keep_state_across_fragments() {
    let mut shell = Shell::new();
    let code = "next := func() { n := 0; return func() { n += 1; return n } }()";
    assert_eq!(run(&mut shell, code), "<compiled-function>\n");
    assert_eq!(run(&mut shell, "next()"), "1\n");
    assert_eq!(run(&mut shell, "next()"), "2\n");
    assert_eq!(run(&mut shell, "mul := func(a, b) { return a * b }\nmul(6, 7)"), "<compiled-function>\n42\n");
}

#[test]
fn compile_error_leaves_state_untouched() {
    let mut shell = Shell::new();
    run(&mut shell, "x := 1");
    let err = run_err(&mut shell, "y + 1");
    assert!(matches!(err, ReplError::Compile(_)));
    assert!(err.to_string().starts_with("tengo: compilation error"), "{err}");
    assert_eq!(shell.globals(), vec![("x".to_owned(), Value::Int(1))]);
    assert_eq!(run(&mut shell, "x"), "1\n");
}

#[test]
fn runtime_error_keeps_earlier_assignments() {
    let mut shell = Shell::new();
    let err = run_err(&mut shell, "a := 1\na = 5\nb := a / 0");
    assert!(matches!(err, ReplError::Runtime(_)));
    let message = err.to_string();
    assert!(message.starts_with("tengo: eval error: "), "{message}");
    assert!(message.contains("division by zero"), "{message}");
    assert_eq!(shell.get_global("a"), Some(Value::Int(5)));
    assert_eq!(run(&mut shell, "a + 1"), "6\n");
}

#[test]
fn syntax_error_is_a_parse_error() {
    let mut shell = Shell::new();
    assert!(matches!(run_err(&mut shell, "x := (1 +"), ReplError::Parse(_)));
    assert_eq!(run(&mut shell, "1"), "1\n");
}

#[test]
fn parse_trims_and_checks_syntax() {
    let shell = Shell::new();
    let ctx = Context::background();

    let outcome = shell.parse(&ctx, "  x := 1\n\n");
    assert_eq!(outcome.code, "x := 1");
    assert_eq!(outcome.error, None);

    let outcome = shell.parse(&ctx, "\t1 +  ");
    assert_eq!(outcome.code, "1 +");
    assert!(outcome.error.is_some());
    assert!(shell.globals().is_empty());
}

#[test]
fn reserved_auto_print_name_cannot_be_rebound() {
    let mut shell = Shell::new();
    assert!(matches!(
        run_err(&mut shell, &format!("{AUTO_PRINT_NAME} = 1")),
        ReplError::Compile(_)
    ));
    let err = shell.set_global(AUTO_PRINT_NAME, Value::Int(1)).unwrap_err();
    assert!(matches!(err, ReplError::Global { .. }));
    assert!(shell.globals().iter().all(|(name, _)| name != AUTO_PRINT_NAME));
}

#[test]
fn host_globals_are_visible_to_scripts() {
    let mut shell = Shell::new();
    shell.set_global("name", Value::from("world")).unwrap();
    assert_eq!(run(&mut shell, r#""hello " + name"#), "hello world\n");
    run(&mut shell, "name = 3");
    assert_eq!(shell.get_global("name"), Some(Value::Int(3)));
}

#[test]
fn each_eval_writes_only_to_its_own_stdout() {
    let mut shell = Shell::new();
    let first = CollectOutput::new();
    let second = CollectOutput::new();
    let ctx = Context::background();

    run(&mut shell, r#"fmt := import("fmt")"#);
    shell
        .eval(&ctx, first.clone(), io::sink(), r#"fmt.print("one")"#, io::empty())
        .unwrap();
    let err = shell
        .eval(&ctx, first.clone(), io::sink(), r#"fmt.print("two")
x := undefined_name"#, io::empty())
        .unwrap_err();
    assert!(matches!(err, ReplError::Compile(_)));
    shell
        .eval(&ctx, second.clone(), io::sink(), r#"fmt.println("three", 3)"#, io::empty())
        .unwrap();

    assert_eq!(first.output(), "one\n");
    assert_eq!(second.output(), "three 3\n\n");
}

#[test]
fn proxies_fall_back_to_their_previous_target_after_eval() {
    let mut shell = Shell::new();
    let out = CollectOutput::new();
    shell
        .eval(&Context::background(), out.clone(), io::sink(), "1", io::empty())
        .unwrap();
    // Outside an evaluation the proxy points at the initial sink again.
    io::Write::write_all(&mut shell.stdout(), b"ignored").unwrap();
    assert_eq!(out.output(), "1\n");
}

#[test]
fn errors_are_values_not_failures() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, r#"e := error("boom")"#), "error: \"boom\"\n");
    assert_eq!(run(&mut shell, "is_error(e)"), "true\n");
    assert_eq!(run(&mut shell, "e.value"), "boom\n");
}

#[test]
fn every_stream_is_restored_after_eval() {
    let mut shell = Shell::new();
    let out = CollectOutput::new();
    let err = CollectOutput::new();
    shell
        .eval(&Context::background(), out.clone(), err.clone(), "1", io::Cursor::new(b"input".to_vec()))
        .unwrap();

    io::Write::write_all(&mut shell.stdout(), b"late").unwrap();
    io::Write::write_all(&mut shell.stderr(), b"late").unwrap();
    let mut rest = String::new();
    io::Read::read_to_string(&mut shell.stdin(), &mut rest).unwrap();
    assert_eq!(out.output(), "1\n");
    assert_eq!(err.output(), "");
    assert_eq!(rest, "");
}

#[test]
fn streams_are_restored_after_a_runtime_error() {
    let mut shell = Shell::new();
    let out = CollectOutput::new();
    let err = CollectOutput::new();
    let result = shell.eval(
        &Context::background(),
        out.clone(),
        err.clone(),
        "x := 1\nx / 0",
        io::Cursor::new(b"input".to_vec()),
    );
    assert!(matches!(result, Err(ReplError::Runtime(_))));

    io::Write::write_all(&mut shell.stdout(), b"late").unwrap();
    io::Write::write_all(&mut shell.stderr(), b"late").unwrap();
    let mut rest = String::new();
    io::Read::read_to_string(&mut shell.stdin(), &mut rest).unwrap();
    assert_eq!(out.output(), "1\n");
    assert_eq!(err.output(), "");
    assert_eq!(rest, "");
}

#[test]
fn cancelled_context_only_affects_its_own_eval() {
    let mut shell = Shell::new();
    run(&mut shell, r#"times := import("times")"#);
    let cancelled = Context::background();
    cancelled.cancel();
    let err = shell
        .eval(&cancelled, io::sink(), io::sink(), "times.sleep(0)", io::empty())
        .unwrap_err();
    assert!(err.to_string().contains("context canceled"), "{err}");
    assert_eq!(run(&mut shell, "times.sleep(0)"), "");
}

#[test]
fn split_fragments_match_one_combined_fragment() {
    let pairs = [
        ("x := 1", "y := x + 1"),
        ("m := {a: [1, 2]}", "m.a = append(m.a, 3)\nn := len(m.a)"),
        ("f := func(v) { return v * 2 }", "r := f(21)\nf = undefined"),
        ("s := \"a\"", "for i := 0; i < 3; i++ { s += \"b\" }"),
    ];
    for (first, second) in pairs {
        let mut split = Shell::new();
        run(&mut split, first);
        run(&mut split, second);
        let mut joined = Shell::new();
        run(&mut joined, &format!("{first}\n{second}"));
        assert_eq!(split.globals(), joined.globals(), "{first:?} then {second:?}");
    }
}

#[test]
fn host_global_without_a_free_slot_stays_unknown() {
    let mut shell = Shell::new();
    let mut rejected = Vec::new();
    for i in 0..GLOBALS_SIZE + 10 {
        let name = format!("h{i}");
        if shell.set_global(&name, Value::Int(i64::try_from(i).unwrap())).is_err() {
            rejected.push(name);
        }
    }
    // Slot 0 holds the auto-print function.
    assert_eq!(rejected.len(), 11);
    let name = &rejected[0];
    assert_eq!(shell.get_global(name), None);
    assert!(matches!(run_err(&mut shell, name), ReplError::Compile(_)));

    shell.set_global("h0", Value::Int(41)).unwrap();
    assert_eq!(run(&mut shell, "h0 + 1"), "42\n");
}

#[test]
fn deeply_nested_value_prints_and_rebinds() {
    let mut shell = Shell::new();
    run(&mut shell, "a := []\nfor i := 0; i < 100000; i++ { a = [a] }");
    let printed = run(&mut shell, "a");
    assert!(printed.starts_with("[[[["), "{printed}");
    assert!(printed.trim_end().contains("[...]"), "{printed}");
    assert_eq!(run(&mut shell, "a = 0"), "0\n");
}
