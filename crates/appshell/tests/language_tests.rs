//! Script language behavior as seen through the shell.

use std::{fs, io};

use appshell::{CollectOutput, Context, ReplError, ResourceLimits, Shell};
use pretty_assertions::assert_eq;

fn run(shell: &mut Shell, code: &str) -> String {
    let out = CollectOutput::new();
    shell
        .eval(&Context::background(), out.clone(), io::sink(), code, io::empty())
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"));
    out.output()
}

fn eval_err(shell: &mut Shell, code: &str) -> ReplError {
    match shell.eval(&Context::background(), io::sink(), io::sink(), code, io::empty()) {
        Ok(()) => panic!("{code:?} should have failed"),
        Err(err) => err,
    }
}

/// Runs each fragment in a fresh shell and compares the printed line.
fn assert_prints(cases: &[(&str, &str)]) {
    for (code, expected) in cases {
        let mut shell = Shell::new();
        assert_eq!(run(&mut shell, code), format!("{expected}\n"), "{code}");
    }
}

#[test]
fn arithmetic_and_comparison() {
    assert_prints(&[
        ("7 / 2", "3"),
        ("7 % 3", "1"),
        ("1.5 * 2", "3"),
        ("-(3 - 5)", "2"),
        ("1 << 4 | 1", "17"),
        ("2 > 1 && !false", "true"),
        (r#""abc" < "abd""#, "true"),
        ("5 > 3 ? \"yes\" : \"no\"", "yes"),
    ]);
}

#[test]
fn containers() {
    assert_prints(&[
        ("[1, 2, 3, 4][1:3]", "[2, 3]"),
        ("len([1, 2, 3])", "3"),
        ("append([1], 2, 3)", "[1, 2, 3]"),
        ("m := {a: 1}\nm.b = 2\nm", "1\n2\n{a: 1, b: 2}"),
        (r#"[{a: {b: "c"}}][0].a.b"#, "c"),
        ("[1, 2][5]", ""),
    ]);
}

#[test]
fn loops_and_iteration() {
    let mut shell = Shell::new();
    run(&mut shell, r#"s := """#);
    run(&mut shell, "for k, v in {x: 1, y: 2} { s += k + string(v) }");
    assert_eq!(run(&mut shell, "s"), "x1y2\n");

    run(&mut shell, "n := 0");
    run(&mut shell, "for n < 100 { n = n * 2 + 1 }");
    assert_eq!(run(&mut shell, "n"), "127\n");

    run(&mut shell, "evens := []");
    run(&mut shell, "for i in range(0, 10, 3) { if i % 2 == 0 { evens = append(evens, i) } }");
    assert_eq!(run(&mut shell, "evens"), "[0, 6]\n");
}

#[test]
fn conversions_and_builtins() {
    assert_prints(&[
        ("int(\"12\") + 1", "13"),
        ("string(10) + \"x\"", "10x"),
        ("type_name(1.5)", "float"),
        ("type_name({})", "map"),
        ("format(\"%d-%s\", 1, \"a\")", "1-a"),
        ("is_undefined(undefined)", "true"),
        ("'a'", "a"),
        ("copy([1, 2])", "[1, 2]"),
    ]);
}

#[test]
fn functions() {
    assert_prints(&[
        ("func(a, ...rest) { return len(rest) }(1, 2, 3)", "2"),
        ("func(x) { if x > 1 { return \"big\" }; return \"small\" }(2)", "big"),
        (
            "fib := func(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2) }\nfib(15)",
            "<compiled-function>\n610",
        ),
    ]);

    let mut shell = Shell::new();
    let err = eval_err(&mut shell, "func(a) { return a }()");
    assert!(err.to_string().contains("wrong number of arguments"), "{err}");
}

#[test]
fn immutable_values_reject_assignment() {
    let mut shell = Shell::new();
    run(&mut shell, "im := immutable([1, 2])");
    assert!(matches!(eval_err(&mut shell, "im[0] = 3"), ReplError::Runtime(_)));
    assert_eq!(run(&mut shell, "im"), "[1, 2]\n");
}

#[test]
fn builtins_cannot_be_reassigned() {
    let mut shell = Shell::new();
    let err = eval_err(&mut shell, "len = 1");
    assert!(matches!(err, ReplError::Compile(_)));
    assert!(err.to_string().contains("len"), "{err}");
}

#[test]
fn file_imports_resolve_under_the_import_root() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("lib.tengo"), "export { double: func(x) { return x * 2 } }").unwrap();
    fs::write(
        dir.path().join("wrap.tengo"),
        r#"lib := import("lib"); export func(x) { return lib.double(x) + 1 }"#,
    )
    .unwrap();

    let mut shell = Shell::new();
    let err = eval_err(&mut shell, r#"import("lib")"#);
    assert!(err.to_string().contains("module 'lib' not found"), "{err}");

    shell.allow_import_from(dir.path());
    run(&mut shell, r#"lib := import("lib")"#);
    assert_eq!(run(&mut shell, "lib.double(21)"), "42\n");
    assert_eq!(run(&mut shell, r#"import("wrap")(20)"#), "41\n");

    shell.allow_import_from("");
    assert!(matches!(eval_err(&mut shell, r#"import("lib")"#), ReplError::Compile(_)));
}

#[test]
fn cyclic_file_imports_fail_to_compile() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.tengo"), r#"b := import("b"); export 1"#).unwrap();
    fs::write(dir.path().join("b.tengo"), r#"a := import("a"); export 2"#).unwrap();

    let mut shell = Shell::new();
    shell.allow_import_from(dir.path());
    let err = eval_err(&mut shell, r#"x := import("a")"#);
    assert!(err.to_string().contains("cyclic module import"), "{err}");
    assert_eq!(shell.get_global("x"), None);
}

#[test]
fn format_rejects_huge_width_and_precision() {
    assert_prints(&[
        (r#"format("%.9999999999d", 1)"#, "%!(BADPREC)1"),
        (r#"format("%9999999999d|", 1)"#, "%!(BADWIDTH)1|"),
        (r#"format("%.3d", 7)"#, "007"),
    ]);
}

#[test]
fn range_respects_the_array_limit() {
    let mut shell = Shell::new().with_limits(ResourceLimits::new().max_array_len(5));
    assert_eq!(run(&mut shell, "range(0, 10, 2)"), "[0, 2, 4, 6, 8]\n");
    let err = eval_err(&mut shell, "range(0, 9223372036854775807, 1)");
    assert!(matches!(err, ReplError::Runtime(_)));
    assert!(err.to_string().contains("exceeding array size limit"), "{err}");
}

#[test]
fn top_level_export_ends_the_fragment() {
    let mut shell = Shell::new();
    assert_eq!(run(&mut shell, "x := 1\nexport x + 1\nx = 5"), "1\n");
    assert_eq!(run(&mut shell, "x"), "1\n");
    assert_eq!(run(&mut shell, "if x > 0 { export x }"), "");

    let err = eval_err(&mut shell, "f := func() { export 1 }");
    assert!(matches!(err, ReplError::Compile(_)));
    assert!(err.to_string().contains("export not allowed inside function"), "{err}");
}
