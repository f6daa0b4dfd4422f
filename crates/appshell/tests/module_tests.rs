//! The registry of importable modules as scripts see it.

use std::io;

use appshell::{CollectOutput, Context, ResourceLimits, SAFE_MODULES, Shell};
use pretty_assertions::assert_eq;

fn run(shell: &mut Shell, code: &str) -> String {
    let out = CollectOutput::new();
    shell
        .eval(&Context::background(), out.clone(), io::sink(), code, io::empty())
        .unwrap_or_else(|err| panic!("{code:?} failed: {err}"));
    out.output()
}

#[test]
fn every_safe_module_imports() {
    let mut shell = Shell::new();
    for name in SAFE_MODULES {
        run(&mut shell, &format!(r#"is_map(import("{name}"))"#));
    }
    assert_eq!(run(&mut shell, r#"is_immutable_map(import("fmt"))"#), "true\n");
}

#[test]
fn text_and_math() {
    let mut shell = Shell::new();
    run(&mut shell, r#"text := import("text")"#);
    run(&mut shell, r#"math := import("math")"#);
    assert_eq!(run(&mut shell, r#"text.to_upper("abc")"#), "ABC\n");
    assert_eq!(run(&mut shell, r#"text.join(text.split("a,b,c", ","), "-")"#), "a-b-c\n");
    assert_eq!(run(&mut shell, r#"text.re_match("^a+$", "aaa")"#), "true\n");
    assert_eq!(run(&mut shell, "math.max(3, 9)"), "9\n");
    assert_eq!(run(&mut shell, "math.floor(2.7)"), "2\n");
}

#[test]
fn json_and_encodings() {
    let mut shell = Shell::new();
    run(&mut shell, r#"json := import("json")"#);
    assert_eq!(run(&mut shell, "string(json.encode({a: [1, 2]}))"), "{\"a\":[1,2]}\n");
    assert_eq!(run(&mut shell, r#"json.decode(`{"b": true}`).b"#), "true\n");

    run(&mut shell, r#"base64 := import("base64")"#);
    run(&mut shell, r#"hex := import("hex")"#);
    assert_eq!(run(&mut shell, r#"base64.encode(bytes("hi"))"#), "aGk=\n");
    assert_eq!(run(&mut shell, r#"string(base64.decode("aGk="))"#), "hi\n");
    assert_eq!(run(&mut shell, r#"hex.encode(bytes("hi"))"#), "6869\n");
    assert_eq!(run(&mut shell, r#"is_error(hex.decode("zz"))"#), "true\n");
}

#[test]
fn fmt_writes_to_the_eval_stdout() {
    let mut shell = Shell::new();
    run(&mut shell, r#"fmt := import("fmt")"#);
    assert_eq!(run(&mut shell, r#"fmt.print("a", 1, "b")"#), "a1b\n");
    assert_eq!(run(&mut shell, r#"fmt.println("a", 1)"#), "a 1\n\n");
    assert_eq!(run(&mut shell, r#"fmt.printf("%s=%d\n", "x", 2)"#), "x=2\n\n");
    assert_eq!(run(&mut shell, r#"fmt.sprintf("%05.1f", 3.14159)"#), "003.1\n");
}

#[test]
fn fmt_respects_the_string_limit() {
    let mut shell = Shell::new().with_limits(ResourceLimits::new().max_string_len(8));
    run(&mut shell, r#"fmt := import("fmt")"#);
    let err = shell
        .eval(
            &Context::background(),
            io::sink(),
            io::sink(),
            r#"fmt.sprintf("%s%s", "abcde", "fghij")"#,
            io::empty(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("exceeding string size limit"), "{err}");
}

#[test]
fn rand_is_reproducible_after_seeding() {
    let mut shell = Shell::new();
    run(&mut shell, r#"rand := import("rand")"#);
    run(&mut shell, "rand.seed(42)");
    let first = run(&mut shell, "[rand.intn(1000), rand.intn(1000)]");
    run(&mut shell, "rand.seed(42)");
    assert_eq!(run(&mut shell, "[rand.intn(1000), rand.intn(1000)]"), first);
}

#[test]
fn times_durations() {
    let mut shell = Shell::new();
    run(&mut shell, r#"times := import("times")"#);
    assert_eq!(run(&mut shell, "times.duration_string(90 * times.second)"), "1m30s\n");
    assert_eq!(run(&mut shell, r#"times.parse_duration("150ms") == 150 * times.millisecond"#), "true\n");
}

#[test]
fn add_date_out_of_range_is_an_error_value() {
    let mut shell = Shell::new();
    run(&mut shell, r#"times := import("times")"#);
    run(&mut shell, "t := times.add_date(times.now(), 9223372036854775807, 0, 0)");
    assert_eq!(run(&mut shell, "t.value"), "time: date out of range\n");
    assert_eq!(run(&mut shell, "is_error(times.add_date(times.now(), 0, -9223372036854775807, 0))"), "true\n");
    assert_eq!(run(&mut shell, "times.time_year(times.add_date(times.date(2024, 1, 31), 1, 1, 0))"), "2025\n");
}

#[test]
fn rand_perm_respects_the_array_limit() {
    let mut shell = Shell::new().with_limits(ResourceLimits::new().max_array_len(10));
    run(&mut shell, r#"rand := import("rand")"#);
    assert_eq!(run(&mut shell, "len(rand.perm(10))"), "10\n");
    let err = shell
        .eval(&Context::background(), io::sink(), io::sink(), "rand.perm(100000000000)", io::empty())
        .unwrap_err();
    assert!(err.to_string().contains("exceeding array size limit"), "{err}");
}
