//! printf-style formatting of script values.
//!
//! Verbs, flags, width and precision follow the conventions of C/Go `printf`:
//! `%v %d %s %q %x %X %o %O %b %c %U %e %E %f %F %g %G %t %T %%`, the flags
//! `-+# 0`, and `*` for width or precision taken from the argument list.
//! Misuse is reported inline rather than as an error: `%!d(string=hi)` for a
//! verb that does not apply, `%!d(MISSING)` when arguments run out and
//! `%!(EXTRA int=1)` when some are left over. A width or precision above
//! [`MAX_WIDTH`] is dropped and reported as `%!(BADWIDTH)` or `%!(BADPREC)`.

use std::fmt::Write as _;

use crate::{exception::RuntimeError, resource::ResourceLimits, value::Value};

/// Largest width or precision a directive may ask for.
pub const MAX_WIDTH: usize = 1_000_000;

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    minus: bool,
    plus: bool,
    space: bool,
    zero: bool,
    sharp: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Formats `args` according to `template`.
///
/// Fails only when the output would exceed the string size limit.
pub fn format(template: &str, args: &[Value], limits: &ResourceLimits) -> Result<String, RuntimeError> {
    let mut out = String::with_capacity(template.len());
    let mut next_arg = 0;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if out.len() > limits.max_string_len {
            return Err(RuntimeError::StringLimit);
        }
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.minus = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.sharp = true,
                _ => break,
            }
            chars.next();
        }

        let star_arg = |next_arg: &mut usize| -> Option<usize> {
            let value = args.get(*next_arg).and_then(|arg| match arg {
                Value::Int(n) => usize::try_from(*n).ok().filter(|n| *n <= MAX_WIDTH),
                _ => None,
            });
            *next_arg += 1;
            value
        };

        if chars.peek() == Some(&'*') {
            chars.next();
            spec.width = star_arg(&mut next_arg);
            if spec.width.is_none() {
                out.push_str("%!(BADWIDTH)");
            }
        } else {
            spec.width = read_number(&mut chars);
            if spec.width.is_some_and(|width| width > MAX_WIDTH) {
                spec.width = None;
                out.push_str("%!(BADWIDTH)");
            }
        }

        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                spec.precision = star_arg(&mut next_arg);
                if spec.precision.is_none() {
                    out.push_str("%!(BADPREC)");
                }
            } else {
                spec.precision = Some(read_number(&mut chars).unwrap_or(0));
                if spec.precision.is_some_and(|precision| precision > MAX_WIDTH) {
                    spec.precision = None;
                    out.push_str("%!(BADPREC)");
                }
            }
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(arg) = args.get(next_arg) else {
            let _ = write!(out, "%!{verb}(MISSING)");
            continue;
        };
        next_arg += 1;

        match format_arg(spec, verb, arg) {
            Some(text) => out.push_str(&text),
            None => {
                let _ = write!(out, "%!{verb}({}={})", arg.type_name(), plain(arg));
            }
        }
    }

    if next_arg < args.len() {
        out.push_str("%!(EXTRA ");
        for (i, arg) in args[next_arg..].iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}={}", arg.type_name(), plain(arg));
        }
        out.push(')');
    }

    if out.len() > limits.max_string_len {
        return Err(RuntimeError::StringLimit);
    }
    Ok(out)
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(digit as usize));
    }
    value
}

/// `%v` rendering used inside error annotations.
fn plain(arg: &Value) -> String {
    format_arg(Spec::default(), 'v', arg).unwrap_or_else(|| arg.to_string())
}

fn format_arg(spec: Spec, verb: char, arg: &Value) -> Option<String> {
    if verb == 'T' {
        return Some(pad(spec, arg.type_name()));
    }
    match arg {
        Value::Int(value) => format_int(spec, verb, *value),
        Value::Float(value) => format_float(spec, verb, *value),
        Value::Bool(value) => matches!(verb, 't' | 'v').then(|| pad(spec, value.to_string())),
        Value::Char(value) => format_char(spec, verb, *value),
        Value::String(value) => format_str(spec, verb, value),
        Value::Bytes(value) => match verb {
            'v' | 'd' => {
                let items: Vec<String> = value.iter().map(u8::to_string).collect();
                Some(pad(spec, format!("[{}]", items.join(" "))))
            }
            _ => format_str(spec, verb, &String::from_utf8_lossy(value)),
        },
        Value::Cell(cell) => format_arg(spec, verb, &cell.borrow()),
        other => format_str(spec, verb, &other.to_string()),
    }
}

fn format_int(spec: Spec, verb: char, value: i64) -> Option<String> {
    let magnitude = value.unsigned_abs();
    let mut digits = match verb {
        'd' | 'v' => magnitude.to_string(),
        'b' => format!("{magnitude:b}"),
        'o' | 'O' => format!("{magnitude:o}"),
        'x' => format!("{magnitude:x}"),
        'X' => format!("{magnitude:X}"),
        'c' | 'q' | 'U' => {
            let c = u32::try_from(value).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}');
            return format_char(spec, verb, c);
        }
        _ => return None,
    };
    if let Some(precision) = spec.precision {
        if precision == 0 && value == 0 {
            digits.clear();
        }
        if digits.len() < precision {
            digits.insert_str(0, &"0".repeat(precision - digits.len()));
        }
    }
    let prefix = match verb {
        'b' if spec.sharp => "0b",
        'o' if spec.sharp => "0",
        'x' if spec.sharp => "0x",
        'X' if spec.sharp => "0X",
        'O' => "0o",
        _ => "",
    };
    Some(pad_number(spec, sign(spec, value < 0), prefix, digits))
}

fn format_float(spec: Spec, verb: char, value: f64) -> Option<String> {
    if !matches!(verb, 'v' | 'e' | 'E' | 'f' | 'F' | 'g' | 'G') {
        return None;
    }
    let negative = value.is_sign_negative() && !value.is_nan();
    if value.is_nan() || value.is_infinite() {
        let body = if value.is_nan() { "NaN" } else { "Inf" };
        let sign = if value.is_nan() { "" } else { sign(spec, negative) };
        let spec = Spec { zero: false, ..spec };
        return Some(pad_number(spec, sign, "", body.to_owned()));
    }
    let magnitude = value.abs();
    let body = match verb {
        'f' | 'F' => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
        'e' | 'E' => exponent_form(magnitude, spec.precision.unwrap_or(6)),
        _ => general_form(magnitude, spec.precision, spec.sharp),
    };
    let body = if verb.is_ascii_uppercase() {
        body.to_ascii_uppercase()
    } else {
        body
    };
    // Precision never disables zero padding for floats.
    let spec = Spec { precision: None, ..spec };
    Some(pad_number(spec, sign(spec, negative), "", body))
}

/// `d.dddde±dd` with `precision` fractional digits.
fn exponent_form(magnitude: f64, precision: usize) -> String {
    let rendered = format!("{magnitude:.precision$e}");
    fix_exponent(&rendered)
}

/// Rewrites Rust's `1.5e3` exponent notation as `1.5e+03`.
fn fix_exponent(rendered: &str) -> String {
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered.to_owned();
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

/// `%g`: exponent form for large or small exponents, plain otherwise, with
/// trailing zeros removed.
fn general_form(magnitude: f64, precision: Option<usize>, sharp: bool) -> String {
    let (scientific, threshold) = match precision {
        None => (format!("{magnitude:e}"), 6),
        Some(precision) => {
            let precision = precision.max(1);
            (format!("{:.*e}", precision - 1, magnitude), precision)
        }
    };
    let exponent: i64 = scientific
        .split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0);
    let threshold = i64::try_from(threshold).unwrap_or(i64::MAX);

    if exponent < -4 || exponent >= threshold {
        let (mantissa, _) = scientific.split_once('e').unwrap_or((&scientific, ""));
        let mantissa = if sharp { mantissa.to_owned() } else { trim_zeros(mantissa) };
        return fix_exponent(&format!("{mantissa}e{exponent}"));
    }
    match precision {
        None => format!("{magnitude}"),
        Some(precision) => {
            let decimals = usize::try_from(i64::try_from(precision.max(1)).unwrap_or(1) - 1 - exponent).unwrap_or(0);
            let plain = format!("{magnitude:.decimals$}");
            if sharp { plain } else { trim_zeros(&plain) }
        }
    }
}

fn trim_zeros(number: &str) -> String {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.').to_owned()
    } else {
        number.to_owned()
    }
}

fn format_char(spec: Spec, verb: char, value: char) -> Option<String> {
    let body = match verb {
        'c' | 'v' | 's' => value.to_string(),
        'q' => quote_char(value),
        'U' => format!("U+{:04X}", u32::from(value)),
        'd' | 'x' | 'X' | 'o' | 'b' => return format_int(spec, verb, i64::from(u32::from(value))),
        _ => return None,
    };
    Some(pad(spec, body))
}

fn format_str(spec: Spec, verb: char, value: &str) -> Option<String> {
    let truncated: String = match spec.precision {
        Some(precision) => value.chars().take(precision).collect(),
        None => value.to_owned(),
    };
    let body = match verb {
        's' | 'v' => truncated,
        'q' => quote(&truncated),
        'x' => truncated.bytes().map(|b| format!("{b:02x}")).collect(),
        'X' => truncated.bytes().map(|b| format!("{b:02X}")).collect(),
        _ => return None,
    };
    Some(pad(spec, body))
}

fn sign(spec: Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

/// Pads a number to the field width, zero-filling between sign and digits
/// when the `0` flag is set and no precision was given.
fn pad_number(spec: Spec, sign: &str, prefix: &str, digits: String) -> String {
    let zero_fill = spec.zero && !spec.minus && spec.precision.is_none();
    if zero_fill && let Some(width) = spec.width {
        let used = sign.len() + prefix.len() + digits.chars().count();
        let zeros = "0".repeat(width.saturating_sub(used));
        return format!("{sign}{prefix}{zeros}{digits}");
    }
    pad(spec, format!("{sign}{prefix}{digits}"))
}

fn pad(spec: Spec, body: String) -> String {
    let Some(width) = spec.width else {
        return body;
    };
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let padding = " ".repeat(width - len);
    if spec.minus {
        body + &padding
    } else {
        padding + &body
    }
}

/// Double-quotes `value`, escaping quotes, backslashes and control
/// characters.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        push_escaped(&mut out, c, '"');
    }
    out.push('"');
    out
}

/// Single-quotes a character literal.
#[must_use]
pub fn quote_char(value: char) -> String {
    let mut out = String::from("'");
    push_escaped(&mut out, value, '\'');
    out.push('\'');
    out
}

fn push_escaped(out: &mut String, c: char, delimiter: char) {
    match c {
        '\u{07}' => out.push_str("\\a"),
        '\u{08}' => out.push_str("\\b"),
        '\u{0C}' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\u{0B}' => out.push_str("\\v"),
        '\\' => out.push_str("\\\\"),
        c if c == delimiter => {
            out.push('\\');
            out.push(c);
        }
        c if u32::from(c) < 0x20 || c == '\u{7F}' => {
            let _ = write!(out, "\\x{:02x}", u32::from(c));
        }
        c if c.is_control() => {
            let _ = write!(out, "\\u{:04x}", u32::from(c));
        }
        c => out.push(c),
    }
}

/// Parses a double-quoted, back-quoted or single-quoted literal back into
/// its text. Returns `None` for malformed input.
#[must_use]
pub fn unquote(literal: &str) -> Option<String> {
    let mut chars = literal.chars();
    let open = chars.next()?;
    let close = chars.next_back()?;
    if open != close || literal.len() < 2 {
        return None;
    }
    let body = &literal[open.len_utf8()..literal.len() - close.len_utf8()];
    match open {
        '`' => (!body.contains('`')).then(|| body.replace('\r', "")),
        '"' | '\'' => {
            let text = unescape(body, open)?;
            if open == '\'' && text.chars().count() != 1 {
                return None;
            }
            Some(text)
        }
        _ => None,
    }
}

fn unescape(body: &str, delimiter: char) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == delimiter || c == '\n' {
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.next()? {
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0C}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{0B}',
            '\\' => '\\',
            c if c == delimiter => c,
            kind @ ('x' | 'u' | 'U') => {
                let count = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = chars.by_ref().take(count).collect();
                if digits.len() != count {
                    return None;
                }
                char::from_u32(u32::from_str_radix(&digits, 16).ok()?)?
            }
            first @ '0'..='7' => {
                let rest: String = chars.by_ref().take(2).collect();
                let digits = format!("{first}{rest}");
                if digits.len() != 3 {
                    return None;
                }
                char::from_u32(u32::from_str_radix(&digits, 8).ok()?)?
            }
            _ => return None,
        };
        out.push(escaped);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprintf(template: &str, args: &[Value]) -> String {
        format(template, args, &ResourceLimits::default()).unwrap()
    }

    fn int(value: i64) -> Value {
        Value::Int(value)
    }

    #[test]
    fn integer_verbs() {
        assert_eq!(sprintf("%d|%5d|%-5d|%05d", &[int(1), int(42), int(42), int(-42)]), "1|   42|42   |-0042");
        assert_eq!(sprintf("%x %X %#x %b %o", &[int(255), int(255), int(255), int(5), int(8)]), "ff FF 0xff 101 10");
    }

    #[test]
    fn float_verbs() {
        assert_eq!(sprintf("%f %.2f %e", &[1.5.into(), 3.14159.into(), 1234.5678.into()]), "1.500000 3.14 1.234568e+03");
        assert_eq!(sprintf("%v %v %g", &[1e6.into(), 0.5.into(), 100_000.0.into()]), "1e+06 0.5 100000");
    }

    #[test]
    fn string_verbs() {
        assert_eq!(sprintf("%s|%q|%.2s|%6s", &["hi".into(), "a\"b".into(), "hello".into(), "x".into()]), r#"hi|"a\"b"|he|     x"#);
        assert_eq!(sprintf("%v %T", &[Value::array(vec!["a".into()]), int(1)]), r#"["a"] int"#);
    }

    #[test]
    fn misuse_is_reported_inline() {
        assert_eq!(sprintf("%d", &["x".into()]), "%!d(string=x)");
        assert_eq!(sprintf("%d %d", &[int(1)]), "1 %!d(MISSING)");
        assert_eq!(sprintf("%d", &[int(1), "x".into()]), "1%!(EXTRA string=x)");
        assert_eq!(sprintf("100%%", &[]), "100%");
    }

    #[test]
    fn oversized_width_and_precision_are_dropped() {
        assert_eq!(sprintf("%.9999999999d", &[int(1)]), "%!(BADPREC)1");
        assert_eq!(sprintf("%9999999999d", &[int(1)]), "%!(BADWIDTH)1");
        assert_eq!(sprintf("%*d", &[int(2_000_000), int(1)]), "%!(BADWIDTH)1");
        assert_eq!(sprintf("%.5d|%.0d", &[int(42), int(0)]), "00042|");
    }

    #[test]
    fn output_respects_string_limit() {
        let limits = ResourceLimits::default().max_string_len(4);
        let err = format("%s", &["hello".into()], &limits).unwrap_err();
        assert_eq!(err, RuntimeError::StringLimit);
    }

    #[test]
    fn unquote_reverses_quote() {
        let text = "tab\there \"quoted\" \u{1}";
        assert_eq!(unquote(&quote(text)).as_deref(), Some(text));
        assert_eq!(unquote("`raw\\n`").as_deref(), Some("raw\\n"));
        assert_eq!(unquote("'x'").as_deref(), Some("x"));
        assert_eq!(unquote("\"open"), None);
    }
}
