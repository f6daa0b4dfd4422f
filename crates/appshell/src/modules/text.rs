//! The `text` module: string manipulation, number formatting and regular
//! expressions.

use regex::Regex;

use super::{bool_arg, error_value, expect_args, float_arg, int_arg, int_value, register, str_arg};
use crate::{
    exception::RuntimeError,
    format::{format, quote, unquote},
    resource::ResourceLimits,
    value::{Value, ValueMap, format_float},
};

type TextResult = Result<Value, RuntimeError>;

fn string(value: String, limits: &ResourceLimits) -> TextResult {
    Value::checked_string(value, limits)
}

fn strings(items: impl IntoIterator<Item = impl AsRef<str>>) -> Value {
    Value::array(items.into_iter().map(|item| Value::from(item.as_ref())).collect())
}

/// Byte offset of a match as an int, `-1` when absent.
fn offset(found: Option<usize>) -> Value {
    found.map_or(Value::Int(-1), int_value)
}

pub fn module() -> ValueMap {
    let mut attrs = ValueMap::new();
    predicates(&mut attrs);
    searching(&mut attrs);
    transforms(&mut attrs);
    trimming(&mut attrs);
    conversions(&mut attrs);
    regexes(&mut attrs);
    attrs
}

fn predicates(attrs: &mut ValueMap) {
    let binary: [(&str, fn(&str, &str) -> bool); 5] = [
        ("contains", |s, sub| s.contains(sub)),
        ("contains_any", |s, chars| s.chars().any(|c| chars.contains(c))),
        ("equal_fold", |s, t| s.to_lowercase() == t.to_lowercase()),
        ("has_prefix", |s, prefix| s.starts_with(prefix)),
        ("has_suffix", |s, suffix| s.ends_with(suffix)),
    ];
    for (name, f) in binary {
        register(attrs, name, move |_, args| {
            expect_args(args, 2)?;
            Ok(Value::Bool(f(&str_arg(args, 0)?, &str_arg(args, 1)?)))
        });
    }
}

fn searching(attrs: &mut ValueMap) {
    register(attrs, "count", |_, args| {
        expect_args(args, 2)?;
        let (s, sub) = (str_arg(args, 0)?, str_arg(args, 1)?);
        let count = if sub.is_empty() {
            s.chars().count() + 1
        } else {
            s.matches(sub.as_str()).count()
        };
        Ok(int_value(count))
    });
    register(attrs, "index", |_, args| {
        expect_args(args, 2)?;
        Ok(offset(str_arg(args, 0)?.find(str_arg(args, 1)?.as_str())))
    });
    register(attrs, "last_index", |_, args| {
        expect_args(args, 2)?;
        Ok(offset(str_arg(args, 0)?.rfind(str_arg(args, 1)?.as_str())))
    });
    register(attrs, "fields", |_, args| {
        expect_args(args, 1)?;
        Ok(strings(str_arg(args, 0)?.split_whitespace()))
    });
    register(attrs, "split", |_, args| {
        expect_args(args, 2)?;
        let (s, sep) = (str_arg(args, 0)?, str_arg(args, 1)?);
        Ok(split(&s, &sep, -1))
    });
    register(attrs, "split_n", |_, args| {
        expect_args(args, 3)?;
        let (s, sep, n) = (str_arg(args, 0)?, str_arg(args, 1)?, int_arg(args, 2)?);
        Ok(split(&s, &sep, n))
    });
    register(attrs, "join", |limits, args| {
        expect_args(args, 2)?;
        let parts = match &args[0] {
            Value::Array(_) | Value::ImmutableArray(_) => args[0].with_items(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(part) => Ok(part.to_string()),
                        other => Err(RuntimeError::invalid_argument("first", "array of strings", other.type_name())),
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?,
            other => return Err(RuntimeError::invalid_argument("first", "array", other.type_name())),
        };
        string(parts.join(&str_arg(args, 1)?), limits)
    });
}

/// Splits like Go's `strings.SplitN`: `n < 0` means all parts, `n == 0`
/// none, and an empty separator splits into characters.
fn split(s: &str, sep: &str, n: i64) -> Value {
    if n == 0 {
        return Value::array(Vec::new());
    }
    if sep.is_empty() {
        let chars: Vec<String> = s.chars().map(String::from).collect();
        return match usize::try_from(n) {
            Ok(n) if n < chars.len() => {
                let mut parts: Vec<String> = chars[..n - 1].to_vec();
                parts.push(chars[n - 1..].concat());
                strings(parts)
            }
            _ => strings(chars),
        };
    }
    match usize::try_from(n) {
        Ok(n) => strings(s.splitn(n, sep)),
        Err(_) => strings(s.split(sep)),
    }
}

fn transforms(attrs: &mut ValueMap) {
    register(attrs, "repeat", |limits, args| {
        expect_args(args, 2)?;
        let s = str_arg(args, 0)?;
        let n = usize::try_from(int_arg(args, 1)?).unwrap_or(0);
        if s.len().saturating_mul(n) > limits.max_string_len {
            return Err(RuntimeError::StringLimit);
        }
        string(s.repeat(n), limits)
    });
    register(attrs, "replace", |limits, args| {
        expect_args(args, 4)?;
        let (s, old, new) = (str_arg(args, 0)?, str_arg(args, 1)?, str_arg(args, 2)?);
        let replaced = match usize::try_from(int_arg(args, 3)?) {
            Ok(n) => s.replacen(old.as_str(), &new, n),
            Err(_) => s.replace(old.as_str(), &new),
        };
        string(replaced, limits)
    });
    register(attrs, "substr", |limits, args| {
        if !(2..=3).contains(&args.len()) {
            return Err(RuntimeError::WrongNumArguments);
        }
        let chars: Vec<char> = str_arg(args, 0)?.chars().collect();
        let len = chars.len();
        let clamp = |n: i64| usize::try_from(n).unwrap_or(0).min(len);
        let lower = clamp(int_arg(args, 1)?);
        let upper = if args.len() == 3 { clamp(int_arg(args, 2)?) } else { len };
        if lower > upper {
            return Err(RuntimeError::InvalidSliceIndex {
                low: i64::try_from(lower).unwrap_or(i64::MAX),
                high: i64::try_from(upper).unwrap_or(i64::MAX),
            });
        }
        string(chars[lower..upper].iter().collect(), limits)
    });
    register(attrs, "pad_left", |limits, args| pad(limits, args, true));
    register(attrs, "pad_right", |limits, args| pad(limits, args, false));
    register(attrs, "title", |limits, args| {
        expect_args(args, 1)?;
        string(title(&str_arg(args, 0)?), limits)
    });
    register(attrs, "to_lower", |limits, args| {
        expect_args(args, 1)?;
        string(str_arg(args, 0)?.to_lowercase(), limits)
    });
    register(attrs, "to_upper", |limits, args| {
        expect_args(args, 1)?;
        string(str_arg(args, 0)?.to_uppercase(), limits)
    });
}

fn pad(limits: &ResourceLimits, args: &[Value], left: bool) -> TextResult {
    if !(2..=3).contains(&args.len()) {
        return Err(RuntimeError::WrongNumArguments);
    }
    let s = str_arg(args, 0)?;
    let width = usize::try_from(int_arg(args, 1)?).unwrap_or(0);
    let filler = if args.len() == 3 { str_arg(args, 2)? } else { " ".to_owned() };
    let current = s.chars().count();
    if width <= current || filler.is_empty() {
        return Ok(Value::from(s));
    }
    if width > limits.max_string_len {
        return Err(RuntimeError::StringLimit);
    }
    let padding: String = filler.chars().cycle().take(width - current).collect();
    let padded = if left { padding + &s } else { s + &padding };
    string(padded, limits)
}

/// Upper-cases the first letter of every word.
fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_' || c == '\'');
    }
    out
}

fn trimming(attrs: &mut ValueMap) {
    register(attrs, "trim_space", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::from(str_arg(args, 0)?.trim()))
    });
    let cutset: [(&str, fn(&str, &[char]) -> String); 3] = [
        ("trim", |s, set| s.trim_matches(set).to_owned()),
        ("trim_left", |s, set| s.trim_start_matches(set).to_owned()),
        ("trim_right", |s, set| s.trim_end_matches(set).to_owned()),
    ];
    for (name, f) in cutset {
        register(attrs, name, move |_, args| {
            expect_args(args, 2)?;
            let set: Vec<char> = str_arg(args, 1)?.chars().collect();
            Ok(Value::from(f(&str_arg(args, 0)?, &set)))
        });
    }
    register(attrs, "trim_prefix", |_, args| {
        expect_args(args, 2)?;
        let (s, prefix) = (str_arg(args, 0)?, str_arg(args, 1)?);
        Ok(Value::from(s.strip_prefix(prefix.as_str()).unwrap_or(&s)))
    });
    register(attrs, "trim_suffix", |_, args| {
        expect_args(args, 2)?;
        let (s, suffix) = (str_arg(args, 0)?, str_arg(args, 1)?);
        Ok(Value::from(s.strip_suffix(suffix.as_str()).unwrap_or(&s)))
    });
}

fn syntax_error(func: &str, input: &str) -> Value {
    error_value(format!("strconv.{func}: parsing {}: invalid syntax", quote(input)))
}

fn conversions(attrs: &mut ValueMap) {
    register(attrs, "atoi", |_, args| {
        expect_args(args, 1)?;
        let s = str_arg(args, 0)?;
        Ok(s.parse::<i64>().map_or_else(|_| syntax_error("Atoi", &s), Value::Int))
    });
    register(attrs, "itoa", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::from(int_arg(args, 0)?.to_string()))
    });
    register(attrs, "format_bool", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::from(bool_arg(args, 0)?.to_string()))
    });
    register(attrs, "parse_bool", |_, args| {
        expect_args(args, 1)?;
        let s = str_arg(args, 0)?;
        Ok(match s.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Value::Bool(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Value::Bool(false),
            _ => syntax_error("ParseBool", &s),
        })
    });
    register(attrs, "format_int", |_, args| {
        expect_args(args, 2)?;
        let (n, base) = (int_arg(args, 0)?, int_arg(args, 1)?);
        let base = u32::try_from(base)
            .ok()
            .filter(|base| (2..=36).contains(base))
            .ok_or_else(|| RuntimeError::custom(format!("invalid base: {base}")))?;
        Ok(Value::from(format_radix(n, base)))
    });
    register(attrs, "parse_int", |_, args| {
        expect_args(args, 3)?;
        let (s, base) = (str_arg(args, 0)?, int_arg(args, 1)?);
        let bits = u32::try_from(int_arg(args, 2)?).unwrap_or(64).clamp(1, 64);
        Ok(match parse_int(&s, base) {
            Some(n) if bits == 64 || (n >> (bits - 1)) == 0 || (n >> (bits - 1)) == -1 => Value::Int(n),
            Some(_) => error_value(format!("strconv.ParseInt: parsing {}: value out of range", quote(&s))),
            None => syntax_error("ParseInt", &s),
        })
    });
    register(attrs, "format_float", |limits, args| {
        expect_args(args, 4)?;
        let value = float_arg(args, 0)?;
        let verb = str_arg(args, 1)?;
        let precision = int_arg(args, 2)?;
        Ok(Value::from(format_float_verb(value, &verb, precision, limits)?))
    });
    register(attrs, "parse_float", |_, args| {
        expect_args(args, 2)?;
        let s = str_arg(args, 0)?;
        Ok(s.parse::<f64>().map_or_else(|_| syntax_error("ParseFloat", &s), Value::Float))
    });
    register(attrs, "quote", |limits, args| {
        expect_args(args, 1)?;
        string(quote(&str_arg(args, 0)?), limits)
    });
    register(attrs, "unquote", |_, args| {
        expect_args(args, 1)?;
        let s = str_arg(args, 0)?;
        Ok(unquote(&s).map_or_else(|| error_value("invalid syntax"), |text| Value::from(text.as_str())))
    });
}

pub(crate) fn format_radix(n: i64, base: u32) -> String {
    let mut magnitude = n.unsigned_abs();
    if magnitude == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::new();
    while magnitude > 0 {
        let digit = u32::try_from(magnitude % u64::from(base)).unwrap_or(0);
        digits.push(char::from_digit(digit, base).unwrap_or('?'));
        magnitude /= u64::from(base);
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Parses with an explicit base, or infers it from a `0x`, `0o`, `0b` or `0`
/// prefix when `base` is 0.
fn parse_int(s: &str, base: i64) -> Option<i64> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = if base == 0 {
        let lower = body.to_ascii_lowercase();
        if lower.starts_with("0x") {
            (16, &body[2..])
        } else if lower.starts_with("0b") {
            (2, &body[2..])
        } else if lower.starts_with("0o") {
            (8, &body[2..])
        } else if body.len() > 1 && body.starts_with('0') {
            (8, &body[1..])
        } else {
            (10, body)
        }
    } else {
        (u32::try_from(base).ok().filter(|base| (2..=36).contains(base))?, body)
    };
    let digits = if base == 0 { digits.replace('_', "") } else { digits.to_owned() };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from(u64::from_str_radix(&digits, radix).ok()?);
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

fn format_float_verb(value: f64, verb: &str, precision: i64, limits: &ResourceLimits) -> Result<String, RuntimeError> {
    let verb = match verb {
        "f" | "e" | "E" | "g" | "G" => verb,
        "b" | "x" | "X" => return Err(RuntimeError::custom(format!("unsupported float format: {verb}"))),
        other => return Ok(format!("%{other}")),
    };
    if precision < 0 {
        return Ok(match verb {
            "e" => format!("{value:e}"),
            "E" => format!("{value:E}"),
            _ => format_float(value),
        });
    }
    format(&format!("%.{precision}{verb}"), &[Value::Float(value)], limits)
}

fn regexes(attrs: &mut ValueMap) {
    register(attrs, "re_match", |_, args| {
        expect_args(args, 2)?;
        let re = match Regex::new(&str_arg(args, 0)?) {
            Ok(re) => re,
            Err(error) => return Ok(error_value(error.to_string())),
        };
        Ok(Value::Bool(re.is_match(&str_arg(args, 1)?)))
    });
    register(attrs, "re_find", |_, args| {
        if !(2..=3).contains(&args.len()) {
            return Err(RuntimeError::WrongNumArguments);
        }
        let re = match Regex::new(&str_arg(args, 0)?) {
            Ok(re) => re,
            Err(error) => return Ok(error_value(error.to_string())),
        };
        let text = str_arg(args, 1)?;
        let limit = if args.len() == 3 {
            usize::try_from(int_arg(args, 2)?).unwrap_or(usize::MAX)
        } else {
            1
        };
        let found: Vec<Value> = re.captures_iter(&text).take(limit).map(|captures| capture_groups(&captures)).collect();
        Ok(if found.is_empty() { Value::Undefined } else { Value::array(found) })
    });
    register(attrs, "re_replace", |limits, args| {
        expect_args(args, 3)?;
        let re = match Regex::new(&str_arg(args, 0)?) {
            Ok(re) => re,
            Err(error) => return Ok(error_value(error.to_string())),
        };
        let replaced = re.replace_all(&str_arg(args, 1)?, str_arg(args, 2)?.as_str()).into_owned();
        string(replaced, limits)
    });
    register(attrs, "re_split", |_, args| {
        if !(2..=3).contains(&args.len()) {
            return Err(RuntimeError::WrongNumArguments);
        }
        let re = match Regex::new(&str_arg(args, 0)?) {
            Ok(re) => re,
            Err(error) => return Ok(error_value(error.to_string())),
        };
        let text = str_arg(args, 1)?;
        let n = if args.len() == 3 { int_arg(args, 2)? } else { -1 };
        Ok(match usize::try_from(n) {
            Ok(0) => Value::array(Vec::new()),
            Ok(n) => strings(re.splitn(&text, n)),
            Err(_) => strings(re.split(&text)),
        })
    });
}

/// One match as an array of `{text, begin, end}` maps, one per group.
fn capture_groups(captures: &regex::Captures<'_>) -> Value {
    let groups = captures
        .iter()
        .flatten()
        .map(|group| {
            let mut entry = ValueMap::new();
            entry.insert("text".to_owned(), Value::from(group.as_str()));
            entry.insert("begin".to_owned(), int_value(group.start()));
            entry.insert("end".to_owned(), int_value(group.end()));
            Value::map(entry)
        })
        .collect();
    Value::array(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        let attrs = module();
        let Some(Value::Native(f)) = attrs.get(name) else {
            panic!("missing text.{name}");
        };
        f.call(&ResourceLimits::default(), args).unwrap()
    }

    #[test]
    fn split_variants() {
        assert_eq!(split("a,b,c", ",", -1).to_string(), r#"["a", "b", "c"]"#);
        assert_eq!(split("a,b,c", ",", 2).to_string(), r#"["a", "b,c"]"#);
        assert_eq!(split("abc", "", 2).to_string(), r#"["a", "bc"]"#);
    }

    #[test]
    fn number_conversions() {
        assert_eq!(format_radix(-255, 16), "-ff");
        assert_eq!(parse_int("0x1f", 0), Some(31));
        assert_eq!(parse_int("-101", 2), Some(-5));
        assert!(matches!(call("atoi", &[Value::from("x1")]), Value::Error(_)));
    }

    #[test]
    fn padding_and_title() {
        assert_eq!(call("pad_left", &[Value::from("7"), Value::Int(3), Value::from("0")]), Value::from("007"));
        assert_eq!(title("hello wide world"), "Hello Wide World");
    }

    #[test]
    fn regex_find_reports_offsets() {
        let found = call("re_find", &[Value::from(r"b+"), Value::from("abbc")]);
        assert_eq!(found.to_string(), r#"[[{text: "bb", begin: 1, end: 3}]]"#);
    }
}
