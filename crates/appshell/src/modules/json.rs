//! The `json` module. Encoded documents are byte strings, as in Tengo.

use serde::Serialize;
use serde_json::{Serializer, ser::PrettyFormatter};

use super::{bytes_arg, error_value, expect_args, register, str_arg};
use crate::{
    convert::{from_json, to_json},
    resource::ResourceLimits,
    value::{Value, ValueMap},
};

pub fn module() -> ValueMap {
    let mut attrs = ValueMap::new();
    register(&mut attrs, "encode", |limits, args| {
        expect_args(args, 1)?;
        let json = match to_json(&args[0]) {
            Ok(json) => json,
            Err(error) => return Ok(error_value(error.to_string())),
        };
        match serde_json::to_vec(&json) {
            Ok(encoded) => Value::checked_bytes(encoded, limits),
            Err(error) => Ok(error_value(error.to_string())),
        }
    });
    register(&mut attrs, "decode", |limits, args| {
        expect_args(args, 1)?;
        let input = bytes_arg(args, 0)?;
        decode(&input, limits)
    });
    register(&mut attrs, "indent", |limits, args| {
        expect_args(args, 3)?;
        let input = bytes_arg(args, 0)?;
        let (prefix, indent) = (str_arg(args, 1)?, str_arg(args, 2)?);
        match indent_document(&input, &prefix, &indent) {
            Ok(out) => Value::checked_bytes(out, limits),
            Err(error) => Ok(error_value(error.to_string())),
        }
    });
    register(&mut attrs, "html_escape", |limits, args| {
        expect_args(args, 1)?;
        Value::checked_bytes(html_escape(&bytes_arg(args, 0)?), limits)
    });
    attrs
}

fn decode(input: &[u8], limits: &ResourceLimits) -> Result<Value, crate::exception::RuntimeError> {
    match serde_json::from_slice(input) {
        Ok(json) => Ok(from_json(&json, limits)?),
        Err(error) => Ok(error_value(error.to_string())),
    }
}

/// Re-encodes a document with one element per line, each line after the
/// first starting with `prefix`.
fn indent_document(input: &[u8], prefix: &str, indent: &str) -> Result<Vec<u8>, serde_json::Error> {
    let json: serde_json::Value = serde_json::from_slice(input)?;
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    json.serialize(&mut serializer)?;
    if prefix.is_empty() {
        return Ok(out);
    }
    let mut prefixed = Vec::with_capacity(out.len());
    for byte in out {
        prefixed.push(byte);
        if byte == b'\n' {
            prefixed.extend_from_slice(prefix.as_bytes());
        }
    }
    Ok(prefixed)
}

/// Escapes `<`, `>`, `&`, U+2028 and U+2029 so JSON can be embedded in HTML.
fn html_escape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'<' => out.extend_from_slice(br"\u003c"),
            b'>' => out.extend_from_slice(br"\u003e"),
            b'&' => out.extend_from_slice(br"\u0026"),
            0xE2 if input.get(i + 1) == Some(&0x80) && matches!(input.get(i + 2), Some(0xA8 | 0xA9)) => {
                let last = if input[i + 2] == 0xA8 { b'8' } else { b'9' };
                out.extend_from_slice(br"\u202");
                out.push(last);
                i += 3;
                continue;
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_prefixes_continuation_lines() {
        let out = indent_document(br#"{"a":[1]}"#, "> ", "  ").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n>   \"a\": [\n>     1\n>   ]\n> }");
    }

    #[test]
    fn escapes_html_sensitive_bytes() {
        assert_eq!(html_escape(b"<a&b>"), br"\u003ca\u0026b\u003e".to_vec());
    }

    #[test]
    fn decode_failure_is_an_error_value() {
        let value = decode(b"{", &ResourceLimits::default()).unwrap();
        assert!(matches!(value, Value::Error(_)));
    }
}
