//! The `base64` and `hex` modules.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};

use super::{bytes_arg, error_value, expect_args, register, str_arg};
use crate::value::{Value, ValueMap};

pub fn base64_module() -> ValueMap {
    let mut attrs = ValueMap::new();
    for (suffix, engine) in [
        ("", &STANDARD),
        ("raw_", &STANDARD_NO_PAD),
        ("url_", &URL_SAFE),
        ("raw_url_", &URL_SAFE_NO_PAD),
    ] {
        register(&mut attrs, &format!("{suffix}encode"), move |limits, args| {
            expect_args(args, 1)?;
            Value::checked_string(engine.encode(bytes_arg(args, 0)?), limits)
        });
        register(&mut attrs, &format!("{suffix}decode"), move |limits, args| {
            expect_args(args, 1)?;
            match engine.decode(str_arg(args, 0)?) {
                Ok(decoded) => Value::checked_bytes(decoded, limits),
                Err(error) => Ok(error_value(error.to_string())),
            }
        });
    }
    attrs
}

pub fn hex_module() -> ValueMap {
    let mut attrs = ValueMap::new();
    register(&mut attrs, "encode", |limits, args| {
        expect_args(args, 1)?;
        Value::checked_string(hex::encode(bytes_arg(args, 0)?), limits)
    });
    register(&mut attrs, "decode", |limits, args| {
        expect_args(args, 1)?;
        match hex::decode(str_arg(args, 0)?) {
            Ok(decoded) => Value::checked_bytes(decoded, limits),
            Err(error) => Ok(error_value(error.to_string())),
        }
    });
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceLimits;

    fn call(attrs: &ValueMap, name: &str, args: &[Value]) -> Value {
        let Some(Value::Native(f)) = attrs.get(name) else {
            panic!("missing function {name}");
        };
        f.call(&ResourceLimits::default(), args).unwrap()
    }

    #[test]
    fn base64_variants() {
        let attrs = base64_module();
        assert_eq!(call(&attrs, "encode", &[Value::from("hi?")]), Value::from("aGk/"));
        assert_eq!(call(&attrs, "url_encode", &[Value::from("hi?")]), Value::from("aGk_"));
        assert_eq!(call(&attrs, "raw_encode", &[Value::from("h")]), Value::from("aA"));
        assert_eq!(call(&attrs, "decode", &[Value::from("aGk/")]), Value::bytes(b"hi?".to_vec()));
        assert!(matches!(call(&attrs, "decode", &[Value::from("!")]), Value::Error(_)));
    }

    #[test]
    fn hex_round_trip() {
        let attrs = hex_module();
        assert_eq!(call(&attrs, "encode", &[Value::from("hi")]), Value::from("6869"));
        assert_eq!(call(&attrs, "decode", &[Value::from("6869")]), Value::bytes(b"hi".to_vec()));
    }
}
