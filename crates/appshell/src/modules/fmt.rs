//! The `fmt` module, writing through the kernel's stdout proxy.

use std::io::Write;

use super::register;
use crate::{
    exception::RuntimeError,
    format::format,
    io::WriterProxy,
    resource::ResourceLimits,
    value::{Value, ValueMap},
};

pub fn module(out: &WriterProxy) -> ValueMap {
    let mut attrs = ValueMap::new();

    let stdout = out.clone();
    register(&mut attrs, "print", move |limits, args| {
        let text = print_args(args, limits)?.concat();
        write_out(&mut stdout.clone(), &text);
        Ok(Value::Undefined)
    });
    let stdout = out.clone();
    register(&mut attrs, "println", move |limits, args| {
        let mut text = print_args(args, limits)?.join(" ");
        text.push('\n');
        write_out(&mut stdout.clone(), &text);
        Ok(Value::Undefined)
    });
    let stdout = out.clone();
    register(&mut attrs, "printf", move |limits, args| {
        let text = sprintf(args, limits)?;
        write_out(&mut stdout.clone(), &text);
        Ok(Value::Undefined)
    });
    register(&mut attrs, "sprintf", |limits, args| {
        let text = sprintf(args, limits)?;
        Value::checked_string(text, limits)
    });
    attrs
}

/// Text of each argument, undefined printing as nothing; fails as soon as the
/// running total passes the string limit.
fn print_args(args: &[Value], limits: &ResourceLimits) -> Result<Vec<String>, RuntimeError> {
    let mut total = 0usize;
    let mut texts = Vec::with_capacity(args.len());
    for arg in args {
        let text = arg.to_text().unwrap_or_default();
        total = total.saturating_add(text.len());
        if total > limits.max_string_len {
            return Err(RuntimeError::StringLimit);
        }
        texts.push(text);
    }
    Ok(texts)
}

fn sprintf(args: &[Value], limits: &ResourceLimits) -> Result<String, RuntimeError> {
    let Some((template, rest)) = args.split_first() else {
        return Err(RuntimeError::WrongNumArguments);
    };
    let Value::String(template) = template else {
        return Err(RuntimeError::invalid_argument("format", "string", template.type_name()));
    };
    if rest.is_empty() {
        return Ok(template.to_string());
    }
    format(template, rest, limits)
}

// Output errors are not reported to scripts.
fn write_out(out: &mut WriterProxy, text: &str) {
    let _ = out.write_all(text.as_bytes());
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::CollectOutput;

    fn call(attrs: &ValueMap, name: &str, args: &[Value], limits: &ResourceLimits) -> Result<Value, RuntimeError> {
        let Some(Value::Native(f)) = attrs.get(name) else {
            panic!("missing fmt.{name}");
        };
        f.call(limits, args)
    }

    #[test]
    fn printing_goes_through_the_proxy() {
        let collected = CollectOutput::new();
        let proxy = WriterProxy::new(Box::new(collected.clone()));
        let attrs = module(&proxy);
        let limits = ResourceLimits::default();

        call(&attrs, "print", &[Value::from("a"), Value::Int(1)], &limits).unwrap();
        call(&attrs, "println", &[Value::from("b"), Value::Undefined, Value::Int(2)], &limits).unwrap();
        call(&attrs, "printf", &[Value::from("%d%%")], &limits).unwrap();
        call(&attrs, "printf", &[Value::from("<%5.2f>"), Value::Float(2.5)], &limits).unwrap();

        assert_eq!(collected.output(), "a1b  2\n%d%%< 2.50>");
    }

    #[test]
    fn cumulative_print_limit() {
        let attrs = module(&WriterProxy::default());
        let limits = ResourceLimits::new().max_string_len(4);
        let args = [Value::from("ab"), Value::from("cd")];
        assert!(call(&attrs, "print", &args, &limits).is_ok());
        let args = [Value::from("ab"), Value::from("cd"), Value::from("e")];
        assert_eq!(call(&attrs, "println", &args, &limits), Err(RuntimeError::StringLimit));
    }

    #[test]
    fn format_must_be_a_string() {
        let attrs = module(&WriterProxy::default());
        let limits = ResourceLimits::default();
        assert_eq!(call(&attrs, "sprintf", &[], &limits), Err(RuntimeError::WrongNumArguments));
        let err = call(&attrs, "sprintf", &[Value::Int(1)], &limits).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid type for argument 'format': expected string, found int"
        );
        assert_eq!(
            call(&attrs, "sprintf", &[Value::from("%s-%d"), Value::from("x"), Value::Int(3)], &limits),
            Ok(Value::from("x-3"))
        );
    }
}
