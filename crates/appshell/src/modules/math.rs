use std::f64::consts;

use super::{expect_args, float_arg, int_arg, register};
use crate::value::{Value, ValueMap};

const PHI: f64 = 1.618_033_988_749_895;

pub fn module() -> ValueMap {
    let mut attrs = ValueMap::new();
    for (name, value) in [
        ("e", consts::E),
        ("pi", consts::PI),
        ("phi", PHI),
        ("sqrt2", consts::SQRT_2),
        ("sqrt_e", consts::E.sqrt()),
        ("sqrt_pi", consts::PI.sqrt()),
        ("sqrt_phi", PHI.sqrt()),
        ("ln2", consts::LN_2),
        ("log2e", consts::LOG2_E),
        ("ln10", consts::LN_10),
        ("log10e", consts::LOG10_E),
    ] {
        attrs.insert(name.to_owned(), Value::Float(value));
    }
    attrs.insert("max_int".to_owned(), Value::Int(i64::MAX));
    attrs.insert("min_int".to_owned(), Value::Int(i64::MIN));

    let unary: [(&str, fn(f64) -> f64); 26] = [
        ("abs", f64::abs),
        ("acos", f64::acos),
        ("acosh", f64::acosh),
        ("asin", f64::asin),
        ("asinh", f64::asinh),
        ("atan", f64::atan),
        ("atanh", f64::atanh),
        ("cbrt", f64::cbrt),
        ("ceil", f64::ceil),
        ("cos", f64::cos),
        ("cosh", f64::cosh),
        ("exp", f64::exp),
        ("exp2", f64::exp2),
        ("expm1", f64::exp_m1),
        ("floor", f64::floor),
        ("log", f64::ln),
        ("log10", f64::log10),
        ("log1p", f64::ln_1p),
        ("log2", f64::log2),
        ("round", f64::round),
        ("sin", f64::sin),
        ("sinh", f64::sinh),
        ("sqrt", f64::sqrt),
        ("tan", f64::tan),
        ("tanh", f64::tanh),
        ("trunc", f64::trunc),
    ];
    for (name, f) in unary {
        register(&mut attrs, name, move |_, args| {
            expect_args(args, 1)?;
            Ok(Value::Float(f(float_arg(args, 0)?)))
        });
    }

    let binary: [(&str, fn(f64, f64) -> f64); 7] = [
        ("atan2", f64::atan2),
        ("hypot", f64::hypot),
        ("max", max),
        ("min", min),
        ("mod", |x, y| x % y),
        ("pow", f64::powf),
        ("remainder", remainder),
    ];
    for (name, f) in binary {
        register(&mut attrs, name, move |_, args| {
            expect_args(args, 2)?;
            Ok(Value::Float(f(float_arg(args, 0)?, float_arg(args, 1)?)))
        });
    }

    register(&mut attrs, "inf", |_, args| {
        expect_args(args, 1)?;
        let sign = int_arg(args, 0)?;
        Ok(Value::Float(if sign >= 0 { f64::INFINITY } else { f64::NEG_INFINITY }))
    });
    register(&mut attrs, "nan", |_, args| {
        expect_args(args, 0)?;
        Ok(Value::Float(f64::NAN))
    });
    register(&mut attrs, "is_inf", |_, args| {
        expect_args(args, 2)?;
        let value = float_arg(args, 0)?;
        let sign = int_arg(args, 1)?;
        let result = match sign.signum() {
            1 => value == f64::INFINITY,
            -1 => value == f64::NEG_INFINITY,
            _ => value.is_infinite(),
        };
        Ok(Value::Bool(result))
    });
    register(&mut attrs, "is_nan", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::Bool(float_arg(args, 0)?.is_nan()))
    });
    register(&mut attrs, "signbit", |_, args| {
        expect_args(args, 1)?;
        Ok(Value::Bool(float_arg(args, 0)?.is_sign_negative()))
    });
    attrs
}

/// Like `f64::max`, but NaN wins.
fn max(x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() { f64::NAN } else { x.max(y) }
}

fn min(x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() { f64::NAN } else { x.min(y) }
}

/// IEEE 754 remainder: `x - n*y` with `n` the integer nearest `x/y`, ties to
/// even.
fn remainder(x: f64, y: f64) -> f64 {
    let n = (x / y).round_ties_even();
    x - n * y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceLimits;

    fn call(name: &str, args: &[Value]) -> Value {
        let attrs = module();
        let Some(Value::Native(f)) = attrs.get(name) else {
            panic!("missing math.{name}");
        };
        f.call(&ResourceLimits::default(), args).unwrap()
    }

    #[test]
    fn functions_accept_ints() {
        assert_eq!(call("sqrt", &[Value::Int(16)]), Value::Float(4.0));
        assert_eq!(call("max", &[Value::Int(2), Value::Float(3.5)]), Value::Float(3.5));
        assert_eq!(call("mod", &[Value::Int(-7), Value::Int(3)]), Value::Float(-1.0));
    }

    #[test]
    fn remainder_rounds_to_even() {
        assert!((remainder(5.0, 2.0) - 1.0).abs() < f64::EPSILON);
        assert!((remainder(7.0, 2.0) + 1.0).abs() < f64::EPSILON);
    }
}
