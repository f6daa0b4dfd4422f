//! The `rand` module: a pseudo-random generator private to each module
//! instance, reseedable from script.

use std::{cell::RefCell, rc::Rc};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{expect_args, int_arg, register};
use crate::{
    exception::RuntimeError,
    value::{Value, ValueMap},
};

pub fn module() -> ValueMap {
    let rng = Rc::new(RefCell::new(StdRng::from_entropy()));
    let mut attrs = ValueMap::new();

    let shared = Rc::clone(&rng);
    register(&mut attrs, "seed", move |_, args| {
        expect_args(args, 1)?;
        let seed = int_arg(args, 0)?;
        *shared.borrow_mut() = StdRng::seed_from_u64(seed.cast_unsigned());
        Ok(Value::Undefined)
    });
    let shared = Rc::clone(&rng);
    register(&mut attrs, "int", move |_, args| {
        expect_args(args, 0)?;
        Ok(Value::Int(shared.borrow_mut().gen_range(0..=i64::MAX)))
    });
    let shared = Rc::clone(&rng);
    register(&mut attrs, "float", move |_, args| {
        expect_args(args, 0)?;
        Ok(Value::Float(shared.borrow_mut().r#gen::<f64>()))
    });
    let shared = Rc::clone(&rng);
    register(&mut attrs, "intn", move |_, args| {
        expect_args(args, 1)?;
        let n = int_arg(args, 0)?;
        if n <= 0 {
            return Err(RuntimeError::custom("invalid argument to intn"));
        }
        Ok(Value::Int(shared.borrow_mut().gen_range(0..n)))
    });
    let shared = Rc::clone(&rng);
    register(&mut attrs, "exp_float", move |_, args| {
        expect_args(args, 0)?;
        let u: f64 = shared.borrow_mut().r#gen();
        Ok(Value::Float(-(1.0 - u).ln()))
    });
    let shared = Rc::clone(&rng);
    register(&mut attrs, "norm_float", move |_, args| {
        expect_args(args, 0)?;
        let mut rng = shared.borrow_mut();
        // Box-Muller; `1 - u` keeps the logarithm finite.
        let (u1, u2): (f64, f64) = (rng.r#gen(), rng.r#gen());
        let radius = (-2.0 * (1.0 - u1).ln()).sqrt();
        Ok(Value::Float(radius * (std::f64::consts::TAU * u2).cos()))
    });
    register(&mut attrs, "perm", move |limits, args| {
        expect_args(args, 1)?;
        let n = int_arg(args, 0)?;
        if n < 0 {
            return Err(RuntimeError::custom("invalid argument to perm"));
        }
        if usize::try_from(n).ok().is_none_or(|n| n > limits.max_array_len) {
            return Err(RuntimeError::ArrayLimit);
        }
        let mut items: Vec<i64> = (0..n).collect();
        items.shuffle(&mut *rng.borrow_mut());
        Ok(Value::array(items.into_iter().map(Value::Int).collect()))
    });
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceLimits;

    fn call(attrs: &ValueMap, name: &str, args: &[Value]) -> Value {
        let Some(Value::Native(f)) = attrs.get(name) else {
            panic!("missing rand.{name}");
        };
        f.call(&ResourceLimits::default(), args).unwrap()
    }

    #[test]
    fn seeding_makes_sequences_repeatable() {
        let attrs = module();
        call(&attrs, "seed", &[Value::Int(42)]);
        let first = call(&attrs, "intn", &[Value::Int(1_000_000)]);
        call(&attrs, "seed", &[Value::Int(42)]);
        assert_eq!(call(&attrs, "intn", &[Value::Int(1_000_000)]), first);
    }

    #[test]
    fn perm_is_a_permutation() {
        let attrs = module();
        let Value::Array(items) = call(&attrs, "perm", &[Value::Int(5)]) else {
            panic!("perm must return an array");
        };
        let mut seen: Vec<i64> = items.borrow().iter().filter_map(Value::to_int).collect();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn perm_length_is_bounded() {
        let attrs = module();
        let Some(Value::Native(perm)) = attrs.get("perm") else {
            panic!("missing rand.perm");
        };
        let limits = ResourceLimits::default().max_array_len(4);
        assert_eq!(perm.call(&limits, &[Value::Int(5)]), Err(RuntimeError::ArrayLimit));
        assert_eq!(
            perm.call(&ResourceLimits::default(), &[Value::Int(100_000_000_000)]),
            Err(RuntimeError::ArrayLimit)
        );
    }
}
