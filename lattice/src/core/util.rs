use ahash::RandomState;
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};

pub type HashMap<K, V> = StdHashMap<K, V, RandomState>;
pub type HashSet<K> = StdHashSet<K, RandomState>;

/// `ternary!(cond, true_case, false_case)`
#[macro_export]
macro_rules! ternary {
    ($condition: expr, $_true: expr, $_false: expr) => {
        if $condition { $_true } else { $_false }
    };
}

pub fn bool_to_f32(cond: bool) -> f32 {
    ternary!(cond, 1.0, 0.0)
}

pub fn map_range(
    value: f32,
    in_min: f32,
    in_max: f32,
    out_min: f32,
    out_max: f32,
) -> f32 {
    if in_max == in_min {
        return out_min;
    }
    out_min + (value - in_min) * (out_max - out_min) / (in_max - in_min)
}

/// Snap `value` to the nearest multiple of `step`, counted from `min`.
/// A `step` of zero leaves the value untouched.
pub fn quantize(value: f32, min: f32, step: f32) -> f32 {
    if step <= 0.0 {
        return value;
    }
    min + ((value - min) / step).round() * step
}
