//! Numeric strategies for every integer and floating point kind

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::str::FromStr;

use super::strategy::{filtered, from_fn, nothing, one_of, BoxedStrategy, DrawError};
use super::GenerationMode;
use crate::error::GeneratorError;

/// Magnitude used for "everyday" values before falling back to the full domain
const SMALL_RANGE: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    /// Integers and doubles
    Number,
    Float,
    Double,
    Integer,
    Int32,
    Int64,
}

impl NumericKind {
    pub fn is_integer(&self) -> bool {
        matches!(self, NumericKind::Integer | NumericKind::Int32 | NumericKind::Int64)
    }

    /// Inclusive domain of the kind
    fn int_domain(&self) -> (i128, i128) {
        match self {
            NumericKind::Int32 => (i32::MIN as i128, i32::MAX as i128),
            _ => (i64::MIN as i128, i64::MAX as i128),
        }
    }

    fn float_domain(&self) -> (f64, f64) {
        match self {
            NumericKind::Float => (-(f32::MAX as f64), f32::MAX as f64),
            _ => (-f64::MAX, f64::MAX),
        }
    }
}

impl FromStr for NumericKind {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(NumericKind::Number),
            "float" => Ok(NumericKind::Float),
            "double" => Ok(NumericKind::Double),
            "integer" => Ok(NumericKind::Integer),
            "int32" => Ok(NumericKind::Int32),
            "int64" => Ok(NumericKind::Int64),
            other => Err(GeneratorError::InvalidSpec(format!("unknown numeric kind '{}'", other))),
        }
    }
}

/// Bounds and step for a numeric value. Bounds are inclusive unless the
/// matching `exclusive_*` flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericConstraints {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub multiple_of: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
}

impl NumericConstraints {
    pub fn new(minimum: Option<f64>, maximum: Option<f64>, multiple_of: Option<f64>) -> Self {
        Self {
            minimum,
            maximum,
            multiple_of,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), GeneratorError> {
        for (name, bound) in [("minimum", self.minimum), ("maximum", self.maximum)] {
            if bound.is_some_and(|b| !b.is_finite()) {
                return Err(GeneratorError::InvalidSpec(format!("{} must be finite", name)));
            }
        }
        if let Some(m) = self.multiple_of {
            if !(m.is_finite() && m > 0.0) {
                return Err(GeneratorError::InvalidSpec(format!(
                    "multipleOf must be a positive number, got {}",
                    m
                )));
            }
        }
        Ok(())
    }

    /// Does `x` satisfy every constraint?
    pub fn accepts(&self, x: f64) -> bool {
        let above_min = match self.minimum {
            Some(min) if self.exclusive_minimum => x > min,
            Some(min) => x >= min,
            None => true,
        };
        let below_max = match self.maximum {
            Some(max) if self.exclusive_maximum => x < max,
            Some(max) => x <= max,
            None => true,
        };
        above_min && below_max && self.multiple_of.map_or(true, |m| is_multiple(x, m))
    }

    /// Smallest acceptable integer, ignoring the step
    fn int_min(&self) -> Option<i128> {
        self.minimum.map(|min| {
            if self.exclusive_minimum {
                min.floor() as i128 + 1
            } else {
                min.ceil() as i128
            }
        })
    }

    fn int_max(&self) -> Option<i128> {
        self.maximum.map(|max| {
            if self.exclusive_maximum {
                max.ceil() as i128 - 1
            } else {
                max.floor() as i128
            }
        })
    }
}

pub(crate) fn is_multiple(x: f64, m: f64) -> bool {
    let q = x / m;
    if !q.is_finite() {
        return false;
    }
    (q - q.round()).abs() <= 1e-9 * q.abs().max(1.0)
}

fn integral_step(m: f64) -> Option<i128> {
    (m.fract() == 0.0 && m <= i64::MAX as f64).then(|| m as i128)
}

fn int_value(n: i128) -> Value {
    match i64::try_from(n) {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(n as f64),
    }
}

fn float_value(x: f64) -> Result<Value, DrawError> {
    Number::from_f64(x).map(Value::Number).ok_or(DrawError::Exhausted(1))
}

/// Uniform integer in `[lo, hi]`, biased toward the ends and toward small
/// magnitudes so edge cases come up often.
fn draw_int(rng: &mut dyn RngCore, lo: i128, hi: i128) -> i128 {
    match rng.gen_range(0..8u8) {
        0 => lo,
        1 => hi,
        2 | 3 => {
            let small_lo = lo.max(-(SMALL_RANGE as i128));
            let small_hi = hi.min(SMALL_RANGE as i128);
            if small_lo <= small_hi {
                rng.gen_range(small_lo..=small_hi)
            } else {
                rng.gen_range(lo..=hi)
            }
        }
        _ => rng.gen_range(lo..=hi),
    }
}

/// Float in `[lo, hi]`, biased the same way as `draw_int`
fn draw_float(rng: &mut dyn RngCore, lo: f64, hi: f64) -> f64 {
    let x = match rng.gen_range(0..8u8) {
        0 => lo,
        1 => hi,
        2 | 3 if lo.max(-SMALL_RANGE) <= hi.min(SMALL_RANGE) => {
            let (a, b) = (lo.max(-SMALL_RANGE), hi.min(SMALL_RANGE));
            a + (b - a) * rng.gen::<f64>()
        }
        _ => {
            // Split the interpolation so the width cannot overflow
            let t = rng.gen::<f64>();
            lo * (1.0 - t) + hi * t
        }
    };
    x.clamp(lo, hi)
}

/// Range of multipliers `k` with `k * step` in `[lo, hi]`
fn int_multiples(lo: i128, hi: i128, step: i128) -> Option<(i128, i128)> {
    let first = lo.div_euclid(step) + i128::from(lo.rem_euclid(step) != 0);
    let last = hi.div_euclid(step);
    (first <= last).then_some((first, last))
}

fn float_multiples(lo: f64, hi: f64, step: f64) -> Option<(i128, i128)> {
    const MAX_K: f64 = 9_007_199_254_740_992.0; // 2^53
    let first = (lo / step).ceil().max(-MAX_K);
    let last = (hi / step).floor().min(MAX_K);
    (first <= last).then_some((first as i128, last as i128))
}

/// Build the strategy for one kind under a generation mode
pub fn numeric_strategy(
    kind: NumericKind,
    constraints: &NumericConstraints,
    mode: GenerationMode,
) -> Result<BoxedStrategy, GeneratorError> {
    constraints.validate()?;
    if kind == NumericKind::Number {
        return Ok(one_of(vec![
            numeric_strategy(NumericKind::Integer, constraints, mode)?,
            numeric_strategy(NumericKind::Double, constraints, mode)?,
        ]));
    }

    let valid = || {
        if kind.is_integer() {
            valid_integers(kind, constraints)
        } else {
            valid_floats(kind, constraints)
        }
    };
    let invalid = || {
        if kind.is_integer() {
            invalid_integers(kind, constraints)
        } else {
            invalid_floats(kind, constraints)
        }
    };

    Ok(match mode {
        GenerationMode::ValidOnly => valid(),
        GenerationMode::InvalidOnly => invalid(),
        GenerationMode::Both => one_of(vec![valid(), invalid()]),
    })
}

fn valid_integers(kind: NumericKind, c: &NumericConstraints) -> BoxedStrategy {
    let (dlo, dhi) = kind.int_domain();
    let lo = c.int_min().map_or(dlo, |m| m.max(dlo));
    let hi = c.int_max().map_or(dhi, |m| m.min(dhi));
    if lo > hi {
        return nothing();
    }

    match c.multiple_of {
        None => from_fn("integers", move |rng| Ok(int_value(draw_int(rng, lo, hi)))),
        Some(m) => match integral_step(m) {
            Some(step) => match int_multiples(lo, hi, step) {
                Some((first, last)) => from_fn("integer multiples", move |rng| {
                    Ok(int_value(draw_int(rng, first, last) * step))
                }),
                None => nothing(),
            },
            None => filtered(
                from_fn("integers", move |rng| Ok(int_value(draw_int(rng, lo, hi)))),
                move |v| v.as_f64().is_some_and(|x| is_multiple(x, m)),
            ),
        },
    }
}

fn invalid_integers(kind: NumericKind, c: &NumericConstraints) -> BoxedStrategy {
    let (dlo, dhi) = kind.int_domain();
    let mut classes = Vec::new();

    if let Some(min) = c.int_min() {
        if min > dlo {
            let hi = (min - 1).min(dhi);
            classes.push(from_fn("integers below minimum", move |rng| {
                Ok(int_value(draw_int(rng, dlo, hi)))
            }));
        }
    }
    if let Some(max) = c.int_max() {
        if max < dhi {
            let lo = (max + 1).max(dlo);
            classes.push(from_fn("integers above maximum", move |rng| {
                Ok(int_value(draw_int(rng, lo, dhi)))
            }));
        }
    }
    if let Some(m) = c.multiple_of {
        match integral_step(m) {
            // every integer is a multiple of 1
            Some(1) => {}
            Some(step) => classes.push(from_fn("integers off the step", move |rng| {
                let x = draw_int(rng, dlo, dhi);
                let off = if x.rem_euclid(step) != 0 {
                    x
                } else if x < dhi {
                    x + 1
                } else {
                    x - 1
                };
                Ok(int_value(off))
            })),
            None => classes.push(filtered(
                from_fn("integers", move |rng| Ok(int_value(draw_int(rng, dlo, dhi)))),
                move |v| v.as_f64().is_some_and(|x| !is_multiple(x, m)),
            )),
        }
    }

    one_of(classes)
}

/// Round to the kind's precision, keeping the value inside `[lo, hi]`
fn fit_kind(kind: NumericKind, x: f64, lo: f64, hi: f64) -> Option<f64> {
    let y = if kind == NumericKind::Float { x as f32 as f64 } else { x };
    (y.is_finite() && y >= lo && y <= hi).then_some(y)
}

fn valid_floats(kind: NumericKind, c: &NumericConstraints) -> BoxedStrategy {
    let (dlo, dhi) = kind.float_domain();
    let lo = c.minimum.map_or(dlo, |m| m.max(dlo));
    let hi = c.maximum.map_or(dhi, |m| m.min(dhi));
    if lo > hi || (lo == hi && (c.exclusive_minimum || c.exclusive_maximum)) {
        return nothing();
    }
    let multiples = match c.multiple_of {
        Some(step) => match float_multiples(lo, hi, step) {
            Some((first, last)) => Some((step, first, last)),
            None => return nothing(),
        },
        None => None,
    };
    let c = *c;
    let base = from_fn("floats", move |rng| {
        let x = match multiples {
            Some((step, first, last)) => (draw_int(rng, first, last) as f64 * step).clamp(lo, hi),
            None => draw_float(rng, lo, hi),
        };
        fit_kind(kind, x, lo, hi)
            .map(float_value)
            .unwrap_or(Err(DrawError::Exhausted(1)))
    });
    filtered(base, move |v| v.as_f64().is_some_and(|x| c.accepts(x)))
}

fn invalid_floats(kind: NumericKind, c: &NumericConstraints) -> BoxedStrategy {
    let (dlo, dhi) = kind.float_domain();
    let mut classes = Vec::new();
    let violates = |c: NumericConstraints| move |v: &Value| v.as_f64().is_some_and(|x| !c.accepts(x));

    if let Some(min) = c.minimum {
        if min > dlo {
            let below = NumericConstraints {
                maximum: Some(min),
                exclusive_maximum: !c.exclusive_minimum,
                ..Default::default()
            };
            let strategy = from_fn("floats below minimum", move |rng| {
                let x = draw_float(rng, dlo, min);
                fit_kind(kind, x, dlo, min)
                    .filter(|x| below.accepts(*x))
                    .map(float_value)
                    .unwrap_or(Err(DrawError::Exhausted(1)))
            });
            classes.push(filtered(strategy, violates(*c)));
        }
    }
    if let Some(max) = c.maximum {
        if max < dhi {
            let above = NumericConstraints {
                minimum: Some(max),
                exclusive_minimum: !c.exclusive_maximum,
                ..Default::default()
            };
            let strategy = from_fn("floats above maximum", move |rng| {
                let x = draw_float(rng, max, dhi);
                fit_kind(kind, x, max, dhi)
                    .filter(|x| above.accepts(*x))
                    .map(float_value)
                    .unwrap_or(Err(DrawError::Exhausted(1)))
            });
            classes.push(filtered(strategy, violates(*c)));
        }
    }
    if let Some(step) = c.multiple_of {
        // Off-step values only exist where the kind can still represent them
        let span = (step * 1e6).max(SMALL_RANGE).min(dhi);
        let strategy = from_fn("floats off the step", move |rng| {
            let x = draw_float(rng, -span, span);
            let x = if is_multiple(x, step) { x + step / 2.0 } else { x };
            fit_kind(kind, x, dlo, dhi)
                .filter(|x| !is_multiple(*x, step))
                .map(float_value)
                .unwrap_or(Err(DrawError::Exhausted(1)))
        });
        classes.push(strategy);
    }

    one_of(classes)
}
