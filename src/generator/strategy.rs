//! Lazy value strategies
//!
//! A strategy describes a (possibly infinite) set of JSON values and draws
//! from it with a caller-supplied RNG. Drawing never mutates the strategy, so
//! the same strategy can be sampled from many places at once and every
//! `samples(seed)` call restarts from scratch.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Attempts a filtered strategy makes before giving up on one draw
pub const FILTER_ATTEMPTS: usize = 256;

/// Consecutive failed draws after which `Samples` ends
const MAX_FAILED_DRAWS: usize = 32;

/// Largest bound drawn exactly; larger bounds only shape the window below them
pub const MAX_EDGE_SIZE: usize = 4096;

/// Why a single draw produced no value
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawError {
    #[error("strategy has no values")]
    Empty,

    #[error("no candidate passed the filter after {0} attempts")]
    Exhausted(usize),
}

pub trait Strategy: Send + Sync + fmt::Debug {
    fn draw(&self, rng: &mut dyn RngCore) -> Result<Value, DrawError>;

    /// True when the strategy can never produce a value
    fn is_empty(&self) -> bool {
        false
    }
}

pub type BoxedStrategy = Arc<dyn Strategy>;

impl dyn Strategy {
    /// Endless, reproducible iterator of values drawn with a fresh RNG
    /// seeded from `seed`. Ends early only if the strategy is empty or keeps
    /// failing to draw.
    pub fn samples(self: &Arc<Self>, seed: u64) -> Samples {
        Samples {
            strategy: self.clone(),
            rng: StdRng::seed_from_u64(seed),
            done: self.is_empty(),
        }
    }
}

pub struct Samples {
    strategy: BoxedStrategy,
    rng: StdRng,
    done: bool,
}

impl Iterator for Samples {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.done {
            return None;
        }
        for _ in 0..MAX_FAILED_DRAWS {
            match self.strategy.draw(&mut self.rng) {
                Ok(value) => return Some(value),
                Err(DrawError::Empty) => break,
                Err(DrawError::Exhausted(_)) => continue,
            }
        }
        tracing::debug!(strategy = ?self.strategy, "Strategy stopped producing values");
        self.done = true;
        None
    }
}

#[derive(Debug)]
struct Just(Value);

impl Strategy for Just {
    fn draw(&self, _rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
struct SampledFrom(Vec<Value>);

impl Strategy for SampledFrom {
    fn draw(&self, rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        self.0.choose(rng).cloned().ok_or(DrawError::Empty)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
struct OneOf(Vec<BoxedStrategy>);

impl Strategy for OneOf {
    fn draw(&self, rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        if self.0.is_empty() {
            return Err(DrawError::Empty);
        }
        let first = rng.gen_range(0..self.0.len());
        match self.0[first].draw(rng) {
            Ok(value) => Ok(value),
            Err(err) => {
                // Give the other branches a chance before failing the draw
                let mut rest: Vec<usize> = (0..self.0.len()).filter(|i| *i != first).collect();
                rest.shuffle(rng);
                for i in rest {
                    if let Ok(value) = self.0[i].draw(rng) {
                        return Ok(value);
                    }
                }
                Err(err)
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type Predicate = dyn Fn(&Value) -> bool + Send + Sync;

struct Filtered {
    inner: BoxedStrategy,
    predicate: Box<Predicate>,
}

impl fmt::Debug for Filtered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filtered").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl Strategy for Filtered {
    fn draw(&self, rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        for _ in 0..FILTER_ATTEMPTS {
            match self.inner.draw(rng) {
                Ok(candidate) if (self.predicate)(&candidate) => return Ok(candidate),
                Ok(_) | Err(DrawError::Exhausted(_)) => continue,
                Err(DrawError::Empty) => return Err(DrawError::Empty),
            }
        }
        Err(DrawError::Exhausted(FILTER_ATTEMPTS))
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

type DrawFn = dyn Fn(&mut dyn RngCore) -> Result<Value, DrawError> + Send + Sync;

struct FromFn {
    name: &'static str,
    f: Box<DrawFn>,
}

impl fmt::Debug for FromFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FromFn").field(&self.name).finish()
    }
}

impl Strategy for FromFn {
    fn draw(&self, rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        (self.f)(rng)
    }
}

#[derive(Debug)]
struct Nothing;

impl Strategy for Nothing {
    fn draw(&self, _rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        Err(DrawError::Empty)
    }

    fn is_empty(&self) -> bool {
        true
    }
}

/// A length in `[min, max]` that stays within `spread` of `min`, hitting
/// `min` and (when it is at most `MAX_EDGE_SIZE`) `max` now and then.
pub(crate) fn draw_length(rng: &mut dyn RngCore, min: usize, max: usize, spread: usize) -> usize {
    let upper = max.min(min.saturating_add(spread));
    match rng.gen_range(0..6u8) {
        0 => min,
        1 if max <= MAX_EDGE_SIZE => max,
        _ => rng.gen_range(min..=upper),
    }
}

/// First length past `max`, unless it is too large to build
pub(crate) fn length_above(max: usize) -> Option<usize> {
    max.checked_add(1).filter(|len| *len <= MAX_EDGE_SIZE)
}

/// Always the same value
pub fn just(value: Value) -> BoxedStrategy {
    Arc::new(Just(value))
}

/// Uniform choice from a fixed list; empty list means no values
pub fn sampled_from(values: Vec<Value>) -> BoxedStrategy {
    Arc::new(SampledFrom(values))
}

/// Union of strategies. Empty branches are dropped; no branches left means
/// no values.
pub fn one_of(branches: Vec<BoxedStrategy>) -> BoxedStrategy {
    let mut live: Vec<BoxedStrategy> = branches.into_iter().filter(|s| !s.is_empty()).collect();
    match live.len() {
        0 => nothing(),
        1 => live.remove(0),
        _ => Arc::new(OneOf(live)),
    }
}

/// Values of `inner` for which `predicate` holds
pub fn filtered<F>(inner: BoxedStrategy, predicate: F) -> BoxedStrategy
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    if inner.is_empty() {
        return inner;
    }
    Arc::new(Filtered {
        inner,
        predicate: Box::new(predicate),
    })
}

/// Strategy backed by a drawing function; `name` shows up in debug output
pub fn from_fn<F>(name: &'static str, f: F) -> BoxedStrategy
where
    F: Fn(&mut dyn RngCore) -> Result<Value, DrawError> + Send + Sync + 'static,
{
    Arc::new(FromFn { name, f: Box::new(f) })
}

/// The empty strategy
pub fn nothing() -> BoxedStrategy {
    Arc::new(Nothing)
}
