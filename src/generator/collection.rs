//! Array, object and free-form value strategies

use rand::seq::{index, SliceRandom};
use rand::{Rng, RngCore};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::numeric::{numeric_strategy, NumericConstraints, NumericKind};
use super::string::{string_strategy, StringConstraints};
use super::strategy::{draw_length, from_fn, just, length_above, nothing, one_of, BoxedStrategy, DrawError};
use super::GenerationMode;
use crate::error::GeneratorError;

/// Default spread of collection sizes past the minimum
const SIZE_SPREAD: usize = 8;

/// Extra draws allowed per slot when items must be unique
const UNIQUE_ATTEMPTS: usize = 32;

/// Draw from one of `items`, picked at random
fn draw_item(items: &[BoxedStrategy], rng: &mut dyn RngCore) -> Result<Value, DrawError> {
    let item = items.choose(rng).ok_or(DrawError::Empty)?;
    item.draw(rng)
}

fn draw_len(rng: &mut dyn RngCore, min: usize, max: usize) -> usize {
    draw_length(rng, min, max, SIZE_SPREAD)
}

fn array_of(items: Arc<Vec<BoxedStrategy>>, min: usize, max: usize, unique: bool) -> BoxedStrategy {
    if min > max {
        return nothing();
    }
    from_fn("array", move |rng| {
        let len = draw_len(rng, min, max);
        let mut out: Vec<Value> = Vec::with_capacity(len);
        while out.len() < len {
            let mut placed = false;
            for _ in 0..UNIQUE_ATTEMPTS {
                let v = draw_item(&items, rng)?;
                if !unique || !out.contains(&v) {
                    out.push(v);
                    placed = true;
                    break;
                }
            }
            if !placed {
                // Item domain too small for this length; settle for what we have
                if out.len() >= min {
                    break;
                }
                return Err(DrawError::Exhausted(UNIQUE_ATTEMPTS));
            }
        }
        Ok(Value::Array(out))
    })
}

/// Arrays of at least two items with one repeated element
fn array_with_duplicate(items: Arc<Vec<BoxedStrategy>>, min: usize, max: usize) -> BoxedStrategy {
    let min = min.max(2);
    if min > max {
        return nothing();
    }
    from_fn("array with duplicate", move |rng| {
        let len = draw_len(rng, min, max);
        let mut out = (0..len - 1)
            .map(|_| draw_item(&items, rng))
            .collect::<Result<Vec<_>, _>>()?;
        let dup = out[rng.gen_range(0..out.len())].clone();
        let at = rng.gen_range(0..=out.len());
        out.insert(at, dup);
        Ok(Value::Array(out))
    })
}

pub fn array_strategy(
    min_items: Option<usize>,
    max_items: Option<usize>,
    unique_items: bool,
    items: Vec<BoxedStrategy>,
    mode: GenerationMode,
) -> Result<BoxedStrategy, GeneratorError> {
    let items: Vec<BoxedStrategy> = items.into_iter().filter(|s| !s.is_empty()).collect();
    if items.is_empty() {
        return Err(GeneratorError::InvalidSpec(
            "arrays need at least one item strategy".into(),
        ));
    }
    let items = Arc::new(items);
    let min = min_items.unwrap_or(0);
    let max = max_items.unwrap_or(min.saturating_add(SIZE_SPREAD));

    let valid = || array_of(items.clone(), min, max, unique_items);
    let invalid = || {
        let mut classes = Vec::new();
        if min > 0 {
            classes.push(array_of(items.clone(), 0, min - 1, false));
        }
        if let Some(above) = max_items.and_then(length_above) {
            classes.push(array_of(items.clone(), above, above + SIZE_SPREAD, false));
        }
        if unique_items {
            classes.push(array_with_duplicate(items.clone(), min, max));
        }
        one_of(classes)
    };

    Ok(match mode {
        GenerationMode::ValidOnly => valid(),
        GenerationMode::InvalidOnly => invalid(),
        GenerationMode::Both => one_of(vec![valid(), invalid()]),
    })
}

/// Declared properties, in declaration order
pub type Properties = Vec<(String, BoxedStrategy)>;

/// Random property names that never collide with declared ones
fn filler_key(rng: &mut dyn RngCore, taken: &Map<String, Value>) -> String {
    loop {
        let key = format!("x_{:06x}", rng.gen_range(0..0x100_0000u32));
        if !taken.contains_key(&key) {
            return key;
        }
    }
}

fn add_fillers(
    obj: &mut Map<String, Value>,
    count: usize,
    filler: &BoxedStrategy,
    rng: &mut dyn RngCore,
) -> Result<(), DrawError> {
    for _ in 0..count {
        let key = filler_key(rng, obj);
        obj.insert(key, filler.draw(rng)?);
    }
    Ok(())
}

/// Object containing `keys` (drawn from their strategies, or the filler for
/// undeclared names) in declaration order
fn object_with(
    props: &Properties,
    keys: &[String],
    filler: &BoxedStrategy,
    rng: &mut dyn RngCore,
) -> Result<Map<String, Value>, DrawError> {
    let mut obj = Map::new();
    for (name, strategy) in props {
        if keys.contains(name) {
            obj.insert(name.clone(), strategy.draw(rng)?);
        }
    }
    for key in keys {
        if !obj.contains_key(key) {
            obj.insert(key.clone(), filler.draw(rng)?);
        }
    }
    Ok(obj)
}

#[derive(Clone)]
struct ObjectShape {
    props: Arc<Properties>,
    required: Arc<Vec<String>>,
    optional: Arc<Vec<String>>,
    additional: bool,
    min: usize,
    max: Option<usize>,
    filler: BoxedStrategy,
}

impl ObjectShape {
    fn declared(&self) -> Vec<String> {
        self.props.iter().map(|(k, _)| k.clone()).collect()
    }

    fn valid(&self) -> BoxedStrategy {
        let req = self.required.len();
        let max = self.max.unwrap_or(usize::MAX);
        let room_for_extras = if self.additional { SIZE_SPREAD } else { 0 };
        if req > max || self.min > req + self.optional.len() + room_for_extras || self.min > max {
            return nothing();
        }

        let shape = self.clone();
        from_fn("object", move |rng| {
            let opt_lo = shape.min.saturating_sub(req).min(shape.optional.len());
            let opt_hi = (max - req).min(shape.optional.len());
            let picked = draw_len(rng, opt_lo, opt_hi.max(opt_lo));
            let mut chosen: Vec<usize> = index::sample(rng, shape.optional.len(), picked).into_vec();
            chosen.sort_unstable();

            let mut keys: Vec<String> = shape.required.to_vec();
            keys.extend(chosen.into_iter().map(|i| shape.optional[i].clone()));
            let mut obj = object_with(&shape.props, &keys, &shape.filler, rng)?;

            if shape.additional {
                let room = max.saturating_sub(obj.len()).min(2);
                let missing = shape.min.saturating_sub(obj.len());
                let extras = if room > missing && rng.gen_bool(0.25) {
                    rng.gen_range(missing..=room)
                } else {
                    missing
                };
                add_fillers(&mut obj, extras, &shape.filler, rng)?;
            }
            Ok(Value::Object(obj))
        })
    }

    fn invalid(&self) -> BoxedStrategy {
        let declared = self.declared();
        let mut classes = Vec::new();

        for missing in self.required.iter() {
            let keys: Vec<String> = declared.iter().filter(|k| *k != missing).cloned().collect();
            let shape = self.clone();
            classes.push(from_fn("object missing required", move |rng| {
                let mut obj = object_with(&shape.props, &keys, &shape.filler, rng)?;
                let room = shape.max.map_or(3, |m| m.saturating_sub(obj.len()).min(3));
                if room > 0 {
                    let extras = rng.gen_range(1..=room);
                    add_fillers(&mut obj, extras, &shape.filler, rng)?;
                }
                Ok(Value::Object(obj))
            }));
        }

        if self.min > 0 {
            let keys: Vec<String> = declared.iter().take(self.min - 1).cloned().collect();
            let shape = self.clone();
            classes.push(from_fn("object below minProperties", move |rng| {
                object_with(&shape.props, &keys, &shape.filler, rng).map(Value::Object)
            }));
        }

        if let Some(above) = self.max.and_then(length_above) {
            let keys: Vec<String> = declared.iter().take(above).cloned().collect();
            let shape = self.clone();
            classes.push(from_fn("object above maxProperties", move |rng| {
                let mut obj = object_with(&shape.props, &keys, &shape.filler, rng)?;
                let target = above + rng.gen_range(0..=2);
                let extras = target.saturating_sub(obj.len());
                add_fillers(&mut obj, extras, &shape.filler, rng)?;
                Ok(Value::Object(obj))
            }));
        }

        one_of(classes)
    }
}

pub fn object_strategy(
    props: Properties,
    additional_props: bool,
    min_properties: Option<usize>,
    max_properties: Option<usize>,
    required: &[String],
    mode: GenerationMode,
) -> Result<BoxedStrategy, GeneratorError> {
    if let Some((name, _)) = props.iter().find(|(_, s)| s.is_empty()) {
        return Err(GeneratorError::InvalidSpec(format!(
            "property '{}' has no possible values",
            name
        )));
    }

    let mut req: Vec<String> = Vec::new();
    for name in required {
        if !req.contains(name) {
            req.push(name.clone());
        }
    }
    let optional: Vec<String> = props
        .iter()
        .map(|(k, _)| k.clone())
        .filter(|k| !req.contains(k))
        .collect();

    let shape = ObjectShape {
        props: Arc::new(props),
        required: Arc::new(req),
        optional: Arc::new(optional),
        additional: additional_props,
        min: min_properties.unwrap_or(0),
        max: max_properties,
        filler: filler_values()?,
    };

    Ok(match mode {
        GenerationMode::ValidOnly => shape.valid(),
        GenerationMode::InvalidOnly => shape.invalid(),
        GenerationMode::Both => one_of(vec![shape.valid(), shape.invalid()]),
    })
}

/// Simple scalars used for undeclared properties
fn filler_values() -> Result<BoxedStrategy, GeneratorError> {
    Ok(one_of(vec![
        string_strategy(&StringConstraints::default(), GenerationMode::ValidOnly)?,
        numeric_strategy(NumericKind::Integer, &NumericConstraints::default(), GenerationMode::ValidOnly)?,
        from_fn("booleans", |rng| Ok(Value::Bool(rng.gen()))),
        just(Value::Null),
    ]))
}

/// Any JSON-ish value: scalars of every kind, lists of text, flat maps of text
pub fn random_strategy() -> BoxedStrategy {
    let valid = GenerationMode::ValidOnly;
    let unconstrained = NumericConstraints::default();
    let text = match string_strategy(&StringConstraints::default(), valid) {
        Ok(text) => text,
        Err(_) => return nothing(),
    };
    let numbers: Vec<BoxedStrategy> = [
        NumericKind::Number,
        NumericKind::Integer,
        NumericKind::Int32,
        NumericKind::Int64,
    ]
    .into_iter()
    .filter_map(|kind| numeric_strategy(kind, &unconstrained, valid).ok())
    .collect();

    let list_text = text.clone();
    let map_text = text.clone();
    let mut branches = vec![
        text,
        from_fn("booleans", |rng| Ok(Value::Bool(rng.gen()))),
        from_fn("list of text", move |rng| {
            let len = rng.gen_range(1..=SIZE_SPREAD);
            (0..len)
                .map(|_| list_text.draw(rng))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }),
        from_fn("map of text", move |rng| {
            let len = rng.gen_range(1..=SIZE_SPREAD);
            let mut obj = Map::new();
            for _ in 0..len {
                let key = match map_text.draw(rng)? {
                    Value::String(k) if !k.is_empty() => k,
                    _ => format!("k{}", obj.len()),
                };
                obj.insert(key, map_text.draw(rng)?);
            }
            Ok(Value::Object(obj))
        }),
    ];
    branches.extend(numbers);
    one_of(branches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn item_strategies() -> Vec<BoxedStrategy> {
        vec![
            string_strategy(&StringConstraints::default(), GenerationMode::ValidOnly).unwrap(),
            numeric_strategy(NumericKind::Number, &NumericConstraints::default(), GenerationMode::ValidOnly)
                .unwrap(),
        ]
    }

    fn arrays(mode: GenerationMode) -> Vec<Vec<Value>> {
        array_strategy(Some(1), Some(5), true, item_strategies(), mode)
            .unwrap()
            .samples(17)
            .take(200)
            .map(|v| v.as_array().unwrap().clone())
            .collect()
    }

    fn has_duplicate(items: &[Value]) -> bool {
        let mut seen = HashSet::new();
        !items.iter().all(|v| seen.insert(v.to_string()))
    }

    #[test]
    fn test_array_valid() {
        let drawn = arrays(GenerationMode::ValidOnly);
        assert_eq!(drawn.len(), 200);
        for a in drawn {
            assert!((1..=5).contains(&a.len()), "{:?}", a);
            assert!(!has_duplicate(&a), "{:?}", a);
        }
    }

    #[test]
    fn test_array_invalid() {
        let drawn = arrays(GenerationMode::InvalidOnly);
        assert_eq!(drawn.len(), 200);
        for a in &drawn {
            assert!(a.is_empty() || a.len() > 5 || has_duplicate(a), "{:?}", a);
        }
        assert!(drawn.iter().any(|a| a.is_empty()));
        assert!(drawn.iter().any(|a| a.len() > 5));
        assert!(drawn.iter().any(|a| a.len() <= 5 && has_duplicate(a)));
    }

    #[test]
    fn test_array_both_is_union() {
        let drawn = arrays(GenerationMode::Both);
        assert!(drawn.iter().any(|a| (1..=5).contains(&a.len()) && !has_duplicate(a)));
        assert!(drawn.iter().any(|a| a.is_empty() || a.len() > 5 || has_duplicate(a)));
    }

    #[test]
    fn test_array_needs_items() {
        assert!(matches!(
            array_strategy(None, None, false, vec![], GenerationMode::ValidOnly),
            Err(GeneratorError::InvalidSpec(_))
        ));
    }

    fn props() -> Properties {
        let valid = GenerationMode::ValidOnly;
        vec![
            ("name".into(), string_strategy(&StringConstraints::default(), valid).unwrap()),
            (
                "age".into(),
                numeric_strategy(NumericKind::Integer, &NumericConstraints::default(), valid).unwrap(),
            ),
            ("active".into(), from_fn("bool", |rng| Ok(Value::Bool(rng.gen())))),
        ]
    }

    #[test]
    fn test_object_valid_keeps_declaration_order() {
        let s = object_strategy(props(), false, Some(1), Some(3), &["name".into()], GenerationMode::ValidOnly)
            .unwrap();
        let order = ["name", "age", "active"];
        for v in s.samples(5).take(100) {
            let obj = v.as_object().unwrap();
            assert!(obj.contains_key("name"));
            assert!((1..=3).contains(&obj.len()));
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            let expected: Vec<&str> = order.iter().copied().filter(|k| obj.contains_key(*k)).collect();
            assert_eq!(keys, expected);
        }
    }

    #[test]
    fn test_object_invalid_breaks_a_rule() {
        let s = object_strategy(props(), true, Some(2), Some(3), &["name".into()], GenerationMode::InvalidOnly)
            .unwrap();
        let drawn: Vec<Map<String, Value>> =
            s.samples(8).take(150).map(|v| v.as_object().unwrap().clone()).collect();
        assert_eq!(drawn.len(), 150);
        for obj in &drawn {
            assert!(!obj.contains_key("name") || obj.len() < 2 || obj.len() > 3, "{:?}", obj);
        }
        assert!(drawn.iter().any(|o| !o.contains_key("name")));
        assert!(drawn.iter().any(|o| o.len() > 3));
        assert!(drawn.iter().any(|o| o.len() < 2));
    }

    #[test]
    fn test_huge_max_items_stays_near_min() {
        let s = array_strategy(Some(2), Some(2_147_483_647), true, item_strategies(), GenerationMode::ValidOnly)
            .unwrap();
        for v in s.samples(3).take(100) {
            let len = v.as_array().unwrap().len();
            assert!((2..=2 + SIZE_SPREAD).contains(&len), "{}", len);
        }

        let s = array_strategy(Some(2), Some(usize::MAX), false, item_strategies(), GenerationMode::InvalidOnly)
            .unwrap();
        let drawn: Vec<Value> = s.samples(3).take(50).collect();
        assert_eq!(drawn.len(), 50);
        assert!(drawn.iter().all(|v| v.as_array().unwrap().len() < 2));
    }

    #[test]
    fn test_huge_max_properties_has_no_above_class() {
        let s = object_strategy(props(), true, None, Some(usize::MAX), &["name".into()], GenerationMode::InvalidOnly)
            .unwrap();
        for v in s.samples(4).take(50) {
            let obj = v.as_object().unwrap();
            assert!(!obj.contains_key("name"), "{:?}", obj);
            assert!(obj.len() <= 2 + 3);
        }
    }

    #[test]
    fn test_random_strategy_draws_varied_values() {
        let drawn: Vec<Value> = random_strategy().samples(21).take(200).collect();
        assert_eq!(drawn.len(), 200);
        assert!(drawn.iter().any(Value::is_string));
        assert!(drawn.iter().any(Value::is_number));
        assert!(drawn.iter().any(Value::is_boolean));
        assert!(drawn.iter().any(Value::is_array));
        assert!(drawn.iter().any(Value::is_object));
    }
}
