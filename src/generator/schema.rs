//! JSON-Schema-like definitions and the walk that turns them into strategies
//!
//! Definitions are parsed into [`Schema`] up front so malformed input fails
//! before any value is drawn. The walk then dispatches on the parsed tree.
//! `type` takes precedence over composition keywords; among those the first
//! of `oneOf`, `anyOf`, `allOf`, `not` wins.

use parking_lot::Mutex;
use rand::{Rng, RngCore};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::collection::{array_strategy, object_strategy, random_strategy, Properties};
use super::numeric::{is_multiple, NumericConstraints, NumericKind};
use super::string::{StringConstraints, StringFormat};
use super::strategy::{filtered, just, nothing, one_of, BoxedStrategy, DrawError, Strategy};
use super::{FuzzGenerator, GenerationMode};
use crate::error::GeneratorError;

/// Branches an `anyOf` may list; subsets are tracked as a 64-bit mask
const MAX_ANY_OF_BRANCHES: usize = 63;

#[derive(Debug, Clone)]
pub enum Schema {
    /// `{}` or `true`
    Any,
    Null,
    Boolean {
        default: Option<bool>,
    },
    Numeric {
        kind: NumericKind,
        constraints: NumericConstraints,
    },
    String(StringConstraints),
    Array {
        min_items: Option<usize>,
        max_items: Option<usize>,
        unique_items: bool,
        items: Option<Box<Schema>>,
    },
    Object {
        properties: Vec<(String, Schema)>,
        required: Vec<String>,
        additional_properties: bool,
        min_properties: Option<usize>,
        max_properties: Option<usize>,
    },
    OneOf(Vec<Schema>),
    AnyOf(Vec<Schema>),
    AllOf(Vec<Schema>),
    Not(Box<Schema>),
}

fn invalid_spec(reason: impl Into<String>) -> GeneratorError {
    GeneratorError::InvalidSpec(reason.into())
}

fn usize_field(map: &Map<String, Value>, key: &str) -> Result<Option<usize>, GeneratorError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid_spec(format!("{} must be a non-negative integer, got {}", key, v))),
    }
}

fn f64_field(map: &Map<String, Value>, key: &str) -> Result<Option<f64>, GeneratorError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid_spec(format!("{} must be a number, got {}", key, v))),
    }
}

fn bool_field(map: &Map<String, Value>, key: &str) -> Result<Option<bool>, GeneratorError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(v) => Err(invalid_spec(format!("{} must be a boolean, got {}", key, v))),
    }
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, GeneratorError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(v) => Err(invalid_spec(format!("{} must be a string, got {}", key, v))),
    }
}

fn schema_list(map: &Map<String, Value>, key: &str) -> Result<Vec<Schema>, GeneratorError> {
    let branches = map
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid_spec(format!("{} must be a list of schemas", key)))?;
    if branches.is_empty() {
        return Err(invalid_spec(format!("{} must not be empty", key)));
    }
    branches.iter().map(Schema::parse).collect()
}

impl Schema {
    pub fn parse(definition: &Value) -> Result<Self, GeneratorError> {
        match definition {
            Value::Bool(true) => Ok(Schema::Any),
            Value::Object(map) => Self::parse_object(map),
            other => Err(invalid_spec(format!("expected a schema object, got {}", other))),
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Self, GeneratorError> {
        if map.contains_key("$ref") {
            return Err(invalid_spec("$ref is not supported, dereference the schema first"));
        }

        match map.get("type") {
            Some(Value::String(name)) => return Self::parse_typed(name, map),
            Some(Value::Array(names)) => {
                let branches = names
                    .iter()
                    .map(|name| match name {
                        Value::String(name) => Self::parse_typed(name, map),
                        other => Err(invalid_spec(format!("type names must be strings, got {}", other))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return match branches.len() {
                    0 => Err(invalid_spec("type list must not be empty")),
                    _ => Ok(Schema::OneOf(branches)),
                };
            }
            Some(other) => return Err(invalid_spec(format!("type must be a string or list, got {}", other))),
            None => {}
        }

        if map.contains_key("oneOf") {
            return Ok(Schema::OneOf(schema_list(map, "oneOf")?));
        }
        if map.contains_key("anyOf") {
            let branches = schema_list(map, "anyOf")?;
            if branches.len() > MAX_ANY_OF_BRANCHES {
                return Err(invalid_spec(format!(
                    "anyOf supports at most {} branches",
                    MAX_ANY_OF_BRANCHES
                )));
            }
            return Ok(Schema::AnyOf(branches));
        }
        if map.contains_key("allOf") {
            return Ok(Schema::AllOf(schema_list(map, "allOf")?));
        }
        if let Some(negated) = map.get("not") {
            if !negated.is_object() {
                return Err(invalid_spec("not must be a schema object"));
            }
            return Ok(Schema::Not(Box::new(Self::parse(negated)?)));
        }

        // Untyped: infer from the keywords present
        if ["properties", "required", "additionalProperties", "minProperties", "maxProperties"]
            .iter()
            .any(|k| map.contains_key(*k))
        {
            return Self::parse_typed("object", map);
        }
        if ["items", "minItems", "maxItems", "uniqueItems"].iter().any(|k| map.contains_key(*k)) {
            return Self::parse_typed("array", map);
        }
        if ["minLength", "maxLength", "pattern", "format"].iter().any(|k| map.contains_key(*k)) {
            return Self::parse_typed("string", map);
        }
        if ["minimum", "maximum", "multipleOf"].iter().any(|k| map.contains_key(*k)) {
            return Self::parse_typed("number", map);
        }
        Ok(Schema::Any)
    }

    fn parse_typed(name: &str, map: &Map<String, Value>) -> Result<Self, GeneratorError> {
        match name {
            "null" => Ok(Schema::Null),
            "boolean" => Ok(Schema::Boolean {
                default: map.get("default").and_then(Value::as_bool),
            }),
            "number" | "integer" => Self::parse_numeric(name, map),
            "string" => Self::parse_string(map),
            "array" => {
                let items = match map.get("items") {
                    None | Some(Value::Null) => None,
                    // Tuple form: any of the listed item schemas
                    Some(Value::Array(tuple)) => Some(Box::new(Schema::OneOf(
                        tuple.iter().map(Schema::parse).collect::<Result<_, _>>()?,
                    ))),
                    Some(items) => Some(Box::new(Schema::parse(items)?)),
                };
                Ok(Schema::Array {
                    min_items: usize_field(map, "minItems")?,
                    max_items: usize_field(map, "maxItems")?,
                    unique_items: bool_field(map, "uniqueItems")?.unwrap_or(false),
                    items,
                })
            }
            "object" => {
                let properties = match map.get("properties") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Object(props)) => props
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), Schema::parse(v)?)))
                        .collect::<Result<Vec<_>, GeneratorError>>()?,
                    Some(other) => return Err(invalid_spec(format!("properties must be an object, got {}", other))),
                };
                let required = match map.get("required") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(names)) => names
                        .iter()
                        .map(|n| {
                            n.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| invalid_spec(format!("required entries must be strings, got {}", n)))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(other) => return Err(invalid_spec(format!("required must be a list, got {}", other))),
                };
                // A schema for extra properties still allows them
                let additional_properties = match map.get("additionalProperties") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => *b,
                    Some(Value::Object(_)) => true,
                    Some(other) => {
                        return Err(invalid_spec(format!(
                            "additionalProperties must be a boolean or schema, got {}",
                            other
                        )))
                    }
                };
                Ok(Schema::Object {
                    properties,
                    required,
                    additional_properties,
                    min_properties: usize_field(map, "minProperties")?,
                    max_properties: usize_field(map, "maxProperties")?,
                })
            }
            other => Err(invalid_spec(format!("unknown type '{}'", other))),
        }
    }

    fn parse_numeric(name: &str, map: &Map<String, Value>) -> Result<Self, GeneratorError> {
        let format = str_field(map, "format")?;
        let kind = match (name, format) {
            ("integer", Some("int32")) => NumericKind::Int32,
            ("integer", Some("int64")) => NumericKind::Int64,
            ("integer", _) => NumericKind::Integer,
            (_, Some("float")) => NumericKind::Float,
            (_, Some("double")) => NumericKind::Double,
            _ => NumericKind::Number,
        };

        let mut constraints = NumericConstraints::new(
            f64_field(map, "minimum")?,
            f64_field(map, "maximum")?,
            f64_field(map, "multipleOf")?,
        );
        // Both the boolean flag form and the numeric bound form are accepted
        match map.get("exclusiveMinimum") {
            Some(Value::Bool(b)) => constraints.exclusive_minimum = *b,
            Some(Value::Number(n)) => {
                constraints.minimum = n.as_f64();
                constraints.exclusive_minimum = true;
            }
            _ => {}
        }
        match map.get("exclusiveMaximum") {
            Some(Value::Bool(b)) => constraints.exclusive_maximum = *b,
            Some(Value::Number(n)) => {
                constraints.maximum = n.as_f64();
                constraints.exclusive_maximum = true;
            }
            _ => {}
        }
        constraints.validate()?;
        Ok(Schema::Numeric { kind, constraints })
    }

    fn parse_string(map: &Map<String, Value>) -> Result<Self, GeneratorError> {
        let enum_values = match map.get("enum") {
            None | Some(Value::Null) => None,
            Some(Value::Array(values)) => Some(
                values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Some(other) => return Err(invalid_spec(format!("enum must be a list, got {}", other))),
        };
        Ok(Schema::String(StringConstraints {
            min_length: usize_field(map, "minLength")?,
            max_length: usize_field(map, "maxLength")?,
            format: str_field(map, "format")?.and_then(StringFormat::parse),
            pattern: str_field(map, "pattern")?.map(str::to_string),
            enum_values,
        }))
    }
}

// allOf merging

fn flatten_all_of(branches: &[Schema], out: &mut Vec<Schema>) {
    for branch in branches {
        match branch {
            Schema::AllOf(inner) => flatten_all_of(inner, out),
            Schema::Any => {}
            other => out.push(other.clone()),
        }
    }
}

/// Merge `allOf` branches into one schema. Object branches union their
/// properties and required lists; scalar branches of one type intersect
/// their bounds. Branches of different types cannot be merged.
pub fn merge_all_of(branches: &[Schema]) -> Result<Schema, GeneratorError> {
    let mut flat = Vec::new();
    flatten_all_of(branches, &mut flat);
    let mut iter = flat.into_iter();
    let Some(first) = iter.next() else {
        return Ok(Schema::Any);
    };
    iter.try_fold(first, merge_pair)
}

fn tighter_min(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn tighter_max(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Decimal places tried when scaling fractional steps onto integers
const MAX_STEP_DECIMALS: i32 = 9;

fn is_whole(v: f64) -> bool {
    (v - v.round()).abs() <= 1e-6
}

/// Smallest step that is a multiple of both `a` and `b`
fn common_multiple(a: f64, b: f64) -> Option<f64> {
    if is_multiple(a, b) {
        return Some(a);
    }
    if is_multiple(b, a) {
        return Some(b);
    }
    for decimals in 0..=MAX_STEP_DECIMALS {
        let scale = 10f64.powi(decimals);
        let (x, y) = (a * scale, b * scale);
        if !is_whole(x) || !is_whole(y) || x.max(y) >= u64::MAX as f64 {
            continue;
        }
        let (x, y) = (x.round() as u64, y.round() as u64);
        if x == 0 || y == 0 {
            return None;
        }
        let lcm = (x / gcd(x, y)).checked_mul(y)?;
        return Some(lcm as f64 / scale);
    }
    None
}

fn merge_multiple(a: Option<f64>, b: Option<f64>) -> Result<Option<f64>, GeneratorError> {
    match (a, b) {
        (Some(a), Some(b)) => common_multiple(a, b)
            .map(Some)
            .ok_or_else(|| invalid_spec(format!("multipleOf {} and {} have no common multiple", a, b))),
        (a, b) => Ok(a.or(b)),
    }
}

fn merge_kind(a: NumericKind, b: NumericKind) -> NumericKind {
    use NumericKind::*;
    match (a, b) {
        (Int32, _) | (_, Int32) => Int32,
        (Int64, _) | (_, Int64) => Int64,
        (Integer, _) | (_, Integer) => Integer,
        (Float, _) | (_, Float) => Float,
        (Double, _) | (_, Double) => Double,
        _ => Number,
    }
}

fn merge_numeric(a: &NumericConstraints, b: &NumericConstraints) -> Result<NumericConstraints, GeneratorError> {
    let (minimum, exclusive_minimum) = match (a.minimum, b.minimum) {
        (Some(x), Some(y)) if x > y => (Some(x), a.exclusive_minimum),
        (Some(x), Some(y)) if y > x => (Some(y), b.exclusive_minimum),
        (Some(x), Some(_)) => (Some(x), a.exclusive_minimum || b.exclusive_minimum),
        (Some(x), None) => (Some(x), a.exclusive_minimum),
        (None, y) => (y, b.exclusive_minimum),
    };
    let (maximum, exclusive_maximum) = match (a.maximum, b.maximum) {
        (Some(x), Some(y)) if x < y => (Some(x), a.exclusive_maximum),
        (Some(x), Some(y)) if y < x => (Some(y), b.exclusive_maximum),
        (Some(x), Some(_)) => (Some(x), a.exclusive_maximum || b.exclusive_maximum),
        (Some(x), None) => (Some(x), a.exclusive_maximum),
        (None, y) => (y, b.exclusive_maximum),
    };
    Ok(NumericConstraints {
        minimum,
        maximum,
        multiple_of: merge_multiple(a.multiple_of, b.multiple_of)?,
        exclusive_minimum,
        exclusive_maximum,
    })
}

fn merge_strings(a: StringConstraints, b: StringConstraints) -> StringConstraints {
    let enum_values = match (a.enum_values, b.enum_values) {
        (Some(x), Some(y)) => Some(x.into_iter().filter(|v| y.contains(v)).collect()),
        (x, y) => x.or(y),
    };
    StringConstraints {
        min_length: tighter_min(a.min_length, b.min_length),
        max_length: tighter_max(a.max_length, b.max_length),
        format: a.format.or(b.format),
        pattern: a.pattern.or(b.pattern),
        enum_values,
    }
}

fn merge_pair(a: Schema, b: Schema) -> Result<Schema, GeneratorError> {
    Ok(match (a, b) {
        (Schema::Any, other) | (other, Schema::Any) => other,
        (Schema::Null, Schema::Null) => Schema::Null,
        (Schema::Boolean { default: x }, Schema::Boolean { default: y }) => Schema::Boolean { default: x.or(y) },
        (
            Schema::Numeric { kind: ka, constraints: ca },
            Schema::Numeric { kind: kb, constraints: cb },
        ) => Schema::Numeric {
            kind: merge_kind(ka, kb),
            constraints: merge_numeric(&ca, &cb)?,
        },
        (Schema::String(x), Schema::String(y)) => Schema::String(merge_strings(x, y)),
        (
            Schema::Array { min_items: amin, max_items: amax, unique_items: au, items: ai },
            Schema::Array { min_items: bmin, max_items: bmax, unique_items: bu, items: bi },
        ) => Schema::Array {
            min_items: tighter_min(amin, bmin),
            max_items: tighter_max(amax, bmax),
            unique_items: au || bu,
            items: match (ai, bi) {
                (Some(x), Some(y)) => Some(Box::new(merge_pair(*x, *y)?)),
                (x, y) => x.or(y),
            },
        },
        (
            Schema::Object {
                properties: mut props,
                required: mut req,
                additional_properties: a_add,
                min_properties: amin,
                max_properties: amax,
            },
            Schema::Object {
                properties: other_props,
                required: other_req,
                additional_properties: b_add,
                min_properties: bmin,
                max_properties: bmax,
            },
        ) => {
            for (name, schema) in other_props {
                match props.iter().position(|(k, _)| *k == name) {
                    Some(i) => {
                        let existing = std::mem::replace(&mut props[i].1, Schema::Any);
                        props[i].1 = merge_pair(existing, schema)?;
                    }
                    None => props.push((name, schema)),
                }
            }
            for name in other_req {
                if !req.contains(&name) {
                    req.push(name);
                }
            }
            Schema::Object {
                properties: props,
                required: req,
                additional_properties: a_add && b_add,
                min_properties: tighter_min(amin, bmin),
                max_properties: tighter_max(amax, bmax),
            }
        }
        (Schema::AllOf(x), Schema::AllOf(y)) => {
            let mut all = x;
            all.extend(y);
            merge_all_of(&all)?
        }
        (Schema::AllOf(x), other) | (other, Schema::AllOf(x)) => {
            let mut all = x;
            all.push(other);
            merge_all_of(&all)?
        }
        (a, b) => {
            return Err(invalid_spec(format!(
                "cannot combine {} and {} in allOf",
                a.kind_name(),
                b.kind_name()
            )))
        }
    })
}

/// The six JSON value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonKind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

const ALL_KINDS: [JsonKind; 6] = [
    JsonKind::Null,
    JsonKind::Boolean,
    JsonKind::Number,
    JsonKind::String,
    JsonKind::Array,
    JsonKind::Object,
];

fn kind_of(value: &Value) -> JsonKind {
    match value {
        Value::Null => JsonKind::Null,
        Value::Bool(_) => JsonKind::Boolean,
        Value::Number(_) => JsonKind::Number,
        Value::String(_) => JsonKind::String,
        Value::Array(_) => JsonKind::Array,
        Value::Object(_) => JsonKind::Object,
    }
}

impl Schema {
    fn kind_name(&self) -> &'static str {
        match self {
            Schema::Any => "any",
            Schema::Null => "null",
            Schema::Boolean { .. } => "boolean",
            Schema::Numeric { .. } => "number",
            Schema::String(_) => "string",
            Schema::Array { .. } => "array",
            Schema::Object { .. } => "object",
            Schema::OneOf(_) => "oneOf",
            Schema::AnyOf(_) => "anyOf",
            Schema::AllOf(_) => "allOf",
            Schema::Not(_) => "not",
        }
    }

    /// JSON kinds this schema can accept at all
    fn kinds(&self) -> Vec<JsonKind> {
        match self {
            Schema::Any | Schema::Not(_) => ALL_KINDS.to_vec(),
            Schema::Null => vec![JsonKind::Null],
            Schema::Boolean { .. } => vec![JsonKind::Boolean],
            Schema::Numeric { .. } => vec![JsonKind::Number],
            Schema::String(_) => vec![JsonKind::String],
            Schema::Array { .. } => vec![JsonKind::Array],
            Schema::Object { .. } => vec![JsonKind::Object],
            Schema::OneOf(branches) | Schema::AnyOf(branches) | Schema::AllOf(branches) => {
                let mut kinds: Vec<JsonKind> = Vec::new();
                for kind in branches.iter().flat_map(Schema::kinds) {
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
                kinds
            }
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, Schema::Any)
    }

    /// True when every JSON value satisfies the schema
    fn accepts_everything(&self) -> bool {
        match self {
            Schema::Any => true,
            Schema::OneOf(branches) | Schema::AnyOf(branches) => branches.iter().any(Schema::accepts_everything),
            Schema::AllOf(branches) => branches.iter().all(Schema::accepts_everything),
            _ => false,
        }
    }
}

/// Build the strategy for a parsed schema under the generator's mode
pub(crate) fn build(schema: &Schema, generator: &FuzzGenerator) -> Result<BoxedStrategy, GeneratorError> {
    let mode = generator.mode();
    match schema {
        Schema::Any => Ok(generator.generate_random_strategy()),
        Schema::Null => Ok(match mode {
            GenerationMode::ValidOnly => just(Value::Null),
            GenerationMode::InvalidOnly => random_strategy(),
            GenerationMode::Both => one_of(vec![just(Value::Null), random_strategy()]),
        }),
        Schema::Boolean { default } => Ok(generator.generate_bool(*default)),
        Schema::Numeric { kind, constraints } => generator.generate_numeric(*kind, constraints),
        Schema::String(constraints) => generator.generate_string(constraints),
        Schema::Array {
            min_items,
            max_items,
            unique_items,
            items,
        } => build_array(generator, *min_items, *max_items, *unique_items, items.as_deref()),
        Schema::Object {
            properties,
            required,
            additional_properties,
            min_properties,
            max_properties,
        } => build_object(
            generator,
            properties,
            required,
            *additional_properties,
            *min_properties,
            *max_properties,
        ),
        Schema::OneOf(branches) => Ok(one_of(
            branches
                .iter()
                .map(|b| build(b, generator))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Schema::AnyOf(branches) => AnyOfStrategy::new(branches.clone(), *generator).map(|s| Arc::new(s) as BoxedStrategy),
        Schema::AllOf(branches) => build(&merge_all_of(branches)?, generator),
        Schema::Not(negated) => build_not(negated, mode),
    }
}

fn build_array(
    generator: &FuzzGenerator,
    min_items: Option<usize>,
    max_items: Option<usize>,
    unique_items: bool,
    items: Option<&Schema>,
) -> Result<BoxedStrategy, GeneratorError> {
    let item_schema = items.unwrap_or(&Schema::Any);
    let valid_items = build(item_schema, &FuzzGenerator::new(GenerationMode::ValidOnly))?;
    let structural = generator.generate_array(min_items, max_items, unique_items, vec![valid_items])?;
    if generator.mode() == GenerationMode::ValidOnly || item_schema.is_any() {
        return Ok(structural);
    }

    // Well-sized arrays whose items break the item schema
    let invalid_items = build(item_schema, &FuzzGenerator::new(GenerationMode::InvalidOnly))?;
    if invalid_items.is_empty() {
        return Ok(structural);
    }
    let bad_items = array_strategy(
        Some(min_items.unwrap_or(0).max(1)),
        max_items,
        unique_items,
        vec![invalid_items],
        GenerationMode::ValidOnly,
    )?;
    Ok(one_of(vec![structural, bad_items]))
}

fn build_object(
    generator: &FuzzGenerator,
    properties: &[(String, Schema)],
    required: &[String],
    additional_properties: bool,
    min_properties: Option<usize>,
    max_properties: Option<usize>,
) -> Result<BoxedStrategy, GeneratorError> {
    let valid = FuzzGenerator::new(GenerationMode::ValidOnly);
    let valid_props: Properties = properties
        .iter()
        .map(|(name, schema)| Ok((name.clone(), build(schema, &valid)?)))
        .collect::<Result<_, GeneratorError>>()?;
    let structural = generator.generate_object(
        valid_props.clone(),
        additional_properties,
        min_properties,
        max_properties,
        required,
    )?;
    if generator.mode() == GenerationMode::ValidOnly {
        return Ok(structural);
    }

    // Well-shaped objects with exactly one property breaking its schema
    let invalid = FuzzGenerator::new(GenerationMode::InvalidOnly);
    let mut branches = vec![structural];
    for (i, (name, schema)) in properties.iter().enumerate() {
        if schema.is_any() {
            continue;
        }
        let bad = build(schema, &invalid)?;
        if bad.is_empty() {
            continue;
        }
        let mut props = valid_props.clone();
        props[i].1 = bad;
        let mut must_have: Vec<String> = required.to_vec();
        if !must_have.contains(name) {
            must_have.push(name.clone());
        }
        branches.push(object_strategy(
            props,
            additional_properties,
            min_properties,
            max_properties,
            &must_have,
            GenerationMode::ValidOnly,
        )?);
    }
    Ok(one_of(branches))
}

/// Values of every JSON kind the negated schema cannot accept
fn other_kinds(negated: &Schema) -> BoxedStrategy {
    let covered = negated.kinds();
    let mut branches = Vec::new();
    if !covered.contains(&JsonKind::Null) {
        branches.push(just(Value::Null));
    }
    let random_kinds = &ALL_KINDS[1..];
    if !random_kinds.iter().all(|k| covered.contains(k)) {
        branches.push(filtered(random_strategy(), move |v| !covered.contains(&kind_of(v))));
    }
    one_of(branches)
}

fn build_not(negated: &Schema, mode: GenerationMode) -> Result<BoxedStrategy, GeneratorError> {
    let accepted = || build(negated, &FuzzGenerator::new(GenerationMode::ValidOnly));
    let rejected = || -> Result<BoxedStrategy, GeneratorError> {
        if negated.accepts_everything() {
            return Ok(nothing());
        }
        Ok(one_of(vec![
            other_kinds(negated),
            build(negated, &FuzzGenerator::new(GenerationMode::InvalidOnly))?,
        ]))
    };
    Ok(match mode {
        GenerationMode::InvalidOnly => accepted()?,
        GenerationMode::ValidOnly => rejected()?,
        GenerationMode::Both => one_of(vec![accepted()?, rejected()?]),
    })
}

/// Draws from the merge of a random non-empty subset of branches. Merged
/// strategies are built on first use and cached per subset; a subset that
/// cannot be merged falls back to one of its branches.
struct AnyOfStrategy {
    branches: Vec<Schema>,
    generator: FuzzGenerator,
    cache: Mutex<HashMap<u64, Option<BoxedStrategy>>>,
}

impl fmt::Debug for AnyOfStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyOfStrategy")
            .field("branches", &self.branches.len())
            .field("mode", &self.generator.mode())
            .finish_non_exhaustive()
    }
}

impl AnyOfStrategy {
    fn new(branches: Vec<Schema>, generator: FuzzGenerator) -> Result<Self, GeneratorError> {
        if branches.is_empty() || branches.len() > MAX_ANY_OF_BRANCHES {
            return Err(invalid_spec(format!(
                "anyOf needs between 1 and {} branches",
                MAX_ANY_OF_BRANCHES
            )));
        }
        let mut cache = HashMap::new();
        for (i, branch) in branches.iter().enumerate() {
            let strategy = build(branch, &generator)?;
            cache.insert(1u64 << i, (!strategy.is_empty()).then_some(strategy));
        }
        Ok(Self {
            branches,
            generator,
            cache: Mutex::new(cache),
        })
    }

    fn subset(&self, mask: u64) -> Option<BoxedStrategy> {
        let mut cache = self.cache.lock();
        cache
            .entry(mask)
            .or_insert_with(|| {
                let selected: Vec<Schema> = self
                    .branches
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1u64 << i) != 0)
                    .map(|(_, b)| b.clone())
                    .collect();
                match merge_all_of(&selected).and_then(|merged| build(&merged, &self.generator)) {
                    Ok(strategy) if !strategy.is_empty() => Some(strategy),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(mask, error = %e, "anyOf subset cannot be merged");
                        None
                    }
                }
            })
            .clone()
    }
}

impl Strategy for AnyOfStrategy {
    fn draw(&self, rng: &mut dyn RngCore) -> Result<Value, DrawError> {
        let n = self.branches.len();
        let mask = rng.gen_range(1..(1u64 << n));
        if let Some(strategy) = self.subset(mask) {
            return strategy.draw(rng);
        }

        let members: Vec<u64> = (0..n).map(|i| 1u64 << i).filter(|bit| mask & bit != 0).collect();
        let start = rng.gen_range(0..members.len());
        for offset in 0..members.len() {
            if let Some(strategy) = self.subset(members[(start + offset) % members.len()]) {
                return strategy.draw(rng);
            }
        }
        Err(DrawError::Exhausted(members.len()))
    }

    fn is_empty(&self) -> bool {
        let cache = self.cache.lock();
        (0..self.branches.len()).all(|i| matches!(cache.get(&(1u64 << i)), Some(None)))
    }
}

/// Parse a raw definition and build its strategy
pub(crate) fn build_from_value(definition: &Value, generator: &FuzzGenerator) -> Result<BoxedStrategy, GeneratorError> {
    let schema = Schema::parse(definition)?;
    tracing::debug!(kind = schema.kind_name(), mode = ?generator.mode(), "Building strategy from schema");
    build(&schema, generator)
}
