//! Fuzz value generation
//!
//! [`FuzzGenerator`] turns declarative constraints into lazy [`Strategy`]
//! values for one [`GenerationMode`]. [`SchemaFuzzGenerator`] does the same
//! for whole JSON-Schema-like definitions.

pub mod collection;
pub mod numeric;
pub mod regex_gen;
pub mod schema;
pub mod string;
pub mod strategy;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::GeneratorError;

pub use collection::Properties;
pub use numeric::{NumericConstraints, NumericKind};
pub use schema::Schema;
pub use string::{StringConstraints, StringFormat};
pub use strategy::{BoxedStrategy, DrawError, Samples, Strategy};

/// Which side of the constraints generated values fall on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    ValidOnly,
    InvalidOnly,
    #[default]
    Both,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::ValidOnly => write!(f, "valid-only"),
            GenerationMode::InvalidOnly => write!(f, "invalid-only"),
            GenerationMode::Both => write!(f, "both"),
        }
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "valid-only" | "valid" => Ok(GenerationMode::ValidOnly),
            "invalid-only" | "invalid" => Ok(GenerationMode::InvalidOnly),
            "both" => Ok(GenerationMode::Both),
            other => Err(format!("unknown generation mode '{}'", other)),
        }
    }
}

/// Strategy factory for a fixed generation mode
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzGenerator {
    mode: GenerationMode,
}

impl FuzzGenerator {
    pub fn new(mode: GenerationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn generate_numeric(
        &self,
        kind: NumericKind,
        constraints: &NumericConstraints,
    ) -> Result<BoxedStrategy, GeneratorError> {
        numeric::numeric_strategy(kind, constraints, self.mode)
    }

    pub fn generate_number(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        self.generate_numeric(NumericKind::Number, &NumericConstraints::new(minimum, maximum, multiple_of))
    }

    pub fn generate_float(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        self.generate_numeric(NumericKind::Float, &NumericConstraints::new(minimum, maximum, multiple_of))
    }

    pub fn generate_double(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        self.generate_numeric(NumericKind::Double, &NumericConstraints::new(minimum, maximum, multiple_of))
    }

    pub fn generate_integer(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        self.generate_numeric(NumericKind::Integer, &NumericConstraints::new(minimum, maximum, multiple_of))
    }

    pub fn generate_int32(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        self.generate_numeric(NumericKind::Int32, &NumericConstraints::new(minimum, maximum, multiple_of))
    }

    pub fn generate_int64(
        &self,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        self.generate_numeric(NumericKind::Int64, &NumericConstraints::new(minimum, maximum, multiple_of))
    }

    pub fn generate_string(&self, constraints: &StringConstraints) -> Result<BoxedStrategy, GeneratorError> {
        string::string_strategy(constraints, self.mode)
    }

    /// With a default, valid means the default and invalid its negation.
    /// Without one every boolean is fair game.
    pub fn generate_bool(&self, default: Option<bool>) -> BoxedStrategy {
        match (default, self.mode) {
            (Some(d), GenerationMode::ValidOnly) => strategy::just(Value::Bool(d)),
            (Some(d), GenerationMode::InvalidOnly) => strategy::just(Value::Bool(!d)),
            _ => strategy::from_fn("booleans", |rng| Ok(Value::Bool(rng.gen()))),
        }
    }

    pub fn generate_array(
        &self,
        min_items: Option<usize>,
        max_items: Option<usize>,
        unique_items: bool,
        items: Vec<BoxedStrategy>,
    ) -> Result<BoxedStrategy, GeneratorError> {
        collection::array_strategy(min_items, max_items, unique_items, items, self.mode)
    }

    pub fn generate_object(
        &self,
        props: Properties,
        additional_props: bool,
        min_properties: Option<usize>,
        max_properties: Option<usize>,
        required: &[String],
    ) -> Result<BoxedStrategy, GeneratorError> {
        collection::object_strategy(props, additional_props, min_properties, max_properties, required, self.mode)
    }

    pub fn generate_random_strategy(&self) -> BoxedStrategy {
        collection::random_strategy()
    }
}

/// Walks schema definitions into strategies
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaFuzzGenerator {
    generator: FuzzGenerator,
}

impl SchemaFuzzGenerator {
    pub fn new(mode: GenerationMode) -> Self {
        Self {
            generator: FuzzGenerator::new(mode),
        }
    }

    pub fn mode(&self) -> GenerationMode {
        self.generator.mode()
    }

    pub fn generator(&self) -> &FuzzGenerator {
        &self.generator
    }

    pub fn parse_and_generate_strategy(&self, definition: &Value) -> Result<BoxedStrategy, GeneratorError> {
        schema::build_from_value(definition, &self.generator)
    }

    /// Strategy for an already parsed schema
    pub fn generate_strategy(&self, schema: &Schema) -> Result<BoxedStrategy, GeneratorError> {
        schema::build(schema, &self.generator)
    }
}
