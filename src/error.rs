//! Error types for the fuzzing engine
//!
//! Every concern gets its own `thiserror` enum; `FuzzerError` aggregates them
//! and carries the user-facing hints printed by the CLI.

use thiserror::Error;

use crate::engine::analyser::AnalysisOption;

/// Main error type for fuzzer operations
#[derive(Error, Debug)]
pub enum FuzzerError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Authentication preparation errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Request validation / build errors
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Rate limiter errors
    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Value generator errors
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// Fuzz-point substitution errors
    #[error("Substitution error: {0}")]
    Substitution(#[from] SubstitutionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError { path: String, source: std::io::Error },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Configuration file not found: {0}")]
    NotFound(String),
}

/// HTTP transport errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// Authentication preparation errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials for {mode}: {reason}")]
    InvalidCredentials { mode: String, reason: String },

    #[error("Unsupported authentication mode: {0}")]
    Unsupported(String),

    #[error("Malformed auth description: {0}")]
    Malformed(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),
}

/// Per-item request errors, never fatal to the admitting caller
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid request description: {0}")]
    Invalid(String),

    #[error("Failed to build request: {0}")]
    Build(String),

    #[error("Failed to prepare auth: {0}")]
    Auth(#[from] AuthError),
}

/// Queue control signals
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is empty and its producers are done
    #[error("The queue has no more items in it")]
    NoMoreItems,
}

/// Rate limiter errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfig(String),

    #[error("Rate limiter is closed")]
    Closed,

    #[error("Token replenishment task failed: {0}")]
    TaskFailed(String),
}

/// Value generator errors, raised when a strategy is constructed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Invalid generator spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Fuzz-point substitution errors
#[derive(Error, Debug)]
pub enum SubstitutionError {
    #[error("Bad fuzz input: {0}")]
    BadInput(String),

    #[error("Failed to read wordlist {path}: {source}")]
    Wordlist { path: String, source: std::io::Error },
}

/// A response rejected by the match/hide rules
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Response did not satisfy the '{}' condition", .option.as_str())]
pub struct ResponseNotMatched {
    pub option: AnalysisOption,
}

impl FuzzerError {
    /// Create an error with additional context
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FuzzerError::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            FuzzerError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            FuzzerError::Http(e) => format!("Network issue: {}", e.user_hint()),
            FuzzerError::Auth(e) => format!("Authentication issue: {}", e.user_hint()),
            FuzzerError::Request(e) => format!("Request issue: {}", e),
            FuzzerError::RateLimit(e) => format!("Rate limiting issue: {}", e.user_hint()),
            FuzzerError::Generator(e) => format!("Schema issue: {}", e.user_hint()),
            FuzzerError::Substitution(e) => format!("Fuzz input issue: {}", e.user_hint()),
            FuzzerError::Io(e) => format!("File system issue: {}", e),
            FuzzerError::WithContext { context, source } => {
                format!("{}: {}", context, source)
            }
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::NotFound(path) => {
                format!("Configuration file '{}' not found. Run with --generate-config to create one.", path)
            }
        }
    }
}

impl UserHint for HttpError {
    fn user_hint(&self) -> String {
        match self {
            HttpError::ConnectionError(_) => {
                "Could not connect to the server. Check if it's running and accessible.".into()
            }
            HttpError::Timeout(ms) => {
                format!("Request timed out after {}ms. The server may be slow or unresponsive.", ms)
            }
            HttpError::InvalidUrl(url) => {
                format!("'{}' is not a valid URL. Check the format.", url)
            }
            HttpError::Auth(e) => e.user_hint(),
            _ => self.to_string(),
        }
    }
}

impl UserHint for AuthError {
    fn user_hint(&self) -> String {
        match self {
            AuthError::Unsupported(mode) => {
                format!("'{}' is not supported. Use Basic, Digest, Bearer, API key, JWT, Custom or AWS4 auth.", mode)
            }
            AuthError::InvalidCredentials { mode, .. } => {
                format!("The credentials given for '{}' are incomplete or invalid.", mode)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for RateLimitError {
    fn user_hint(&self) -> String {
        match self {
            RateLimitError::InvalidConfig(reason) => {
                format!("{}. Both rate_limit and concurrency_limit must be at least 1.", reason)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for GeneratorError {
    fn user_hint(&self) -> String {
        match self {
            GeneratorError::InvalidPattern { pattern, .. } => {
                format!("The pattern '{}' could not be compiled. Lookarounds and backreferences are not supported.", pattern)
            }
            GeneratorError::InvalidSpec(reason) => reason.clone(),
        }
    }
}

impl UserHint for SubstitutionError {
    fn user_hint(&self) -> String {
        match self {
            SubstitutionError::BadInput(_) => {
                "Every $placeholder$ must be unique and have exactly one wordlist.".into()
            }
            SubstitutionError::Wordlist { path, .. } => {
                format!("Could not read wordlist '{}'.", path)
            }
        }
    }
}

/// Extension trait for adding context to Result types
pub trait ResultExt<T, E> {
    fn with_context<C>(self, context: C) -> Result<T, FuzzerError>
    where
        C: Into<String>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T, FuzzerError>
    where
        C: Into<String>,
    {
        self.map_err(|e| FuzzerError::with_context(context, e))
    }
}
