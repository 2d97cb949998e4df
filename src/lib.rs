//! api-fuzzer - schema-aware API security fuzzing engine
//!
//! The crate is split into the HTTP collaborators (`http`), the concurrent
//! engine (`engine`: limiter, queues, analyser, workers), the value generator
//! (`generator`) and the run orchestration (`fuzzer`).

pub mod app;
pub mod engine;
pub mod error;
pub mod fuzzer;
pub mod generator;
pub mod http;

pub use app::Config;
pub use engine::{
    AnalysisOption, AnalysisResult, FuzzOutcome, RateLimiter, RequestQueue, ResponseAnalyser,
    ResponseQueue,
};
pub use error::{FuzzerError, QueueError, ResponseNotMatched};
pub use fuzzer::{FuzzResultSet, FuzzSession, IterationMode};
pub use generator::{FuzzGenerator, GenerationMode, SchemaFuzzGenerator};
pub use http::{HttpClient, HttpTransport, PendingRequest, Request, Response};
