//! Concurrent fuzzing engine: limiter, queues, analyser and workers

pub mod analyser;
pub mod queue;
pub mod ratelimiter;
pub mod worker;

pub use analyser::{
    AnalysisOption, AnalysisResult, AnalysisValue, ConditionParams, MatchMode, MatchSpec,
    ResponseAnalyser, ResponseInformation, SensitiveCategory,
};
pub use queue::{FuzzOutcome, LoadingState, PopulateReport, RequestQueue, ResponseQueue};
pub use ratelimiter::{RateLimiter, Throttle};
pub use worker::{CompletionGate, FuzzWorker, RunControl, WorkerContext, WorkerReport, WorkerState};
