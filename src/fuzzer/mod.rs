//! Fuzzing runs - substitution, orchestration and result collection
//!
//! A [`FuzzSession`] wires the request queue, rate limiter, worker pool and
//! response queue together for one run. Templated runs expand `$name$` fuzz
//! points from wordlists before the requests are admitted.

mod payloads;
mod plan;
mod results;
mod session;
mod substitution;

pub use payloads::PayloadSet;
pub use plan::{FuzzPlan, PlanRequests};
pub use results::{FuzzResult, FuzzResultSet, FuzzResultStats};
pub use session::{FuzzSession, FuzzerConfig, FuzzerState};
pub use substitution::{find_placeholders, substitute, Expansion, FuzzTemplate, IterationMode};

use serde::Serialize;
use std::time::Instant;

/// Live counters for a running session
#[derive(Debug, Clone, Default, Serialize)]
pub struct FuzzerStats {
    /// Requests admitted to the request queue
    pub requests_queued: usize,
    /// Raw descriptions dropped at admission
    pub requests_rejected: usize,
    /// Requests that got as far as the transport
    pub requests_sent: usize,
    /// Responses that passed the match rules
    pub accepted: usize,
    /// Responses dropped by the match rules
    pub not_matched: usize,
    /// Transport failures
    pub errors: usize,
    pub requests_per_second: f64,
    #[serde(skip)]
    pub start_time: Option<Instant>,
    pub elapsed_ms: u64,
    /// Status of the most recent accepted response
    pub last_status: Option<u16>,
}

impl FuzzerStats {
    pub fn started() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
        self.record_sent();
    }

    pub fn record_not_matched(&mut self) {
        self.not_matched += 1;
        self.record_sent();
    }

    pub fn record_accepted(&mut self, status: u16) {
        self.accepted += 1;
        self.last_status = Some(status);
        self.record_sent();
    }

    fn record_sent(&mut self) {
        self.requests_sent += 1;
        self.tick();
    }

    /// Refresh elapsed time and throughput
    pub fn tick(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed_ms = start.elapsed().as_millis() as u64;
            if self.elapsed_ms > 0 {
                self.requests_per_second = self.requests_sent as f64 / (self.elapsed_ms as f64 / 1000.0);
            }
        }
    }

    /// Fraction of admitted requests already sent
    pub fn progress(&self) -> f64 {
        if self.requests_queued == 0 {
            0.0
        } else {
            (self.requests_sent as f64 / self.requests_queued as f64).min(1.0)
        }
    }
}
