//! Fuzzing result collection and summaries

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::{AnalysisResult, FuzzOutcome};

/// One accepted request/response pair, flattened for reporting
#[derive(Debug, Clone, Serialize)]
pub struct FuzzResult {
    /// Position in the order results were collected
    pub index: usize,
    pub request_id: String,
    pub method: String,
    pub url: String,
    /// Request body as sent, if any
    pub payload: Option<String>,
    pub status_code: u16,
    /// Response length in bytes
    pub response_length: usize,
    #[serde(with = "duration_secs")]
    pub response_time: Duration,
    pub response_headers: BTreeMap<String, String>,
    pub analysis: AnalysisResult,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

impl FuzzResult {
    pub fn from_outcome(index: usize, outcome: FuzzOutcome) -> Self {
        let FuzzOutcome {
            request,
            response,
            analysis,
        } = outcome;
        Self {
            index,
            request_id: request.id.clone(),
            method: request.method.as_str().to_string(),
            url: request.full_url(),
            payload: request.body.clone(),
            status_code: response.status,
            response_length: response.body.len(),
            response_time: response.elapsed,
            response_headers: response.headers.into_iter().collect(),
            analysis,
        }
    }
}

/// Every accepted result of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct FuzzResultSet {
    pub results: Vec<FuzzResult>,
    /// Status code to count
    pub status_distribution: BTreeMap<u16, usize>,
}

impl FuzzResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: FuzzResult) {
        *self.status_distribution.entry(result.status_code).or_insert(0) += 1;
        self.results.push(result);
    }

    pub fn from_outcomes(outcomes: impl IntoIterator<Item = FuzzOutcome>) -> Self {
        let mut set = Self::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            set.add_result(FuzzResult::from_outcome(i + 1, outcome));
        }
        set
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get results by status code
    pub fn by_status_code(&self, status: u16) -> Vec<&FuzzResult> {
        self.results.iter().filter(|r| r.status_code == status).collect()
    }

    /// Get results sorted by response time
    pub fn sorted_by_time(&self) -> Vec<&FuzzResult> {
        let mut results: Vec<_> = self.results.iter().collect();
        results.sort_by_key(|r| r.response_time);
        results
    }

    /// Get results sorted by response length
    pub fn sorted_by_length(&self) -> Vec<&FuzzResult> {
        let mut results: Vec<_> = self.results.iter().collect();
        results.sort_by_key(|r| r.response_length);
        results
    }

    pub fn stats(&self) -> FuzzResultStats {
        let total = self.results.len();

        let (average_response_time, average_response_length) = if total > 0 {
            let total_time: Duration = self.results.iter().map(|r| r.response_time).sum();
            let total_len: usize = self.results.iter().map(|r| r.response_length).sum();
            (total_time / total as u32, total_len / total)
        } else {
            (Duration::ZERO, 0)
        };

        FuzzResultStats {
            total_results: total,
            average_response_time,
            slowest: self.results.iter().map(|r| r.response_time).max().unwrap_or_default(),
            average_response_length,
            status_distribution: self.status_distribution.clone(),
        }
    }
}

/// Summary of a result set
#[derive(Debug, Clone, Serialize)]
pub struct FuzzResultStats {
    pub total_results: usize,
    #[serde(with = "duration_secs")]
    pub average_response_time: Duration,
    #[serde(with = "duration_secs")]
    pub slowest: Duration,
    pub average_response_length: usize,
    pub status_distribution: BTreeMap<u16, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, Request, Response};

    fn outcome(status: u16, body: &str, millis: u64) -> FuzzOutcome {
        FuzzOutcome {
            request: Request::new(HttpMethod::Get, "http://target.local/a"),
            response: Response::new(status)
                .with_body(body)
                .with_elapsed(Duration::from_millis(millis)),
            analysis: AnalysisResult::default(),
        }
    }

    fn sample() -> FuzzResultSet {
        FuzzResultSet::from_outcomes(vec![
            outcome(200, "hello", 30),
            outcome(404, "", 10),
            outcome(200, "a much longer body", 20),
        ])
    }

    #[test]
    fn test_status_distribution() {
        let set = sample();
        assert_eq!(set.len(), 3);
        assert_eq!(set.status_distribution[&200], 2);
        assert_eq!(set.status_distribution[&404], 1);
        assert_eq!(set.by_status_code(200).len(), 2);
        assert_eq!(set.results[0].index, 1);
    }

    #[test]
    fn test_sorting() {
        let set = sample();
        let by_time: Vec<u64> = set.sorted_by_time().iter().map(|r| r.response_time.as_millis() as u64).collect();
        assert_eq!(by_time, vec![10, 20, 30]);
        let by_len: Vec<usize> = set.sorted_by_length().iter().map(|r| r.response_length).collect();
        assert_eq!(by_len, vec![0, 5, 18]);
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(stats.total_results, 3);
        assert_eq!(stats.average_response_time, Duration::from_millis(20));
        assert_eq!(stats.slowest, Duration::from_millis(30));
        assert_eq!(stats.average_response_length, 7);

        let empty = FuzzResultSet::new().stats();
        assert_eq!(empty.total_results, 0);
        assert_eq!(empty.average_response_time, Duration::ZERO);
    }
}
