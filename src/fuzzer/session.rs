//! Fuzz session: one run of the worker pool over a set of requests

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::plan::{FuzzPlan, PlanRequests};
use super::substitution::{FuzzTemplate, IterationMode};
use super::{FuzzResultSet, FuzzerStats};
use crate::app::Config;
use crate::engine::{
    AnalysisOption, CompletionGate, FuzzWorker, MatchSpec, RateLimiter, RequestQueue, ResponseAnalyser,
    ResponseQueue, RunControl, WorkerContext, WorkerReport,
};
use crate::error::FuzzerError;
use crate::http::{HttpClient, HttpSettings, HttpTransport, RequestBuilder, RequestDefaults};

/// Fuzzer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzerState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

/// Everything a session needs to know before it starts
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Workers draining the request queue
    pub workers: usize,
    /// Requests per second; no limiter when unset
    pub rate_limit: Option<u32>,
    /// In-flight requests allowed by the limiter
    pub concurrency_limit: Option<usize>,
    pub matcher: Option<MatchSpec>,
    pub analysis: Vec<AnalysisOption>,
    pub defaults: RequestDefaults,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rate_limit: None,
            concurrency_limit: None,
            matcher: None,
            analysis: Vec::new(),
            defaults: RequestDefaults::default(),
        }
    }
}

impl FuzzerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.engine.workers,
            rate_limit: config.engine.rate_limit,
            concurrency_limit: config.engine.concurrency_limit,
            matcher: config.analysis.matcher.clone(),
            analysis: config.analysis.options.clone(),
            defaults: config.request.clone(),
        }
    }

    /// Apply a plan's overrides; plan values win
    pub fn with_plan(mut self, plan: &FuzzPlan) -> Self {
        if let Some(workers) = plan.workers {
            self.workers = workers;
        }
        if plan.rate_limit.is_some() {
            self.rate_limit = plan.rate_limit;
        }
        if plan.concurrency_limit.is_some() {
            self.concurrency_limit = plan.concurrency_limit;
        }
        if plan.matcher.is_some() {
            self.matcher = plan.matcher.clone();
        }
        if !plan.analysis.is_empty() {
            self.analysis = plan.analysis.clone();
        }
        self
    }
}

/// Runs fuzzing sessions against one transport
pub struct FuzzSession {
    config: FuzzerConfig,
    transport: Arc<dyn HttpTransport>,
    state: Arc<RwLock<FuzzerState>>,
    stats: Arc<RwLock<FuzzerStats>>,
    control: watch::Sender<RunControl>,
    /// Request queue of the run in progress, closed by `stop`
    active: Mutex<Option<Arc<RequestQueue>>>,
    reports: Mutex<Vec<WorkerReport>>,
}

impl FuzzSession {
    pub fn new(config: FuzzerConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let (control, _) = watch::channel(RunControl::Running);
        Self {
            config,
            transport,
            state: Arc::new(RwLock::new(FuzzerState::Idle)),
            stats: Arc::new(RwLock::new(FuzzerStats::default())),
            control,
            active: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Session over a reqwest client built from `settings`
    pub fn with_client(config: FuzzerConfig, settings: &HttpSettings) -> Result<Self, FuzzerError> {
        let client = HttpClient::new(settings)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &FuzzerConfig {
        &self.config
    }

    /// Send every request description in `items` and collect what passes the
    /// match rules.
    pub async fn run<I>(&self, items: I) -> Result<FuzzResultSet, FuzzerError>
    where
        I: IntoIterator<Item = Value> + Send + 'static,
        I::IntoIter: Send + 'static,
    {
        let limiter = match self.config.rate_limit {
            Some(rate) => Some(Arc::new(RateLimiter::new(rate, self.config.concurrency_limit)?)),
            None => {
                if self.config.concurrency_limit.is_some() {
                    tracing::warn!("concurrency_limit has no effect without rate_limit");
                }
                None
            }
        };

        let requests = Arc::new(RequestQueue::new(RequestBuilder::new(&self.config.defaults)?));
        let _scope = requests.scope();
        let responses = Arc::new(ResponseQueue::new());
        let workers = self.config.workers;
        let gate = Arc::new(CompletionGate::new(workers, responses.clone()));
        let analyser = (self.config.matcher.is_some() || !self.config.analysis.is_empty())
            .then(|| Arc::new(ResponseAnalyser::new(self.config.matcher.clone(), self.config.analysis.clone())));

        {
            *self.state.write() = FuzzerState::Running;
            *self.stats.write() = FuzzerStats::started();
            self.reports.lock().clear();
            self.control.send_replace(RunControl::Running);
            // From here on `stop` reaches this run
            *self.active.lock() = Some(requests.clone());
        }
        tracing::info!(
            workers,
            rate_limit = ?self.config.rate_limit,
            concurrency_limit = ?self.config.concurrency_limit,
            "Fuzz session started"
        );

        let populate = {
            let requests = requests.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                let report = requests.populate(items).await;
                let mut stats = stats.write();
                stats.requests_queued += report.admitted;
                stats.requests_rejected += report.rejected;
                report
            })
        };

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let ctx = WorkerContext {
                requests: requests.clone(),
                responses: responses.clone(),
                transport: self.transport.clone(),
                limiter: limiter.clone(),
                analyser: analyser.clone(),
                gate: gate.clone(),
                control: self.control.subscribe(),
                stats: self.stats.clone(),
            };
            pool.spawn(async move { FuzzWorker::new(id, ctx).run().await });
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(report) => self.reports.lock().push(report),
                Err(e) => {
                    tracing::error!(error = %e, "Worker task failed");
                    // Its gate slot is never released; end loading here instead
                    responses.finish_loading();
                }
            }
        }

        // Workers only leave early when stopped; the producer is of no use then
        populate.abort();
        match populate.await {
            Ok(report) => tracing::debug!(admitted = report.admitted, rejected = report.rejected, "Population finished"),
            Err(e) if e.is_cancelled() => tracing::debug!("Population cancelled"),
            Err(e) => tracing::error!(error = %e, "Population task failed"),
        }

        if let Some(limiter) = limiter {
            if let Err(e) = limiter.close().await {
                tracing::error!(error = %e, "Rate limiter did not shut down cleanly");
            }
        }
        self.active.lock().take();

        let results = FuzzResultSet::from_outcomes(responses.dump());
        {
            let mut state = self.state.write();
            if *state != FuzzerState::Stopped {
                *state = FuzzerState::Completed;
            }
            self.stats.write().tick();
        }

        let stats = self.stats();
        tracing::info!(
            sent = stats.requests_sent,
            accepted = stats.accepted,
            not_matched = stats.not_matched,
            errors = stats.errors,
            results = results.len(),
            "Fuzz session finished"
        );
        Ok(results)
    }

    /// Expand `template` against `wordlists` and run the result
    pub async fn run_template(
        &self,
        template: Value,
        wordlists: &HashMap<String, Vec<String>>,
        mode: IterationMode,
    ) -> Result<FuzzResultSet, FuzzerError> {
        let template = FuzzTemplate::new(template)?;
        let expansion = template.expand(wordlists, mode)?;
        if let Some(total) = expansion.total() {
            tracing::info!(requests = total, iterator = %mode, "Expanded fuzz template");
        }
        self.run(expansion).await
    }

    /// Run a plan; wordlist files resolve relative to `base_dir`
    pub async fn run_plan(&self, plan: &FuzzPlan, base_dir: Option<&Path>) -> Result<FuzzResultSet, FuzzerError> {
        match &plan.requests {
            PlanRequests::Literal { requests } => self.run(requests.clone()).await,
            PlanRequests::Template { template, .. } => {
                let wordlists = plan.resolve_wordlists(base_dir)?;
                self.run_template(template.clone(), &wordlists, plan.iterator).await
            }
        }
    }

    /// Stop the run in progress. Without one this does nothing; a later
    /// `run` starts normally.
    pub fn stop(&self) {
        let active = self.active.lock();
        let Some(requests) = active.as_ref() else {
            tracing::debug!("No active run to stop");
            return;
        };
        *self.state.write() = FuzzerState::Stopped;
        self.control.send_replace(RunControl::Stopped);
        requests.close();
        tracing::info!("Fuzz session stopping");
    }

    /// Pause the fuzzer
    pub fn pause(&self) {
        let mut state = self.state.write();
        if *state == FuzzerState::Running {
            *state = FuzzerState::Paused;
            self.control.send_replace(RunControl::Paused);
            tracing::debug!("Fuzz session paused");
        }
    }

    /// Resume the fuzzer
    pub fn resume(&self) {
        let mut state = self.state.write();
        if *state == FuzzerState::Paused {
            *state = FuzzerState::Running;
            self.control.send_replace(RunControl::Running);
            tracing::debug!("Fuzz session resumed");
        }
    }

    /// Get current state
    pub fn state(&self) -> FuzzerState {
        *self.state.read()
    }

    /// Get current stats
    pub fn stats(&self) -> FuzzerStats {
        let mut stats = self.stats.read().clone();
        stats.tick();
        stats
    }

    /// Reports of the workers of the last run
    pub fn worker_reports(&self) -> Vec<WorkerReport> {
        self.reports.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConditionParams, MatchMode};
    use crate::error::HttpError;
    use crate::http::{PendingRequest, Response};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Status from the last path segment; tracks peak concurrency
    #[derive(Default)]
    struct StubTarget {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl HttpTransport for StubTarget {
        async fn send(&self, request: &PendingRequest) -> Result<Response, HttpError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let last = request.request.url.rsplit('/').next().unwrap_or("");
            last.parse::<u16>()
                .map(|status| Response::new(status).with_body(format!("status {}", status)))
                .map_err(|_| HttpError::ConnectionError(last.to_string()))
        }
    }

    fn config(workers: usize) -> FuzzerConfig {
        FuzzerConfig {
            workers,
            defaults: RequestDefaults {
                base_url: Some("http://target.local".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn get(path: &str) -> Value {
        json!({"method": "GET", "url": path})
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_run_collects_everything() {
        let target = Arc::new(StubTarget {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let session = FuzzSession::new(
            FuzzerConfig {
                rate_limit: Some(10),
                concurrency_limit: Some(2),
                ..config(3)
            },
            target.clone(),
        );

        let started = tokio::time::Instant::now();
        let results = session.run((0..50).map(|_| get("/200")).collect::<Vec<_>>()).await.unwrap();

        assert_eq!(results.len(), 50);
        assert_eq!(session.state(), FuzzerState::Completed);
        let reports = session.worker_reports();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().filter(|r| r.signalled_completion).count(), 1);
        assert_eq!(reports.iter().map(|r| r.enqueued).sum::<usize>(), 50);
        assert!(target.peak.load(Ordering::SeqCst) <= 2);
        // 10 tokens up front, the other 40 at 10 per second
        assert!(started.elapsed() >= Duration::from_millis(3_500));

        let stats = session.stats();
        assert_eq!(stats.requests_queued, 50);
        assert_eq!(stats.requests_sent, 50);
    }

    #[tokio::test]
    async fn test_match_rules_filter_results() {
        let matcher = MatchSpec::new(MatchMode::Match).with_condition(
            AnalysisOption::ResponseCode,
            ConditionParams {
                code: vec![200],
                ..Default::default()
            },
        );
        let session = FuzzSession::new(
            FuzzerConfig {
                matcher: Some(matcher),
                analysis: vec![AnalysisOption::ResponseCode],
                ..config(2)
            },
            Arc::new(StubTarget::default()),
        );

        let results = session
            .run(vec![get("/200"), get("/404"), get("/200"), get("/500")])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.results.iter().all(|r| r.status_code == 200));
        assert!(results.results.iter().all(|r| r.analysis.contains(AnalysisOption::ResponseCode)));
        assert_eq!(session.stats().not_matched, 2);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_dropped() {
        let session = FuzzSession::new(config(2), Arc::new(StubTarget::default()));
        let results = session
            .run(vec![
                get("/200"),
                json!({"method": "FETCH", "url": "/200"}),
                json!({"method": "GET", "url": "/200", "headers": null}),
                get("/down"),
            ])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let stats = session.stats();
        assert_eq!(stats.requests_rejected, 2);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_template_run() {
        let session = FuzzSession::new(config(2), Arc::new(StubTarget::default()));
        let wordlists = HashMap::from([
            ("$a$".to_string(), vec!["x".to_string(), "y".to_string()]),
            ("code".to_string(), vec!["200".to_string(), "201".to_string()]),
        ]);
        let results = session
            .run_template(json!({"method": "GET", "url": "/$a$/$code$"}), &wordlists, IterationMode::Product)
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results.status_distribution[&200], 2);
        assert_eq!(results.status_distribution[&201], 2);

        let err = session
            .run_template(json!({"url": "/$a$"}), &wordlists, IterationMode::Zip)
            .await
            .unwrap_err();
        assert!(matches!(err, FuzzerError::Substitution(_)));
    }

    #[tokio::test]
    async fn test_invalid_rate_limit_is_fatal() {
        let session = FuzzSession::new(
            FuzzerConfig {
                rate_limit: Some(0),
                ..config(1)
            },
            Arc::new(StubTarget::default()),
        );
        let err = session.run(vec![get("/200")]).await.unwrap_err();
        assert!(matches!(err, FuzzerError::RateLimit(_)));
        assert_eq!(session.state(), FuzzerState::Idle);
    }

    #[tokio::test]
    async fn test_stop_ends_a_slow_run() {
        let session = Arc::new(FuzzSession::new(
            config(1),
            Arc::new(StubTarget {
                delay: Duration::from_millis(50),
                ..Default::default()
            }),
        ));
        let run = {
            let session = session.clone();
            tokio::spawn(async move { session.run((0..100).map(|_| get("/200")).collect::<Vec<_>>()).await })
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        session.stop();

        let results = run.await.unwrap().unwrap();
        assert!(results.len() < 100);
        assert_eq!(session.state(), FuzzerState::Stopped);
        assert_eq!(session.worker_reports().iter().filter(|r| r.signalled_completion).count(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_a_run_does_not_block_the_next_one() {
        let session = FuzzSession::new(config(2), Arc::new(StubTarget::default()));
        session.stop();
        assert_eq!(session.state(), FuzzerState::Idle);

        let results = session.run(vec![get("/200"), get("/201")]).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(session.state(), FuzzerState::Completed);

        // The finished run is no longer active either
        session.stop();
        assert_eq!(session.state(), FuzzerState::Completed);
    }

    #[test]
    fn test_plan_overrides() {
        let plan = FuzzPlan::from_json(r#"{"requests": [], "workers": 9, "rate_limit": 5}"#).unwrap();
        let config = FuzzerConfig::default().with_plan(&plan);
        assert_eq!(config.workers, 9);
        assert_eq!(config.rate_limit, Some(5));
        assert_eq!(config.concurrency_limit, None);
    }
}
