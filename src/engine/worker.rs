//! Fuzz workers and the completion gate shared by a pool of them
//!
//! Each worker loops: wait out a pause, take a permit from the limiter,
//! dequeue a request, send it, analyse the response and enqueue the outcome.
//! Per-item failures are logged and skipped. When the request queue is
//! drained the worker leaves through the [`CompletionGate`]; the last one out
//! ends the response queue's loading phase.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::analyser::{AnalysisResult, ResponseAnalyser};
use super::queue::{FuzzOutcome, RequestQueue, ResponseQueue};
use super::ratelimiter::RateLimiter;
use crate::error::QueueError;
use crate::fuzzer::FuzzerStats;
use crate::http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    AwaitingPermit,
    Dequeuing,
    Sending,
    Analysing,
    Enqueuing,
    Draining,
    Done,
}

/// Run control broadcast to every worker of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Running,
    Paused,
    Stopped,
}

/// Counts the workers still running; the last to leave finishes the
/// response queue.
#[derive(Debug)]
pub struct CompletionGate {
    remaining: AtomicUsize,
    responses: Arc<ResponseQueue>,
}

impl CompletionGate {
    pub fn new(workers: usize, responses: Arc<ResponseQueue>) -> Self {
        if workers == 0 {
            responses.finish_loading();
        }
        Self {
            remaining: AtomicUsize::new(workers),
            responses,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Returns true for exactly one caller: the one that closed the gate.
    /// Extra calls once the count reaches zero are ignored.
    pub fn worker_done(&self) -> bool {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.responses.finish_loading();
            true
        } else {
            false
        }
    }
}

/// Everything a worker shares with the rest of the pool
#[derive(Clone)]
pub struct WorkerContext {
    pub requests: Arc<RequestQueue>,
    pub responses: Arc<ResponseQueue>,
    pub transport: Arc<dyn HttpTransport>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub analyser: Option<Arc<ResponseAnalyser>>,
    pub gate: Arc<CompletionGate>,
    pub control: watch::Receiver<RunControl>,
    pub stats: Arc<RwLock<FuzzerStats>>,
}

/// What one worker did before it finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub sent: usize,
    pub enqueued: usize,
    pub not_matched: usize,
    pub transport_errors: usize,
    /// This worker was the last one out of the gate
    pub signalled_completion: bool,
}

pub struct FuzzWorker {
    id: usize,
    ctx: WorkerContext,
    state: WorkerState,
}

impl FuzzWorker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self {
            id,
            ctx,
            state: WorkerState::Idle,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::trace!(worker_id = self.id, from = ?self.state, to = ?next, "Worker state");
        self.state = next;
    }

    /// Block while paused; false once the session has been stopped
    async fn wait_while_paused(&mut self) -> bool {
        let waited = self
            .ctx
            .control
            .wait_for(|c| *c != RunControl::Paused)
            .await
            .map(|control| *control);
        let control = match waited {
            Ok(control) => control,
            // Sender gone: keep the last known setting
            Err(_) => *self.ctx.control.borrow(),
        };
        control != RunControl::Stopped
    }

    /// Drain the request queue, then pass through the completion gate.
    pub async fn run(&mut self) -> WorkerReport {
        let mut report = WorkerReport::default();
        tracing::debug!(worker_id = self.id, "Worker started");

        loop {
            if !self.wait_while_paused().await {
                tracing::debug!(worker_id = self.id, "Worker stopped");
                break;
            }

            self.transition(WorkerState::AwaitingPermit);
            let throttle = match &self.ctx.limiter {
                Some(limiter) => match limiter.acquire().await {
                    Ok(throttle) => Some(throttle),
                    Err(e) => {
                        tracing::debug!(worker_id = self.id, error = %e, "Limiter closed");
                        break;
                    }
                },
                None => None,
            };

            self.transition(WorkerState::Dequeuing);
            let pending = match self.ctx.requests.get().await {
                Ok(pending) => pending,
                Err(QueueError::NoMoreItems) => {
                    tracing::debug!(worker_id = self.id, "Request queue drained");
                    break;
                }
            };

            self.transition(WorkerState::Sending);
            let sent = self.ctx.transport.send(&pending).await;
            drop(throttle);
            report.sent += 1;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    report.transport_errors += 1;
                    self.ctx.stats.write().record_error();
                    tracing::warn!(
                        worker_id = self.id,
                        url = %pending.request.url,
                        error = %e,
                        "Request failed, dropping"
                    );
                    self.transition(WorkerState::Idle);
                    continue;
                }
            };

            self.transition(WorkerState::Analysing);
            let analysis = match &self.ctx.analyser {
                Some(analyser) => match analyser.analyse(&response) {
                    Ok(analysis) => analysis,
                    Err(e) => {
                        report.not_matched += 1;
                        self.ctx.stats.write().record_not_matched();
                        tracing::debug!(
                            worker_id = self.id,
                            url = %pending.request.url,
                            status = response.status,
                            reason = %e,
                            "Response filtered out"
                        );
                        self.transition(WorkerState::Idle);
                        continue;
                    }
                },
                None => AnalysisResult::default(),
            };

            self.transition(WorkerState::Enqueuing);
            let status = response.status;
            let accepted = self.ctx.responses.put([FuzzOutcome {
                request: pending.request,
                response,
                analysis,
            }]);
            report.enqueued += accepted;
            self.ctx.stats.write().record_accepted(status);

            self.transition(WorkerState::Idle);
        }

        self.transition(WorkerState::Draining);
        report.signalled_completion = self.ctx.gate.worker_done();
        if report.signalled_completion {
            tracing::debug!(worker_id = self.id, "Last worker finished, response queue complete");
        }
        self.transition(WorkerState::Done);

        tracing::debug!(
            worker_id = self.id,
            sent = report.sent,
            enqueued = report.enqueued,
            "Worker finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::engine::analyser::{AnalysisOption, ConditionParams, MatchMode, MatchSpec};
    use crate::http::{PendingRequest, RequestBuilder, RequestDefaults, Response};
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers with the status encoded as the last path segment
    struct PathStatus;

    #[async_trait]
    impl HttpTransport for PathStatus {
        async fn send(&self, request: &PendingRequest) -> Result<Response, HttpError> {
            let last = request.request.url.rsplit('/').next().unwrap_or("");
            match last.parse::<u16>() {
                Ok(status) => Ok(Response::new(status)),
                Err(_) => Err(HttpError::ConnectionError(last.to_string())),
            }
        }
    }

    fn context(workers: usize, analyser: Option<ResponseAnalyser>) -> (WorkerContext, watch::Sender<RunControl>) {
        let defaults = RequestDefaults {
            base_url: Some("http://target.local".into()),
            ..Default::default()
        };
        let requests = Arc::new(RequestQueue::new(RequestBuilder::new(&defaults).unwrap()));
        let responses = Arc::new(ResponseQueue::new());
        let (tx, rx) = watch::channel(RunControl::Running);
        let ctx = WorkerContext {
            gate: Arc::new(CompletionGate::new(workers, responses.clone())),
            requests,
            responses,
            transport: Arc::new(PathStatus),
            limiter: None,
            analyser: analyser.map(Arc::new),
            control: rx,
            stats: Arc::new(RwLock::new(FuzzerStats::default())),
        };
        (ctx, tx)
    }

    fn get(path: &str) -> serde_json::Value {
        json!({"method": "GET", "url": path})
    }

    #[test]
    fn test_gate_signals_once() {
        let responses = Arc::new(ResponseQueue::new());
        let gate = CompletionGate::new(3, responses.clone());
        assert!(!gate.worker_done());
        assert!(!gate.worker_done());
        assert!(responses.is_loading());
        assert!(gate.worker_done());
        assert!(!responses.is_loading());
        assert!(!gate.worker_done());
        assert_eq!(gate.remaining(), 0);
    }

    #[test]
    fn test_empty_gate_finishes_immediately() {
        let responses = Arc::new(ResponseQueue::new());
        let _gate = CompletionGate::new(0, responses.clone());
        assert!(!responses.is_loading());
    }

    #[tokio::test]
    async fn test_worker_drops_failures_and_filtered_responses() {
        let matcher = MatchSpec::new(MatchMode::Hide).with_condition(
            AnalysisOption::ResponseCode,
            ConditionParams {
                code: vec![404],
                ..Default::default()
            },
        );
        let analyser = ResponseAnalyser::new(Some(matcher), vec![AnalysisOption::ResponseCode]);
        let (ctx, _tx) = context(1, Some(analyser));
        ctx.requests
            .populate(vec![get("/200"), get("/404"), get("/down"), get("/201")])
            .await;

        let mut worker = FuzzWorker::new(0, ctx.clone());
        let report = worker.run().await;

        assert_eq!(worker.state(), WorkerState::Done);
        assert_eq!(report.sent, 4);
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.not_matched, 1);
        assert_eq!(report.transport_errors, 1);
        assert!(report.signalled_completion);

        let statuses: Vec<u16> = ctx.responses.dump().map(|o| o.response.status).collect();
        assert_eq!(statuses, vec![200, 201]);
        assert!(!ctx.responses.is_loading());

        let stats = ctx.stats.read();
        assert_eq!(stats.requests_sent, 4);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.not_matched, 1);
    }

    #[tokio::test]
    async fn test_stopped_worker_leaves_through_gate() {
        let (ctx, tx) = context(1, None);
        ctx.requests.populate(vec![get("/200")]).await;
        tx.send(RunControl::Stopped).unwrap();

        let mut worker = FuzzWorker::new(7, ctx.clone());
        let report = worker.run().await;
        assert_eq!(report.sent, 0);
        assert!(report.signalled_completion);
        assert_eq!(ctx.requests.len(), 1);
    }

    #[tokio::test]
    async fn test_paused_worker_resumes() {
        let (ctx, tx) = context(1, None);
        tx.send(RunControl::Paused).unwrap();
        ctx.requests.populate(vec![get("/200"), get("/200")]).await;

        let handle = {
            let ctx = ctx.clone();
            tokio::spawn(async move { FuzzWorker::new(0, ctx).run().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ctx.requests.len(), 2);

        tx.send(RunControl::Running).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.enqueued, 2);
    }

    #[tokio::test]
    async fn test_closed_limiter_ends_worker() {
        let (mut ctx, _tx) = context(1, None);
        let limiter = Arc::new(RateLimiter::new(10, Some(1)).unwrap());
        limiter.close().await.unwrap();
        ctx.limiter = Some(limiter);
        ctx.requests.populate(vec![get("/200")]).await;

        let report = FuzzWorker::new(0, ctx.clone()).run().await;
        assert_eq!(report.sent, 0);
        assert!(report.signalled_completion);
    }
}
