//! Response queue: accepted results on their way back to the caller

use serde::Serialize;

use super::{LoadingQueue, LoadingState};
use crate::engine::analyser::AnalysisResult;
use crate::error::QueueError;
use crate::http::{Request, Response};

/// One accepted exchange and what the analyser extracted from it
#[derive(Debug, Clone, Serialize)]
pub struct FuzzOutcome {
    pub request: Request,
    pub response: Response,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Default)]
pub struct ResponseQueue {
    queue: LoadingQueue<FuzzOutcome>,
}

impl ResponseQueue {
    /// Starts in the loading state; the last worker ends it
    pub fn new() -> Self {
        Self::default()
    }

    /// Append outcomes; never blocks. Returns how many were accepted.
    pub fn put<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = FuzzOutcome>,
    {
        items
            .into_iter()
            .map(|item| self.queue.push(item))
            .filter(|accepted| *accepted)
            .count()
    }

    pub async fn get(&self) -> Result<FuzzOutcome, QueueError> {
        self.queue.pop().await
    }

    pub fn start_loading(&self) {
        self.queue.start_loading();
    }

    /// Mark producers done. Idempotent.
    pub fn finish_loading(&self) {
        self.queue.finish_loading();
    }

    pub fn is_loading(&self) -> bool {
        self.queue.state() == LoadingState::Loading
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.queue.close();
    }

    /// Final non-blocking sweep over whatever is queued right now
    pub fn dump(&self) -> Dump<'_> {
        Dump { queue: &self.queue }
    }
}

/// Iterator returned by [`ResponseQueue::dump`]
pub struct Dump<'a> {
    queue: &'a LoadingQueue<FuzzOutcome>,
}

impl Iterator for Dump<'_> {
    type Item = FuzzOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        match self.queue.try_pop() {
            Ok(Some(item)) => Some(item),
            Ok(None) => None,
            Err(QueueError::NoMoreItems) => None,
        }
    }
}
