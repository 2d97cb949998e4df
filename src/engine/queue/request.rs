//! Request queue: validates raw descriptions and admits built requests

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::{LoadingQueue, LoadingState};
use crate::error::{QueueError, RequestError};
use crate::http::{HttpMethod, PendingRequest, RawRequest, RequestBuilder};

/// Items yielded between cooperative yields while populating
const POPULATE_BATCH: usize = 64;

/// Check a raw request description before it is built.
///
/// Rejects null fields, unknown methods, unresolvable URLs, string `json`
/// bodies that do not parse, and `auth` values that are not objects.
pub fn validate_request(item: &Value, builder: &RequestBuilder) -> Result<RawRequest, RequestError> {
    let fields = item
        .as_object()
        .ok_or_else(|| RequestError::Invalid("a request must be a JSON object".into()))?;

    if let Some((key, _)) = fields.iter().find(|(_, v)| v.is_null()) {
        return Err(RequestError::Invalid(format!("field '{}' has no value", key)));
    }

    let method = fields
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| RequestError::Invalid("missing string field 'method'".into()))?;
    method.parse::<HttpMethod>()?;

    let url = fields
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| RequestError::Invalid("missing string field 'url'".into()))?;
    builder.resolve_url(url)?;

    if let Some(Value::String(json)) = fields.get("json") {
        serde_json::from_str::<Value>(json)
            .map_err(|e| RequestError::Invalid(format!("json body is not valid JSON: {}", e)))?;
    }

    match fields.get("auth") {
        None | Some(Value::Object(_)) => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => {}
        Some(_) => {
            return Err(RequestError::Invalid(
                "auth must be an object or a list of objects".into(),
            ))
        }
    }

    serde_json::from_value(item.clone()).map_err(|e| RequestError::Invalid(e.to_string()))
}

/// Counts from one `populate` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateReport {
    pub admitted: usize,
    pub rejected: usize,
}

#[derive(Debug)]
pub struct RequestQueue {
    queue: LoadingQueue<PendingRequest>,
    builder: RequestBuilder,
}

/// Ends the loading phase when dropped, however `populate` exits
struct LoadingGuard<'a>(&'a LoadingQueue<PendingRequest>);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_loading();
    }
}

/// Closes the queue when dropped
#[derive(Debug)]
pub struct RequestQueueScope {
    queue: Arc<RequestQueue>,
}

impl std::ops::Deref for RequestQueueScope {
    type Target = RequestQueue;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl Drop for RequestQueueScope {
    fn drop(&mut self) {
        self.queue.close();
    }
}

impl RequestQueue {
    /// New queues start loading: consumers wait until a producer finishes
    pub fn new(builder: RequestBuilder) -> Self {
        Self {
            queue: LoadingQueue::default(),
            builder,
        }
    }

    pub fn builder(&self) -> &RequestBuilder {
        &self.builder
    }

    /// Validate, build and enqueue one item. Failures are logged and returned;
    /// they never poison the queue.
    pub fn put(&self, item: &Value) -> Result<(), RequestError> {
        let built = validate_request(item, &self.builder).and_then(|raw| self.builder.build(&raw));
        match built {
            Ok(pending) => {
                if !self.queue.push(pending) {
                    tracing::debug!("Request queue closed, dropping request");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid request");
                Err(e)
            }
        }
    }

    /// Admit every item, then leave the loading phase even if this future is
    /// dropped midway.
    pub async fn populate<I>(&self, items: I) -> PopulateReport
    where
        I: IntoIterator<Item = Value>,
    {
        self.queue.start_loading();
        let _guard = LoadingGuard(&self.queue);

        let mut report = PopulateReport::default();
        for (i, item) in items.into_iter().enumerate() {
            match self.put(&item) {
                Ok(()) => report.admitted += 1,
                Err(_) => report.rejected += 1,
            }
            if (i + 1) % POPULATE_BATCH == 0 {
                tokio::task::yield_now().await;
            }
        }

        tracing::debug!(admitted = report.admitted, rejected = report.rejected, "Request queue populated");
        report
    }

    /// Next request; `NoMoreItems` once empty and no longer loading
    pub async fn get(&self) -> Result<PendingRequest, QueueError> {
        self.queue.pop().await
    }

    pub fn start_loading(&self) {
        self.queue.start_loading();
    }

    pub fn finish_loading(&self) {
        self.queue.finish_loading();
    }

    pub fn is_loading(&self) -> bool {
        self.queue.state() == LoadingState::Loading
    }

    pub fn state(&self) -> LoadingState {
        self.queue.state()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop loading, discard pending requests and wake every waiter
    pub fn close(&self) {
        self.queue.close();
    }

    /// Guard that closes the queue when it goes out of scope
    pub fn scope(self: &Arc<Self>) -> RequestQueueScope {
        RequestQueueScope {
            queue: self.clone(),
        }
    }

    /// Run `f` with the queue and close it afterwards, whatever `f` returns
    pub async fn scoped<F, Fut, T>(self: &Arc<Self>, f: F) -> T
    where
        F: FnOnce(Arc<RequestQueue>) -> Fut,
        Fut: Future<Output = T>,
    {
        let _scope = self.scope();
        f(self.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestDefaults;
    use serde_json::json;

    fn queue() -> RequestQueue {
        let defaults = RequestDefaults {
            base_url: Some("http://target.local".into()),
            ..Default::default()
        };
        RequestQueue::new(RequestBuilder::new(&defaults).unwrap())
    }

    #[test]
    fn test_validation_rules() {
        let q = queue();
        let b = q.builder();
        assert!(validate_request(&json!({"method": "GET", "url": "/a"}), b).is_ok());
        assert!(validate_request(&json!({"method": "delete", "url": "http://x/a"}), b).is_ok());
        assert!(validate_request(&json!({"method": "GET", "url": "/a", "headers": null}), b).is_err());
        assert!(validate_request(&json!({"method": "FETCH", "url": "/a"}), b).is_err());
        assert!(validate_request(&json!({"url": "/a"}), b).is_err());
        assert!(validate_request(&json!({"method": "POST", "url": "/a", "json": "{bad"}), b).is_err());
        assert!(validate_request(&json!({"method": "GET", "url": "/a", "auth": "token"}), b).is_err());
        assert!(validate_request(&json!({"method": "GET", "url": "/a", "auth": [1]}), b).is_err());
        assert!(validate_request(&json!(["GET", "/a"]), b).is_err());
    }

    #[test]
    fn test_relative_url_needs_base() {
        let q = RequestQueue::new(RequestBuilder::default());
        assert!(validate_request(&json!({"method": "GET", "url": "/a"}), q.builder()).is_err());
    }

    #[tokio::test]
    async fn test_populate_reports_and_drains_in_order() {
        let q = queue();
        let items = vec![
            json!({"method": "GET", "url": "/1"}),
            json!({"method": "BOGUS", "url": "/2"}),
            json!({"method": "GET", "url": "/3"}),
        ];
        let report = q.populate(items).await;
        assert_eq!(report, PopulateReport { admitted: 2, rejected: 1 });
        assert!(!q.is_loading());

        assert_eq!(q.get().await.unwrap().request.url, "http://target.local/1");
        assert_eq!(q.get().await.unwrap().request.url, "http://target.local/3");
        assert_eq!(q.get().await.unwrap_err(), QueueError::NoMoreItems);
    }

    #[tokio::test]
    async fn test_round_trip_many() {
        let q = queue();
        let n = 200;
        let items = (0..n).map(|i| json!({"method": "GET", "url": format!("/{}", i)}));
        assert_eq!(q.populate(items).await.admitted, n);
        for i in 0..n {
            assert!(q.get().await.unwrap().request.url.ends_with(&format!("/{}", i)));
        }
        assert_eq!(q.get().await.unwrap_err(), QueueError::NoMoreItems);
    }

    #[tokio::test]
    async fn test_scoped_closes_on_exit() {
        let q = Arc::new(queue());
        let result: Result<(), &str> = q
            .scoped(|q| async move {
                q.put(&json!({"method": "GET", "url": "/x"})).unwrap();
                Err("boom")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(q.state(), LoadingState::Closed);
        assert!(q.is_empty());
        assert_eq!(q.get().await.unwrap_err(), QueueError::NoMoreItems);
    }
}
