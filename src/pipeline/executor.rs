use crate::{
    error::AppError,
    loki::{LogStore, BACKEND_NAME},
    pipeline::ValidatedQuery,
    retry::{with_single_retry, RetryPolicy},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs validated queries against the log store
pub struct QueryExecutor {
    store: Arc<dyn LogStore>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn LogStore>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            store,
            retry,
            call_timeout,
        }
    }

    /// Execute `query` and return the store's response body unmodified.
    ///
    /// A 4xx from the store is returned as [`AppError::BackendQueryError`]
    /// without a retry. Transport failures and 5xx get one retry and then
    /// become [`AppError::BackendUnavailable`].
    pub async fn execute(&self, query: &ValidatedQuery) -> Result<Value, AppError> {
        let store = &self.store;
        let expr = query.expr();
        let result = with_single_retry(&self.retry, BACKEND_NAME, self.call_timeout, move || {
            store.query(expr)
        })
        .await;

        match result {
            Ok(body) => {
                debug!(query = expr, "Store query succeeded");
                Ok(body)
            }
            Err(AppError::Upstream {
                status, message, ..
            }) if (400..500).contains(&status) => Err(AppError::BackendQueryError {
                status,
                body: message,
            }),
            Err(AppError::Upstream {
                status, message, ..
            }) => Err(AppError::BackendUnavailable {
                backend: BACKEND_NAME.to_string(),
                detail: format!("HTTP {}: {}", status, message),
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::metadata::tests::{fast_retry, FakeStore};
    use crate::pipeline::validator::validate;
    use crate::pipeline::{CandidateQuery, QuerySource};
    use std::sync::atomic::Ordering;

    fn validated(expr: &str) -> ValidatedQuery {
        validate(
            CandidateQuery {
                expr: expr.to_string(),
                attempt: 1,
                source: QuerySource::Model,
            },
            None,
        )
        .unwrap()
    }

    fn upstream(status: u16, message: &str) -> AppError {
        AppError::Upstream {
            backend: BACKEND_NAME.to_string(),
            status,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_result_passed_through() {
        let body = serde_json::json!({"status": "success", "data": {"resultType": "streams", "result": [{"stream": {"status": "500"}, "values": [["1", "line"]]}]}});
        let store = Arc::new(FakeStore::default());
        store.query_responses.lock().unwrap().push(Ok(body.clone()));
        let executor = QueryExecutor::new(store.clone(), fast_retry(), Duration::from_secs(1));

        let result = executor.execute(&validated(r#"{status="500"}"#)).await.unwrap();

        assert_eq!(result, body);
        assert_eq!(store.queries.lock().unwrap()[0], r#"{status="500"}"#);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let store = Arc::new(FakeStore::default());
        store
            .query_responses
            .lock()
            .unwrap()
            .push(Err(upstream(400, "parse error at line 1, col 9: syntax error")));
        let executor = QueryExecutor::new(store.clone(), fast_retry(), Duration::from_secs(1));

        let err = executor.execute(&validated(r#"{status="500"}"#)).await.unwrap_err();

        match err {
            AppError::BackendQueryError { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("syntax error"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.query_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_retried_once() {
        let store = Arc::new(FakeStore::default());
        store
            .query_responses
            .lock()
            .unwrap()
            .extend([Err(upstream(503, "ingester unavailable")), Err(upstream(503, "ingester unavailable"))]);
        let executor = QueryExecutor::new(store.clone(), fast_retry(), Duration::from_secs(1));

        let err = executor.execute(&validated(r#"{status="500"}"#)).await.unwrap_err();

        assert!(matches!(err, AppError::BackendUnavailable { .. }));
        assert_eq!(store.query_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_server_error_then_success() {
        let store = Arc::new(FakeStore::default());
        store
            .query_responses
            .lock()
            .unwrap()
            .push(Err(upstream(502, "bad gateway")));
        let executor = QueryExecutor::new(store.clone(), fast_retry(), Duration::from_secs(1));

        executor.execute(&validated(r#"{status="500"}"#)).await.unwrap();
        assert_eq!(store.query_calls.load(Ordering::SeqCst), 2);
    }
}
