//! Client-side retry helper for adapters.
//!
//! Retries only the closed retryable set (transient storage contention
//! and protocol codes); everything else surfaces immediately.

use std::time::Duration;

use cleo_core::{DispatchRequest, DispatchResponse};

use crate::pipeline::Dispatcher;

/// Backoff schedule. The default is 2 s, 4 s, 8 s — max 3 retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
        }
    }
}

impl RetryPolicy {
    /// A policy with no waiting, for tests.
    pub fn immediate(attempts: usize) -> Self {
        Self {
            delays: vec![Duration::ZERO; attempts],
        }
    }
}

/// Dispatch with retries: each retry reuses the same request (same
/// request id) so the audit trail ties the attempts together.
pub async fn dispatch_with_retries(
    dispatcher: &Dispatcher,
    req: DispatchRequest,
    policy: &RetryPolicy,
) -> DispatchResponse {
    let mut response = dispatcher.dispatch(req.clone()).await;

    for delay in &policy.delays {
        let retryable = response
            .error
            .as_ref()
            .map(|e| e.code.is_retryable())
            .unwrap_or(false);
        if !retryable {
            break;
        }
        tracing::debug!(
            domain = %req.domain,
            operation = %req.operation,
            delay_ms = delay.as_millis() as u64,
            "retrying after retryable error"
        );
        tokio::time::sleep(*delay).await;
        response = dispatcher.dispatch(req.clone()).await;
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleo_config::config::{Config, StorageEngine};
    use cleo_config::paths::ProjectPaths;
    use cleo_core::envelope::{Gateway, Source};
    use cleo_store::Store;
    use serde_json::json;
    use tempfile::tempdir;

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let paths = ProjectPaths::with_data_dir(dir.to_path_buf(), dir.join(".cleo"));
        let store = Store::open(paths, StorageEngine::Json);
        store.init().unwrap();
        Dispatcher::from_parts(store, Config::default())
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let req = DispatchRequest::new(
            Gateway::Query,
            "tasks",
            "show",
            json!({"taskId": "T404"}),
            Source::Cli,
        );
        let response =
            dispatch_with_retries(&dispatcher, req, &RetryPolicy::immediate(3)).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, cleo_core::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        let req = DispatchRequest::new(
            Gateway::Query,
            "tasks",
            "list",
            json!({}),
            Source::Cli,
        );
        let response =
            dispatch_with_retries(&dispatcher, req, &RetryPolicy::immediate(3)).await;
        assert!(response.success);
    }

    #[test]
    fn test_default_policy_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }
}
