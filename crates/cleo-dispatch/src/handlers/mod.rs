//! Domain handlers. Each is a pure function over `(store, gate output,
//! params)`: handlers never call each other; composition happens in the
//! pipeline.

pub mod admin;
pub mod check;
pub mod memory;
pub mod orchestrate;
pub mod pipeline_ops;
pub mod session;
mod side;
pub mod tasks;
pub mod tools;

use cleo_config::config::Config;
use cleo_core::{CleoError, ErrorCode};
use cleo_store::Store;
use serde_json::Value;

use crate::jobs::JobManager;

/// Everything a handler may touch.
pub struct HandlerCx<'a> {
    pub store: &'a Store,
    pub config: &'a Config,
    pub jobs: &'a JobManager,
}

/// What a handler hands back to the pipeline.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub data: Value,
    /// True when the desired state already held; the pipeline maps this to
    /// the operation's idempotent exit code.
    pub idempotent: bool,
    pub task_id: Option<String>,
    pub session_id: Option<String>,
}

impl HandlerOutcome {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            idempotent: false,
            task_id: None,
            session_id: None,
        }
    }

    pub fn already_done(data: Value) -> Self {
        Self {
            data,
            idempotent: true,
            task_id: None,
            session_id: None,
        }
    }

    pub fn with_task(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }
}

// -- Param helpers shared by every handler ---------------------------------

pub(crate) fn req_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, CleoError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CleoError::new(
                ErrorCode::ValidationError,
                format!("Parameter '{key}' must be a string"),
            )
        })
}

pub(crate) fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_bool(params: &Value, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn opt_str_list(params: &Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()
    })
}

/// `--dry-run`: validate and report without touching the store.
pub(crate) fn dry_run(params: &Value) -> bool {
    opt_bool(params, "dryRun")
}

pub(crate) fn unknown_operation(domain: &str, operation: &str) -> CleoError {
    // The registry screens operations before handlers run; reaching this
    // arm means the registry and the handler table disagree.
    CleoError::internal(format!("unrouted operation {domain}.{operation}"))
}
