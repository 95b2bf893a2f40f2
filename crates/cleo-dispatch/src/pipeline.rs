//! Pipeline assembly: middleware in fixed order around the handler table.
//!
//! Order per request: tier projection, alias resolution, parameter
//! validation, verification gate (mutations only), audit-start, handler,
//! audit-finish, envelope assembly. Any stage may short-circuit with a
//! response, in which case nothing downstream runs.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use cleo_config::config::Config;
use cleo_config::paths::ProjectPaths;
use cleo_core::audit::AuditEntry;
use cleo_core::envelope::{DispatchRequest, DispatchResponse, Gateway, ResponseMeta};
use cleo_core::{CleoError, ErrorCode};
use cleo_store::Store;
use cleo_verify::{OperationContext, ProtocolType, SnapshotView, VerificationGate};
use serde_json::Value;

use crate::alias;
use crate::handlers::{self, HandlerCx, HandlerOutcome};
use crate::jobs::JobManager;
use crate::registry;
use crate::tier;

/// Owns the per-process singletons and runs the pipeline.
pub struct Dispatcher {
    store: Store,
    gate: VerificationGate,
    config: Config,
    jobs: JobManager,
}

impl Dispatcher {
    /// Open a dispatcher for a project root: effective config decides the
    /// storage engine.
    pub fn open(paths: ProjectPaths) -> anyhow::Result<Self> {
        let config = Config::load(&paths.config_file())?;
        let store = Store::open(paths, config.storage.engine);
        Ok(Self {
            store,
            gate: VerificationGate::new(),
            config,
            jobs: JobManager::new(),
        })
    }

    /// Assemble from parts (tests and adapters that preload config).
    pub fn from_parts(store: Store, config: Config) -> Self {
        Self {
            store,
            gate: VerificationGate::new(),
            config,
            jobs: JobManager::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one request through the full pipeline.
    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchResponse {
        let started = Instant::now();
        let mut params = req.params.clone();

        // 1. Tier projection.
        let mvi_tier = match tier::take_tier(&mut params) {
            Ok(t) => t,
            Err(message) => {
                return self.fail(&req, &req.domain, &req.operation, started, CleoError::new(ErrorCode::InvalidInput, message));
            }
        };

        // 2. Operation-alias resolution. The tier allow-list is checked
        // against the canonical domain so legacy names cannot widen it.
        let (domain, operation) = alias::resolve(&req.domain, &req.operation);

        if registry::is_domain(&domain) && !mvi_tier.allows(&domain) {
            let err = CleoError::new(
                ErrorCode::InvalidOperation,
                format!("Domain '{domain}' is not available at tier '{}'", mvi_tier.as_str()),
            )
            .with_alternatives(
                mvi_tier.allowed_domains().iter().map(|d| d.to_string()).collect(),
            );
            return self.fail(&req, &domain, &operation, started, err);
        }

        tier::apply_compact_default(req.source, &domain, &operation, &mut params);

        // 3. Parameter validation against the registry.
        if !registry::is_domain(&domain) {
            let err = CleoError::new(
                ErrorCode::InvalidDomain,
                format!("Unknown domain: '{domain}'"),
            )
            .with_alternatives(registry::DOMAINS.iter().map(|d| d.to_string()).collect());
            return self.fail(&req, &domain, &operation, started, err);
        }

        if domain == "nexus" {
            let err = CleoError::new(ErrorCode::NotImplemented, "The nexus domain is a placeholder");
            return self.fail(&req, &domain, &operation, started, err);
        }

        let Some(spec) = registry::lookup(&domain, &operation) else {
            let err = CleoError::new(
                ErrorCode::InvalidOperation,
                format!("Unknown operation: '{domain}.{operation}'"),
            )
            .with_alternatives(
                registry::operations_in(&domain).iter().map(|o| o.to_string()).collect(),
            );
            return self.fail(&req, &domain, &operation, started, err);
        };

        if spec.gateway != req.gateway {
            let err = CleoError::new(
                ErrorCode::InvalidOperation,
                format!(
                    "Operation '{domain}.{operation}' requires the {} gateway",
                    spec.gateway
                ),
            );
            return self.fail(&req, &domain, &operation, started, err);
        }

        for required in spec.required {
            if params.get(*required).is_none() {
                let err = CleoError::new(
                    ErrorCode::ValidationFailed,
                    format!("Missing required parameter '{required}' for {domain}.{operation}"),
                )
                .with_fix(format!("Provide '{required}' and retry"));
                return self.fail(&req, &domain, &operation, started, err);
            }
        }

        // 4. Verification gate, mutations only; project policy rides along.
        if req.gateway == Gateway::Mutate {
            if let Err(err) = self.run_gate(&domain, &operation, &params) {
                return self.fail(&req, &domain, &operation, started, err);
            }
            if let Err(err) = self.policy_check(&domain, &operation, &params) {
                return self.fail(&req, &domain, &operation, started, err);
            }
        }

        // 5. Audit-start. A store that cannot record the attempt does not
        // get to run the mutation.
        if let Err(err) = self.audit(&req, &domain, &operation, "dispatch.start", 0, 0, None, None)
        {
            return self.fail(&req, &domain, &operation, started, err);
        }

        // 6. Handler, bounded by the per-operation timeout. Suspension
        // points are the only cancellation points.
        let cx = HandlerCx {
            store: &self.store,
            config: &self.config,
            jobs: &self.jobs,
        };
        let timeout = Duration::from_secs(spec.timeout_secs);
        let handler_run = async { run_handler(&cx, &domain, &operation, &params) };
        let outcome = match tokio::time::timeout(timeout, handler_run).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CleoError::new(
                ErrorCode::Timeout,
                format!("{domain}.{operation} timed out after {}s", spec.timeout_secs),
            )),
        };

        // 7. Audit-finish and envelope assembly.
        match outcome {
            Ok(outcome) => {
                let exit_code = if outcome.idempotent {
                    spec.idempotent_exit.unwrap_or(0)
                } else {
                    0
                };
                let duration_ms = ms_since(started);
                if let Err(e) = self.audit(
                    &req,
                    &domain,
                    &operation,
                    "dispatch.finish",
                    exit_code,
                    duration_ms,
                    outcome.task_id.clone(),
                    outcome.session_id.clone(),
                ) {
                    tracing::error!(error = %e, "audit-finish failed after a successful handler");
                }

                let meta = self.meta(&req, &domain, &operation, duration_ms);
                if exit_code >= 100 {
                    DispatchResponse::ok_idempotent(meta, outcome.data, exit_code)
                } else {
                    DispatchResponse::ok(meta, outcome.data)
                }
            }
            Err(err) => self.fail(&req, &domain, &operation, started, err),
        }
    }

    fn run_gate(&self, domain: &str, operation: &str, params: &Value) -> Result<(), CleoError> {
        let protocol_type = match params.get("protocolType").and_then(Value::as_str) {
            Some(text) => Some(
                text.parse::<ProtocolType>()
                    .map_err(|e| CleoError::new(ErrorCode::ValidationError, e))?,
            ),
            None => None,
        };

        let tasks_doc = self.store.load_tasks().map_err(CleoError::from)?;
        let view = SnapshotView {
            tasks: &tasks_doc.tasks,
            max_depth: self.config.hierarchy.max_depth,
            max_siblings: self.config.hierarchy.max_siblings,
        };
        let ctx = OperationContext {
            domain,
            operation,
            gateway: Gateway::Mutate,
            params,
            protocol_type,
        };

        let report = self.gate.run(&ctx, &view);
        for warning in report.warnings() {
            tracing::warn!(domain, operation, message = %warning.message, "verification warning");
        }
        if report.passed() {
            Ok(())
        } else {
            Err(report
                .into_error()
                .unwrap_or_else(|| CleoError::internal("gate blocked without a violation")))
        }
    }

    /// Project-policy knobs from the configuration: session enforcement,
    /// completion notes, cancellation reasons.
    fn policy_check(&self, domain: &str, operation: &str, params: &Value) -> Result<(), CleoError> {
        use cleo_config::config::SessionEnforcement;

        let policy = &self.config.session;

        if domain == "tasks" {
            let require =
                policy.require_session || policy.enforcement == SessionEnforcement::Strict;
            let warn_only = policy.enforcement == SessionEnforcement::Warn && !require;
            if require || warn_only {
                let sessions = self.store.load_sessions().map_err(CleoError::from)?;
                if sessions.active().is_none() {
                    if require {
                        return Err(CleoError::validation(format!(
                            "tasks.{operation} requires an active session"
                        ))
                        .with_fix("cleo session start --scope <kind>:<subject>".to_string()));
                    }
                    tracing::warn!(operation, "mutating tasks without an active session");
                }
            }

            if operation == "complete"
                && policy.require_notes_on_complete
                && params.get("notes").and_then(Value::as_str).map(str::trim).unwrap_or("").is_empty()
            {
                return Err(CleoError::validation(
                    "Completion requires notes (session.requireNotesOnComplete is set)",
                ));
            }

            if self.config.cancellation.require_reason
                && operation == "update"
                && params.get("status").and_then(Value::as_str) == Some("cancelled")
                && params.get("reason").and_then(Value::as_str).map(str::trim).unwrap_or("").is_empty()
            {
                return Err(CleoError::validation(
                    "Cancelling requires a reason (cancellation.requireReason is set)",
                ));
            }
        }

        if domain == "session"
            && operation == "end"
            && policy.require_session_note
            && params.get("notes").and_then(Value::as_str).map(str::trim).unwrap_or("").is_empty()
        {
            return Err(CleoError::validation(
                "Ending a session requires notes (session.requireSessionNote is set)",
            ));
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        req: &DispatchRequest,
        domain: &str,
        operation: &str,
        action: &str,
        exit_code: i32,
        duration_ms: u64,
        task_id: Option<String>,
        session_id: Option<String>,
    ) -> Result<(), CleoError> {
        self.store
            .append_audit(&AuditEntry {
                ts: Utc::now(),
                action: action.into(),
                gateway: req.gateway,
                domain: domain.into(),
                operation: operation.into(),
                source: req.source,
                request_id: req.request_id.clone(),
                task_id,
                session_id,
                exit_code,
                duration_ms,
                details: None,
            })
            .map_err(CleoError::from)
    }

    fn meta(
        &self,
        req: &DispatchRequest,
        domain: &str,
        operation: &str,
        duration_ms: u64,
    ) -> ResponseMeta {
        ResponseMeta {
            gateway: req.gateway,
            domain: domain.into(),
            operation: operation.into(),
            timestamp: Utc::now(),
            duration_ms,
            source: req.source,
            request_id: req.request_id.clone(),
            strict: true,
        }
    }

    fn fail(
        &self,
        req: &DispatchRequest,
        domain: &str,
        operation: &str,
        started: Instant,
        err: CleoError,
    ) -> DispatchResponse {
        let duration_ms = ms_since(started);
        if let Err(e) = self.audit(
            req,
            domain,
            operation,
            "dispatch.finish",
            err.exit_code(),
            duration_ms,
            None,
            None,
        ) {
            tracing::warn!(error = %e, "audit write failed while reporting an error");
        }
        DispatchResponse::fail(self.meta(req, domain, operation, duration_ms), err)
    }
}

/// Route to the domain handler; panics are normalized to INTERNAL_ERROR at
/// this boundary.
fn run_handler(
    cx: &HandlerCx<'_>,
    domain: &str,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| match domain {
        "tasks" => handlers::tasks::handle(cx, operation, params),
        "session" => handlers::session::handle(cx, operation, params),
        "memory" => handlers::memory::handle(cx, operation, params),
        "check" => handlers::check::handle(cx, operation, params),
        "pipeline" => handlers::pipeline_ops::handle(cx, operation, params),
        "orchestrate" => handlers::orchestrate::handle(cx, operation, params),
        "tools" => handlers::tools::handle(cx, operation, params),
        "admin" => handlers::admin::handle(cx, operation, params),
        other => Err(CleoError::internal(format!("no handler for domain '{other}'"))),
    }));

    match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".into());
            tracing::error!(domain, operation, message, "handler panicked");
            Err(CleoError::internal(message))
        }
    }
}

fn ms_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
