//! Bounded in-process background job registry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Most jobs that may be `running` at once; submissions past the bound are
/// rejected rather than queued.
pub const DEFAULT_MAX_RUNNING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct JobManager {
    jobs: Mutex<HashMap<String, Job>>,
    max_running: usize,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            max_running: DEFAULT_MAX_RUNNING,
        }
    }

    pub fn with_max_running(max_running: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            max_running,
        }
    }

    /// Register a new running job. Returns its id, or `None` when the
    /// running bound is hit (the submission is rejected, not queued).
    pub fn submit(&self) -> Option<String> {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        let running = jobs.values().filter(|j| j.status == JobStatus::Running).count();
        if running >= self.max_running {
            return None;
        }
        let id = ulid::Ulid::new().to_string();
        jobs.insert(
            id.clone(),
            Job {
                job_id: id.clone(),
                status: JobStatus::Running,
                progress: 0,
                started_at: Utc::now(),
                completed_at: None,
                result: None,
                error: None,
            },
        );
        Some(id)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().expect("job map poisoned").get(id).cloned()
    }

    pub fn set_progress(&self, id: &str, progress: u8) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        if let Some(job) = jobs.get_mut(id) {
            if job.status == JobStatus::Running {
                job.progress = progress.min(100);
            }
        }
    }

    /// Resolve a job. A job cancelled in the meantime keeps its cancelled
    /// state and discards the late result.
    pub fn complete(&self, id: &str, result: Value) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        if let Some(job) = jobs.get_mut(id) {
            if job.status != JobStatus::Running {
                return;
            }
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);
        }
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        if let Some(job) = jobs.get_mut(id) {
            if job.status != JobStatus::Running {
                return;
            }
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error = Some(error.into());
        }
    }

    /// Cancel a running job. Returns false for unknown or already-terminal
    /// jobs, and never mutates their result.
    pub fn cancel(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        match jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Drop terminal jobs older than the retention window. Returns how
    /// many were removed.
    pub fn cleanup(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        before - jobs.len()
    }

    pub fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_and_complete() {
        let manager = JobManager::new();
        let id = manager.submit().unwrap();

        let job = manager.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 0);

        manager.set_progress(&id, 40);
        assert_eq!(manager.get(&id).unwrap().progress, 40);

        manager.complete(&id, json!({"ok": true}));
        let job = manager.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_bound_rejects_submissions() {
        let manager = JobManager::with_max_running(2);
        let a = manager.submit().unwrap();
        let _b = manager.submit().unwrap();
        assert!(manager.submit().is_none(), "third job must be rejected");

        // Finishing one frees a slot.
        manager.complete(&a, json!(null));
        assert!(manager.submit().is_some());
    }

    #[test]
    fn test_cancel_running() {
        let manager = JobManager::new();
        let id = manager.submit().unwrap();
        assert!(manager.cancel(&id));
        assert_eq!(manager.get(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_after_resolution_returns_false() {
        let manager = JobManager::new();
        let id = manager.submit().unwrap();
        manager.complete(&id, json!({"answer": 42}));

        assert!(!manager.cancel(&id));
        // And the result survives untouched.
        let job = manager.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap()["answer"], 42);
    }

    #[test]
    fn test_late_result_after_cancel_is_discarded() {
        let manager = JobManager::new();
        let id = manager.submit().unwrap();
        assert!(manager.cancel(&id));

        manager.complete(&id, json!({"late": true}));
        let job = manager.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_cancel_unknown_is_false() {
        let manager = JobManager::new();
        assert!(!manager.cancel("nope"));
    }

    #[test]
    fn test_cleanup_drops_only_old_terminal_jobs() {
        let manager = JobManager::new();
        let done = manager.submit().unwrap();
        manager.complete(&done, json!(null));
        let running = manager.submit().unwrap();

        // Nothing is old enough yet.
        assert_eq!(manager.cleanup(chrono::Duration::hours(1)), 0);

        // Everything terminal is "old" with a zero retention.
        assert_eq!(manager.cleanup(chrono::Duration::zero() - chrono::Duration::seconds(1)), 1);
        assert!(manager.get(&done).is_none());
        assert!(manager.get(&running).is_some());
    }

    #[test]
    fn test_list_is_ordered_by_start() {
        let manager = JobManager::new();
        let first = manager.submit().unwrap();
        let second = manager.submit().unwrap();
        let all = manager.list();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].job_id, first);
        assert_eq!(all[1].job_id, second);
    }
}
