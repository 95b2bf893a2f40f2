//! Task data model: the primary unit of work plus its workflow gates and
//! optional lifecycle stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Title length bounds, characters after trim.
pub const TITLE_MIN: usize = 5;
pub const TITLE_MAX: usize = 100;
/// Description length bounds, characters after trim.
pub const DESCRIPTION_MIN: usize = 10;
pub const DESCRIPTION_MAX: usize = 1000;
/// Maximum hierarchy depth: epic -> task -> subtask.
pub const MAX_HIERARCHY_DEPTH: usize = 3;

/// Task status through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Blocked,
    Done,
    Cancelled,
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        }
    }

    /// Statuses that count as open work.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active | Self::Blocked)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "archived" => Ok(Self::Archived),
            _ => Err(format!(
                "Invalid status: '{s}'. Valid: pending, active, blocked, done, cancelled, archived"
            )),
        }
    }
}

/// Task priority. Numeric 1-9 inputs are accepted and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Normalize a numeric priority: 1-2 critical, 3-4 high, 5-6 medium,
    /// 7-9 low. Anything else is rejected.
    pub fn from_numeric(n: i64) -> Result<Self, String> {
        match n {
            1..=2 => Ok(Self::Critical),
            3..=4 => Ok(Self::High),
            5..=6 => Ok(Self::Medium),
            7..=9 => Ok(Self::Low),
            _ => Err(format!("Invalid numeric priority: {n}. Valid range: 1-9")),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<i64>() {
            return Self::from_numeric(n);
        }
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!(
                "Invalid priority: '{s}'. Valid: critical, high, medium, low, or 1-9"
            )),
        }
    }
}

/// Structural task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Epic,
    #[default]
    Task,
    Subtask,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Task => "task",
            Self::Subtask => "subtask",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epic" => Ok(Self::Epic),
            "task" => Ok(Self::Task),
            "subtask" => Ok(Self::Subtask),
            _ => Err(format!("Invalid type: '{s}'. Valid: epic, task, subtask")),
        }
    }
}

/// One append-only, timestamped note on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub ts: DateTime<Utc>,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Workflow gates
// ---------------------------------------------------------------------------

/// The six quality gates attached to every task, in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowGateName {
    Implemented,
    TestsPassed,
    QaPassed,
    CleanupDone,
    SecurityPassed,
    Documented,
}

impl WorkflowGateName {
    /// All gates in chain order.
    pub const ALL: [Self; 6] = [
        Self::Implemented,
        Self::TestsPassed,
        Self::QaPassed,
        Self::CleanupDone,
        Self::SecurityPassed,
        Self::Documented,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implemented => "implemented",
            Self::TestsPassed => "testsPassed",
            Self::QaPassed => "qaPassed",
            Self::CleanupDone => "cleanupDone",
            Self::SecurityPassed => "securityPassed",
            Self::Documented => "documented",
        }
    }

    /// Position in the chain, 0-based.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|g| g == self).unwrap_or(0)
    }

    /// The gate immediately before this one, if any.
    pub fn predecessor(&self) -> Option<Self> {
        let i = self.index();
        if i == 0 { None } else { Some(Self::ALL[i - 1]) }
    }

    /// The agent role allowed to pass this gate.
    pub fn assigned_agent(&self) -> &'static str {
        match self {
            Self::Implemented => "coder",
            Self::TestsPassed => "testing",
            Self::QaPassed => "qa",
            Self::CleanupDone => "cleanup",
            Self::SecurityPassed => "security",
            Self::Documented => "docs",
        }
    }
}

impl std::fmt::Display for WorkflowGateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkflowGateName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Invalid gate: '{s}'. Valid: implemented, testsPassed, qaPassed, \
                     cleanupDone, securityPassed, documented"
                )
            })
    }
}

/// Terminal outcome of a gate. A gate with no outcome yet serializes as null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    Passed,
    Failed,
    Blocked,
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Persisted state of one workflow gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSlot {
    #[serde(default)]
    pub status: Option<GateOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The per-task record of all six gates. Deserialization tolerates missing
/// keys (each defaults to an untouched slot).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    #[serde(default)]
    pub implemented: GateSlot,
    #[serde(default)]
    pub tests_passed: GateSlot,
    #[serde(default)]
    pub qa_passed: GateSlot,
    #[serde(default)]
    pub cleanup_done: GateSlot,
    #[serde(default)]
    pub security_passed: GateSlot,
    #[serde(default)]
    pub documented: GateSlot,
}

impl VerificationRecord {
    pub fn slot(&self, gate: WorkflowGateName) -> &GateSlot {
        match gate {
            WorkflowGateName::Implemented => &self.implemented,
            WorkflowGateName::TestsPassed => &self.tests_passed,
            WorkflowGateName::QaPassed => &self.qa_passed,
            WorkflowGateName::CleanupDone => &self.cleanup_done,
            WorkflowGateName::SecurityPassed => &self.security_passed,
            WorkflowGateName::Documented => &self.documented,
        }
    }

    pub fn slot_mut(&mut self, gate: WorkflowGateName) -> &mut GateSlot {
        match gate {
            WorkflowGateName::Implemented => &mut self.implemented,
            WorkflowGateName::TestsPassed => &mut self.tests_passed,
            WorkflowGateName::QaPassed => &mut self.qa_passed,
            WorkflowGateName::CleanupDone => &mut self.cleanup_done,
            WorkflowGateName::SecurityPassed => &mut self.security_passed,
            WorkflowGateName::Documented => &mut self.documented,
        }
    }

    /// Compact `{gate: status}` map used by list projections.
    pub fn status_map(&self) -> BTreeMap<String, Option<GateOutcome>> {
        WorkflowGateName::ALL
            .iter()
            .map(|g| (g.as_str().to_string(), self.slot(*g).status))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle stages (optional, per task)
// ---------------------------------------------------------------------------

/// Status of one named pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Recorded,
    Skipped,
}

/// Pass/fail state of one gate within a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageGate {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One stage of a task's optional delivery pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStage {
    pub name: String,
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default)]
    pub gates: BTreeMap<String, StageGate>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl LifecycleStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::default(),
            gates: BTreeMap::new(),
            evidence: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The primary unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// `T<n>`, monotonic within a project.
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    /// Non-blocking "see also" links, unlike `depends`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub verification: VerificationRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Vec<LifecycleStage>>,
}

impl Task {
    /// A new pending task with the given id, title and description.
    /// Validation happens in the verification gate, not here.
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: Priority::default(),
            task_type: TaskType::default(),
            size: None,
            labels: Vec::new(),
            phase: None,
            created: now,
            updated: now,
            completed_at: None,
            depends: Vec::new(),
            relates: Vec::new(),
            parent_id: None,
            files: Vec::new(),
            notes: Vec::new(),
            verification: VerificationRecord::default(),
            lifecycle: None,
        }
    }

    /// Append a timestamped note.
    pub fn add_note(&mut self, text: impl Into<String>) {
        self.notes.push(Note {
            ts: Utc::now(),
            text: text.into(),
        });
    }
}

/// Numeric part of a `T<n>` id, if the id is well-formed.
pub fn task_number(id: &str) -> Option<u64> {
    id.strip_prefix('T')?.parse().ok()
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Archival metadata attached to a task when it leaves the live set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub archived_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A task in the archive file: the task plus archival metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTask {
    #[serde(flatten)]
    pub task: Task,
    #[serde(rename = "_archive")]
    pub archive: ArchiveInfo,
}
