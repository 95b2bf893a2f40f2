//! The CLI surface. Every leaf subcommand translates into a
//! `(gateway, domain, operation, params)` tuple for the dispatch pipeline.

use clap::{Parser, Subcommand};
use cleo_core::envelope::Gateway;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "cleo", version)]
#[command(about = "Persistent task management for long-running multi-agent projects")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit the envelope as a single JSON line
    #[arg(long, global = true, conflicts_with = "human")]
    pub json: bool,

    /// Pretty-print the envelope for humans
    #[arg(long, global = true)]
    pub human: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Work with tasks
    Tasks {
        #[command(subcommand)]
        cmd: TasksCommands,
    },
    /// Manage the work session
    Session {
        #[command(subcommand)]
        cmd: SessionCommands,
    },
    /// Project memory: injections, links, manifest, patterns
    Memory {
        #[command(subcommand)]
        cmd: MemoryCommands,
    },
    /// Compliance and test-run records
    Check {
        #[command(subcommand)]
        cmd: CheckCommands,
    },
    /// Lifecycle stages and the release sequence
    Pipeline {
        #[command(subcommand)]
        cmd: PipelineCommands,
    },
    /// Skill selection and subagent spawning
    Orchestrate {
        #[command(subcommand)]
        cmd: OrchestrateCommands,
    },
    /// Skills, issue intake, provider context
    Tools {
        #[command(subcommand)]
        cmd: ToolsCommands,
    },
    /// Initialization, configuration, backups, maintenance
    Admin {
        #[command(subcommand)]
        cmd: AdminCommands,
    },
    /// Serve the MCP stdio interface
    Mcp,
}

/// A fully-specified dispatch call.
pub struct RequestParts {
    pub gateway: Gateway,
    pub domain: &'static str,
    pub operation: &'static str,
    pub params: Value,
}

fn parts(
    gateway: Gateway,
    domain: &'static str,
    operation: &'static str,
    params: Map<String, Value>,
) -> RequestParts {
    RequestParts {
        gateway,
        domain,
        operation,
        params: Value::Object(params),
    }
}

fn set(map: &mut Map<String, Value>, key: &str, value: impl Into<Value>) {
    map.insert(key.to_string(), value.into());
}

fn set_opt(map: &mut Map<String, Value>, key: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

fn set_flag(map: &mut Map<String, Value>, key: &str, value: bool) {
    if value {
        map.insert(key.to_string(), Value::Bool(true));
    }
}

#[derive(Subcommand)]
pub enum TasksCommands {
    /// Show one task (live or archived)
    Show { task_id: String },
    /// List tasks, optionally filtered
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        phase: Option<String>,
        /// Compact projection (id, title, status, priority)
        #[arg(long)]
        compact: bool,
    },
    /// Full-text search over titles and descriptions
    Find { query: String },
    /// Render the parent hierarchy
    Tree {
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Unmet dependencies blocking a task
    Blockers { task_id: String },
    /// Dependencies and dependents of a task
    Deps { task_id: String },
    /// Counts by status and priority
    Stats,
    /// Emit the full live snapshot
    Export,
    /// Audit history, optionally for one task
    History {
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Check the live set against its invariants
    Lint,
    /// Validate a batch of prospective tasks (JSON array)
    BatchValidate {
        /// JSON array of task params
        tasks: String,
    },
    /// The highest-priority unblocked pending task
    Next,
    /// Whether a task exists (live or archived)
    Exists { task_id: String },

    /// Create a task
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, value_delimiter = ',')]
        depends: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Update task fields
    Update {
        task_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, value_delimiter = ',')]
        depends: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        labels: Option<Vec<String>>,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Mark a task done
    Complete {
        task_id: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete a task (and optionally its subtree)
    Delete {
        task_id: String,
        #[arg(long)]
        cascade: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Move a task to the archive
    Archive {
        task_id: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Move an archived task back to the live set
    Restore {
        task_id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Change or clear a task's parent
    Reparent {
        task_id: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Promote subtask -> task -> epic
    Promote {
        task_id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Move a task to a position in the list
    Reorder {
        task_id: String,
        position: u64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-activate a done or cancelled task
    Reopen {
        task_id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Add a non-blocking related link
    Relate { task_id: String, related_id: String },
    /// Mark a task active
    Start { task_id: String },
    /// Return an active task to pending
    Stop { task_id: String },
    /// Pass a workflow gate
    GatePass {
        task_id: String,
        gate: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Fail a workflow gate (resets everything downstream)
    GateFail {
        task_id: String,
        gate: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

impl TasksCommands {
    pub fn into_parts(self) -> RequestParts {
        use TasksCommands::*;
        let mut p = Map::new();
        match self {
            Show { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Query, "tasks", "show", p)
            }
            List {
                status,
                label,
                phase,
                compact,
            } => {
                set_opt(&mut p, "status", status);
                set_opt(&mut p, "label", label);
                set_opt(&mut p, "phase", phase);
                set_flag(&mut p, "compact", compact);
                parts(Gateway::Query, "tasks", "list", p)
            }
            Find { query } => {
                set(&mut p, "query", query);
                parts(Gateway::Query, "tasks", "find", p)
            }
            Tree { task_id } => {
                set_opt(&mut p, "taskId", task_id);
                parts(Gateway::Query, "tasks", "tree", p)
            }
            Blockers { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Query, "tasks", "blockers", p)
            }
            Deps { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Query, "tasks", "deps", p)
            }
            Stats => parts(Gateway::Query, "tasks", "stats", p),
            Export => parts(Gateway::Query, "tasks", "export", p),
            History { task_id } => {
                set_opt(&mut p, "taskId", task_id);
                parts(Gateway::Query, "tasks", "history", p)
            }
            Lint => parts(Gateway::Query, "tasks", "lint", p),
            BatchValidate { tasks } => {
                let parsed: Value = serde_json::from_str(&tasks).unwrap_or(Value::Null);
                set(&mut p, "tasks", parsed);
                parts(Gateway::Query, "tasks", "batch-validate", p)
            }
            Next => parts(Gateway::Query, "tasks", "next", p),
            Exists { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Query, "tasks", "exists", p)
            }
            Add {
                title,
                description,
                priority,
                task_type,
                parent,
                depends,
                labels,
                phase,
                size,
                dry_run,
            } => {
                set(&mut p, "title", title);
                set(&mut p, "description", description);
                set_opt(&mut p, "priority", priority);
                set_opt(&mut p, "type", task_type);
                set_opt(&mut p, "parentId", parent);
                if !depends.is_empty() {
                    set(&mut p, "depends", depends);
                }
                if !labels.is_empty() {
                    set(&mut p, "labels", labels);
                }
                set_opt(&mut p, "phase", phase);
                set_opt(&mut p, "size", size);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "add", p)
            }
            Update {
                task_id,
                title,
                description,
                status,
                priority,
                task_type,
                parent,
                depends,
                labels,
                phase,
                size,
                notes,
                dry_run,
            } => {
                set(&mut p, "taskId", task_id);
                set_opt(&mut p, "title", title);
                set_opt(&mut p, "description", description);
                set_opt(&mut p, "status", status);
                set_opt(&mut p, "priority", priority);
                set_opt(&mut p, "type", task_type);
                set_opt(&mut p, "parentId", parent);
                set_opt(&mut p, "depends", depends);
                set_opt(&mut p, "labels", labels);
                set_opt(&mut p, "phase", phase);
                set_opt(&mut p, "size", size);
                set_opt(&mut p, "notes", notes);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "update", p)
            }
            Complete {
                task_id,
                notes,
                dry_run,
            } => {
                set(&mut p, "taskId", task_id);
                set_opt(&mut p, "notes", notes);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "complete", p)
            }
            Delete {
                task_id,
                cascade,
                dry_run,
            } => {
                set(&mut p, "taskId", task_id);
                set_flag(&mut p, "cascade", cascade);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "delete", p)
            }
            Archive {
                task_id,
                reason,
                dry_run,
            } => {
                set(&mut p, "taskId", task_id);
                set_opt(&mut p, "reason", reason);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "archive", p)
            }
            Restore { task_id, dry_run } => {
                set(&mut p, "taskId", task_id);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "restore", p)
            }
            Reparent {
                task_id,
                parent,
                dry_run,
            } => {
                set(&mut p, "taskId", task_id);
                set_opt(&mut p, "parentId", parent);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "reparent", p)
            }
            Promote { task_id, dry_run } => {
                set(&mut p, "taskId", task_id);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "promote", p)
            }
            Reorder {
                task_id,
                position,
                dry_run,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "position", position);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "reorder", p)
            }
            Reopen { task_id, dry_run } => {
                set(&mut p, "taskId", task_id);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "tasks", "reopen", p)
            }
            Relate {
                task_id,
                related_id,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "relatedId", related_id);
                parts(Gateway::Mutate, "tasks", "relates.add", p)
            }
            Start { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "tasks", "start", p)
            }
            Stop { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "tasks", "stop", p)
            }
            GatePass {
                task_id,
                gate,
                agent,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "gate", gate);
                set_opt(&mut p, "agent", agent);
                parts(Gateway::Mutate, "tasks", "workflow.pass", p)
            }
            GateFail {
                task_id,
                gate,
                reason,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "gate", gate);
                set_opt(&mut p, "reason", reason);
                parts(Gateway::Mutate, "tasks", "workflow.fail", p)
            }
        }
    }
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Show a session (the active one by default)
    Show { session_id: Option<String> },
    /// List all sessions
    List,
    /// Whether a session is active
    Status,
    /// Start a session bound to a scope, e.g. epic:T12
    Start {
        #[arg(long)]
        scope: String,
    },
    /// End the active session
    End {
        #[arg(long)]
        notes: Option<String>,
    },
    /// Resume a suspended session
    Resume { session_id: String },
    /// Suspend the active session
    Suspend,
    /// End sessions past the staleness threshold
    Gc {
        #[arg(long)]
        max_age_hours: Option<i64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Record a decision in the active session
    Decision { text: String },
    /// Record an assumption in the active session
    Assumption { text: String },
}

impl SessionCommands {
    pub fn into_parts(self) -> RequestParts {
        use SessionCommands::*;
        let mut p = Map::new();
        match self {
            Show { session_id } => {
                set_opt(&mut p, "sessionId", session_id);
                parts(Gateway::Query, "session", "show", p)
            }
            List => parts(Gateway::Query, "session", "list", p),
            Status => parts(Gateway::Query, "session", "status", p),
            Start { scope } => {
                set(&mut p, "scope", scope);
                parts(Gateway::Mutate, "session", "start", p)
            }
            End { notes } => {
                set_opt(&mut p, "notes", notes);
                parts(Gateway::Mutate, "session", "end", p)
            }
            Resume { session_id } => {
                set(&mut p, "sessionId", session_id);
                parts(Gateway::Mutate, "session", "resume", p)
            }
            Suspend => parts(Gateway::Mutate, "session", "suspend", p),
            Gc {
                max_age_hours,
                dry_run,
            } => {
                set_opt(&mut p, "maxAgeHours", max_age_hours);
                set_flag(&mut p, "dryRun", dry_run);
                parts(Gateway::Mutate, "session", "gc", p)
            }
            Decision { text } => {
                set(&mut p, "text", text);
                parts(Gateway::Mutate, "session", "record.decision", p)
            }
            Assumption { text } => {
                set(&mut p, "text", text);
                parts(Gateway::Mutate, "session", "record.assumption", p)
            }
        }
    }
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Store a context injection
    Inject {
        content: String,
        #[arg(long)]
        target: Option<String>,
    },
    /// Link a task to an external target
    Link {
        task_id: String,
        target: String,
    },
    /// Append a manifest entry (JSON object)
    ManifestAppend { manifest: String },
    /// Archive a manifest entry by id
    ManifestArchive { id: String },
    /// Store a named reusable pattern
    PatternStore { name: String, content: String },
    /// Store a learning, optionally tied to a task
    LearningStore {
        content: String,
        #[arg(long)]
        task_id: Option<String>,
    },
}

impl MemoryCommands {
    pub fn into_parts(self) -> RequestParts {
        use MemoryCommands::*;
        let mut p = Map::new();
        match self {
            Inject { content, target } => {
                set(&mut p, "content", content);
                set_opt(&mut p, "target", target);
                parts(Gateway::Mutate, "memory", "inject", p)
            }
            Link { task_id, target } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "target", target);
                parts(Gateway::Mutate, "memory", "link", p)
            }
            ManifestAppend { manifest } => {
                let parsed: Value = serde_json::from_str(&manifest).unwrap_or(Value::Null);
                set(&mut p, "manifest", parsed);
                parts(Gateway::Mutate, "memory", "manifest.append", p)
            }
            ManifestArchive { id } => {
                set(&mut p, "id", id);
                parts(Gateway::Mutate, "memory", "manifest.archive", p)
            }
            PatternStore { name, content } => {
                set(&mut p, "name", name);
                set(&mut p, "content", content);
                parts(Gateway::Mutate, "memory", "pattern.store", p)
            }
            LearningStore { content, task_id } => {
                set(&mut p, "content", content);
                set_opt(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "memory", "learning.store", p)
            }
        }
    }
}

#[derive(Subcommand)]
pub enum CheckCommands {
    /// Record a compliance result (pass, fail, waived)
    Compliance {
        rule: String,
        status: String,
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Register a test run
    TestRun {
        #[arg(long)]
        suite: Option<String>,
        #[arg(long)]
        task_id: Option<String>,
    },
}

impl CheckCommands {
    pub fn into_parts(self) -> RequestParts {
        use CheckCommands::*;
        let mut p = Map::new();
        match self {
            Compliance {
                rule,
                status,
                task_id,
            } => {
                set(&mut p, "rule", rule);
                set(&mut p, "status", status);
                set_opt(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "check", "compliance.record", p)
            }
            TestRun { suite, task_id } => {
                set_opt(&mut p, "suite", suite);
                set_opt(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "check", "test.run", p)
            }
        }
    }
}

#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Record a lifecycle stage as done
    StageRecord {
        task_id: String,
        stage: String,
        #[arg(long)]
        evidence: Option<String>,
    },
    /// Skip a lifecycle stage
    StageSkip {
        task_id: String,
        stage: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reset a lifecycle stage to pending
    StageReset { task_id: String, stage: String },
    /// Pass a gate within a stage
    StageGatePass {
        task_id: String,
        stage: String,
        gate: String,
    },
    /// Fail a gate within a stage
    StageGateFail {
        task_id: String,
        stage: String,
        gate: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Begin a release for a version
    ReleasePrepare { version: String },
    /// Build the changelog from completed tasks
    ReleaseChangelog,
    /// Record the release commit step
    ReleaseCommit,
    /// Tag the release (idempotent)
    ReleaseTag,
    /// Record the release push step
    ReleasePush,
    /// Run the release gates over completed tasks
    ReleaseGates,
    /// Abandon the release in progress
    ReleaseRollback,
}

impl PipelineCommands {
    pub fn into_parts(self) -> RequestParts {
        use PipelineCommands::*;
        let mut p = Map::new();
        match self {
            StageRecord {
                task_id,
                stage,
                evidence,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "stage", stage);
                set_opt(&mut p, "evidence", evidence);
                parts(Gateway::Mutate, "pipeline", "stage.record", p)
            }
            StageSkip {
                task_id,
                stage,
                reason,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "stage", stage);
                set_opt(&mut p, "reason", reason);
                parts(Gateway::Mutate, "pipeline", "stage.skip", p)
            }
            StageReset { task_id, stage } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "stage", stage);
                parts(Gateway::Mutate, "pipeline", "stage.reset", p)
            }
            StageGatePass {
                task_id,
                stage,
                gate,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "stage", stage);
                set(&mut p, "gate", gate);
                parts(Gateway::Mutate, "pipeline", "stage.gate.pass", p)
            }
            StageGateFail {
                task_id,
                stage,
                gate,
                reason,
            } => {
                set(&mut p, "taskId", task_id);
                set(&mut p, "stage", stage);
                set(&mut p, "gate", gate);
                set_opt(&mut p, "reason", reason);
                parts(Gateway::Mutate, "pipeline", "stage.gate.fail", p)
            }
            ReleasePrepare { version } => {
                set(&mut p, "version", version);
                parts(Gateway::Mutate, "pipeline", "release.prepare", p)
            }
            ReleaseChangelog => parts(Gateway::Mutate, "pipeline", "release.changelog", p),
            ReleaseCommit => parts(Gateway::Mutate, "pipeline", "release.commit", p),
            ReleaseTag => parts(Gateway::Mutate, "pipeline", "release.tag", p),
            ReleasePush => parts(Gateway::Mutate, "pipeline", "release.push", p),
            ReleaseGates => parts(Gateway::Mutate, "pipeline", "release.gates.run", p),
            ReleaseRollback => parts(Gateway::Mutate, "pipeline", "release.rollback", p),
        }
    }
}

#[derive(Subcommand)]
pub enum OrchestrateCommands {
    /// Plan orchestration for a task
    Start { task_id: String },
    /// Assemble the spawn prompt for a task
    Spawn { task_id: String },
    /// Check a task is ready to orchestrate
    Validate { task_id: String },
    /// Activate a disjoint group of tasks
    ParallelStart {
        #[arg(value_delimiter = ',')]
        task_ids: Vec<String>,
    },
    /// Wind a parallel group down
    ParallelEnd {
        #[arg(value_delimiter = ',')]
        task_ids: Vec<String>,
    },
}

impl OrchestrateCommands {
    pub fn into_parts(self) -> RequestParts {
        use OrchestrateCommands::*;
        let mut p = Map::new();
        match self {
            Start { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "orchestrate", "start", p)
            }
            Spawn { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "orchestrate", "spawn", p)
            }
            Validate { task_id } => {
                set(&mut p, "taskId", task_id);
                parts(Gateway::Mutate, "orchestrate", "validate", p)
            }
            ParallelStart { task_ids } => {
                set(&mut p, "taskIds", task_ids);
                parts(Gateway::Mutate, "orchestrate", "parallel.start", p)
            }
            ParallelEnd { task_ids } => {
                set(&mut p, "taskIds", task_ids);
                parts(Gateway::Mutate, "orchestrate", "parallel.end", p)
            }
        }
    }
}

#[derive(Subcommand)]
pub enum ToolsCommands {
    /// Install a built-in skill
    SkillInstall { name: String },
    /// Uninstall a skill
    SkillUninstall { name: String },
    /// Enable an installed skill
    SkillEnable { name: String },
    /// Disable an installed skill
    SkillDisable { name: String },
    /// Configure an installed skill (JSON object)
    SkillConfigure { name: String, config: String },
    /// Drop installed skills the registry no longer knows
    SkillRefresh,
    /// File a bug as a task
    IssueBug {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
    },
    /// File a feature request as a task
    IssueFeature {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
    },
    /// File a help request as a task
    IssueHelp {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
    },
    /// Store provider-specific context
    ProviderInject {
        provider: String,
        #[arg(long)]
        content: Option<String>,
    },
}

impl ToolsCommands {
    pub fn into_parts(self) -> RequestParts {
        use ToolsCommands::*;
        let mut p = Map::new();
        match self {
            SkillInstall { name } => {
                set(&mut p, "name", name);
                parts(Gateway::Mutate, "tools", "skill.install", p)
            }
            SkillUninstall { name } => {
                set(&mut p, "name", name);
                parts(Gateway::Mutate, "tools", "skill.uninstall", p)
            }
            SkillEnable { name } => {
                set(&mut p, "name", name);
                parts(Gateway::Mutate, "tools", "skill.enable", p)
            }
            SkillDisable { name } => {
                set(&mut p, "name", name);
                parts(Gateway::Mutate, "tools", "skill.disable", p)
            }
            SkillConfigure { name, config } => {
                set(&mut p, "name", name);
                let parsed: Value = serde_json::from_str(&config).unwrap_or(Value::Null);
                set(&mut p, "config", parsed);
                parts(Gateway::Mutate, "tools", "skill.configure", p)
            }
            SkillRefresh => parts(Gateway::Mutate, "tools", "skill.refresh", p),
            IssueBug { title, description } => {
                set(&mut p, "title", title);
                set(&mut p, "description", description);
                parts(Gateway::Mutate, "tools", "issue.add.bug", p)
            }
            IssueFeature { title, description } => {
                set(&mut p, "title", title);
                set(&mut p, "description", description);
                parts(Gateway::Mutate, "tools", "issue.add.feature", p)
            }
            IssueHelp { title, description } => {
                set(&mut p, "title", title);
                set(&mut p, "description", description);
                parts(Gateway::Mutate, "tools", "issue.add.help", p)
            }
            ProviderInject { provider, content } => {
                set(&mut p, "provider", provider);
                set_opt(&mut p, "content", content);
                parts(Gateway::Mutate, "tools", "provider.inject", p)
            }
        }
    }
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the project data directory
    Init {
        #[arg(long)]
        name: Option<String>,
    },
    /// Set a recognized configuration key
    ConfigSet { key: String, value: String },
    /// Take an on-demand backup
    Backup {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Restore data files from a named backup
    Restore { backup: String },
    /// Migrate the storage engine (json or sqlite)
    Migrate { to: String },
    /// Recompute derived task statuses
    Sync,
    /// Prune old backups and finished jobs
    Cleanup,
    /// Cancel a background job
    JobCancel { job_id: String },
    /// Suspend the active session for a clean handoff
    Safestop,
    /// Generate the agent-context digest
    InjectGenerate,
}

impl AdminCommands {
    pub fn into_parts(self) -> RequestParts {
        use AdminCommands::*;
        let mut p = Map::new();
        match self {
            Init { name } => {
                set_opt(&mut p, "name", name);
                parts(Gateway::Mutate, "admin", "init", p)
            }
            ConfigSet { key, value } => {
                set(&mut p, "key", key);
                set(&mut p, "value", value);
                parts(Gateway::Mutate, "admin", "config.set", p)
            }
            Backup { reason } => {
                set_opt(&mut p, "reason", reason);
                parts(Gateway::Mutate, "admin", "backup", p)
            }
            Restore { backup } => {
                set(&mut p, "backup", backup);
                parts(Gateway::Mutate, "admin", "restore", p)
            }
            Migrate { to } => {
                set(&mut p, "to", to);
                parts(Gateway::Mutate, "admin", "migrate", p)
            }
            Sync => parts(Gateway::Mutate, "admin", "sync", p),
            Cleanup => parts(Gateway::Mutate, "admin", "cleanup", p),
            JobCancel { job_id } => {
                set(&mut p, "jobId", job_id);
                parts(Gateway::Mutate, "admin", "job.cancel", p)
            }
            Safestop => parts(Gateway::Mutate, "admin", "safestop", p),
            InjectGenerate => parts(Gateway::Mutate, "admin", "inject.generate", p),
        }
    }
}
