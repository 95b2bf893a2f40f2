//! Spawn-prompt assembly: turn a selected skill plus task/session context
//! into the prompt handed to a subagent.

use cleo_core::session::Session;
use cleo_core::task::Task;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::dispatcher::SkillDef;

/// Header prepended to every spawn prompt, shared by all skills.
const SUBAGENT_HEADER: &str = "\
# Subagent protocol

You operate on exactly one task. Report results through the task's notes
and gates; never touch tasks outside your assignment. When blocked, record
the blocker and stop instead of improvising.

---

";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Z0-9_]+)\}\}").expect("valid pattern"))
}

/// Diagnostic of template substitution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResolution {
    pub fully_resolved: bool,
    pub unresolved_count: usize,
    pub unresolved_tokens: Vec<String>,
}

/// Everything a caller gets back. `prompt` is the one field that matters;
/// the rest is diagnostic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnPlan {
    pub skill: String,
    pub path: String,
    pub task_id: String,
    pub token_budget: u32,
    pub model: String,
    pub tier: String,
    pub references: Vec<String>,
    pub spawn_context: Value,
    pub token_resolution: TokenResolution,
    pub prompt: String,
}

/// Build the spawn prompt: merge context, substitute every `{{TOKEN}}`,
/// prepend the shared header, and report any placeholder left unresolved
/// (a warning, not a failure).
pub fn prepare_spawn(skill: &SkillDef, task: &Task, session: Option<&Session>) -> SpawnPlan {
    let context = merged_context(skill, task, session);

    let mut prompt = String::from(SUBAGENT_HEADER);
    prompt.push_str(&substitute(skill.template, &context));

    let unresolved: Vec<String> = placeholder_re()
        .captures_iter(&prompt)
        .map(|c| c[1].to_string())
        .collect();
    if !unresolved.is_empty() {
        tracing::warn!(
            skill = skill.name,
            tokens = ?unresolved,
            "spawn prompt has unresolved placeholders"
        );
    }

    SpawnPlan {
        skill: skill.name.to_string(),
        path: format!("embedded:{}", skill.name),
        task_id: task.id.clone(),
        token_budget: skill.token_budget,
        model: skill.model.to_string(),
        tier: skill.tier.to_string(),
        references: skill.references.iter().map(|r| r.to_string()).collect(),
        spawn_context: serde_json::to_value(&context).unwrap_or(Value::Null),
        token_resolution: TokenResolution {
            fully_resolved: unresolved.is_empty(),
            unresolved_count: unresolved.len(),
            unresolved_tokens: unresolved,
        },
        prompt,
    }
}

/// Token values from task fields, session fields, and skill defaults.
fn merged_context(
    skill: &SkillDef,
    task: &Task,
    session: Option<&Session>,
) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    context.insert("TASK_ID".into(), task.id.clone());
    context.insert("TASK_TITLE".into(), task.title.clone());
    context.insert("TASK_DESCRIPTION".into(), task.description.clone());
    context.insert("TASK_STATUS".into(), task.status.to_string());
    context.insert("TASK_PRIORITY".into(), task.priority.to_string());
    context.insert("TASK_TYPE".into(), task.task_type.to_string());

    match session {
        Some(session) => {
            context.insert("SESSION_ID".into(), session.id.clone());
            context.insert("SESSION_SCOPE".into(), session.scope.clone());
        }
        None => {
            context.insert("SESSION_ID".into(), "none".into());
            context.insert("SESSION_SCOPE".into(), "unscoped".into());
        }
    }

    context.insert("SKILL_NAME".into(), skill.name.to_string());
    context.insert("TOKEN_BUDGET".into(), skill.token_budget.to_string());
    context.insert("MODEL".into(), skill.model.to_string());
    context.insert("TIER".into(), skill.tier.to_string());
    context
}

fn substitute(template: &str, context: &BTreeMap<String, String>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            context
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
