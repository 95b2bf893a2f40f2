//! Stateless skill selection for a task.
//!
//! Selection priority, first match wins:
//! 1. explicit label mapped to a skill category,
//! 2. title/description keyword match against the category taxonomy,
//! 3. keyword triggers declared by each skill,
//! 4. task-type fallback,
//! 5. the default executor.

use cleo_core::task::{Task, TaskType};
use serde::Serialize;

/// Categories a skill can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkillCategory {
    Research,
    Execution,
    Planning,
    Documentation,
    Testing,
    Validation,
    Specification,
    BashLibrary,
    Workflow,
    Orchestration,
}

/// A named protocol: template text plus metadata, injected as context into
/// a single agent. Not a separate executable.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SkillDef {
    pub name: &'static str,
    pub category: SkillCategory,
    /// Keyword triggers, matched against title + description.
    pub triggers: &'static [&'static str],
    pub token_budget: u32,
    pub model: &'static str,
    pub tier: &'static str,
    #[serde(skip)]
    pub template: &'static str,
    pub references: &'static [&'static str],
}

/// The default skill when nothing else matches.
pub const DEFAULT_SKILL: &str = "ct-task-executor";

/// Built-in skill registry, one per category. The executor doubles as the
/// fallback.
pub const SKILLS: &[SkillDef] = &[
    SkillDef {
        name: "ct-researcher",
        category: SkillCategory::Research,
        triggers: &["investigate", "research", "explore", "compare", "evaluate"],
        token_budget: 120_000,
        model: "deep",
        tier: "tier2",
        template: include_str!("templates/researcher.md"),
        references: &["manifest format", "key findings contract"],
    },
    SkillDef {
        name: "ct-task-executor",
        category: SkillCategory::Execution,
        triggers: &["implement", "build", "fix", "refactor"],
        token_budget: 80_000,
        model: "standard",
        tier: "tier1",
        template: include_str!("templates/executor.md"),
        references: &["workflow gates"],
    },
    SkillDef {
        name: "ct-planner",
        category: SkillCategory::Planning,
        triggers: &["plan", "roadmap", "breakdown", "estimate"],
        token_budget: 60_000,
        model: "standard",
        tier: "tier1",
        template: include_str!("templates/planner.md"),
        references: &["task hierarchy"],
    },
    SkillDef {
        name: "ct-doc-writer",
        category: SkillCategory::Documentation,
        triggers: &["document", "readme", "changelog", "guide"],
        token_budget: 60_000,
        model: "standard",
        tier: "tier1",
        template: include_str!("templates/doc_writer.md"),
        references: &["documentation gate"],
    },
    SkillDef {
        name: "ct-test-writer",
        category: SkillCategory::Testing,
        triggers: &["test", "coverage", "regression"],
        token_budget: 80_000,
        model: "standard",
        tier: "tier1",
        template: include_str!("templates/test_writer.md"),
        references: &["testsPassed gate"],
    },
    SkillDef {
        name: "ct-validator",
        category: SkillCategory::Validation,
        triggers: &["validate", "verify", "audit", "review"],
        token_budget: 80_000,
        model: "standard",
        tier: "tier1",
        template: include_str!("templates/validator.md"),
        references: &["qaPassed gate", "securityPassed gate"],
    },
    SkillDef {
        name: "ct-spec-writer",
        category: SkillCategory::Specification,
        triggers: &["spec", "specification", "rfc", "design doc"],
        token_budget: 60_000,
        model: "deep",
        tier: "tier2",
        template: include_str!("templates/spec_writer.md"),
        references: &[],
    },
    SkillDef {
        name: "ct-bash-librarian",
        category: SkillCategory::BashLibrary,
        triggers: &["script", "bash", "shell", "cron"],
        token_budget: 40_000,
        model: "fast",
        tier: "tier0",
        template: include_str!("templates/bash_librarian.md"),
        references: &[],
    },
    SkillDef {
        name: "ct-workflow-runner",
        category: SkillCategory::Workflow,
        triggers: &["pipeline", "workflow", "release", "stage"],
        token_budget: 60_000,
        model: "standard",
        tier: "tier1",
        template: include_str!("templates/workflow_runner.md"),
        references: &["lifecycle stages"],
    },
    SkillDef {
        name: "ct-orchestrator",
        category: SkillCategory::Orchestration,
        triggers: &["orchestrate", "coordinate", "delegate", "parallel"],
        token_budget: 150_000,
        model: "deep",
        tier: "tier2",
        template: include_str!("templates/orchestrator.md"),
        references: &["session scope", "spawn contract"],
    },
];

/// Labels that map straight to a category.
const LABEL_CATEGORIES: &[(&str, SkillCategory)] = &[
    ("research", SkillCategory::Research),
    ("execution", SkillCategory::Execution),
    ("planning", SkillCategory::Planning),
    ("docs", SkillCategory::Documentation),
    ("documentation", SkillCategory::Documentation),
    ("test", SkillCategory::Testing),
    ("testing", SkillCategory::Testing),
    ("validation", SkillCategory::Validation),
    ("spec", SkillCategory::Specification),
    ("specification", SkillCategory::Specification),
    ("bash", SkillCategory::BashLibrary),
    ("workflow", SkillCategory::Workflow),
    ("orchestration", SkillCategory::Orchestration),
];

/// Category taxonomy keywords, checked against title + description.
const CATEGORY_KEYWORDS: &[(SkillCategory, &[&str])] = &[
    (SkillCategory::Research, &["research", "investigate", "explore", "survey"]),
    (SkillCategory::Planning, &["plan", "roadmap", "milestone"]),
    (SkillCategory::Documentation, &["document", "documentation", "readme"]),
    (SkillCategory::Testing, &["test", "tests", "coverage"]),
    (SkillCategory::Validation, &["validate", "verify", "audit"]),
    (SkillCategory::Specification, &["spec", "specification"]),
    (SkillCategory::BashLibrary, &["script", "bash", "shell"]),
    (SkillCategory::Workflow, &["pipeline", "workflow", "release"]),
    (SkillCategory::Orchestration, &["orchestrate", "coordinate", "spawn"]),
];

pub fn skill_by_name(name: &str) -> Option<&'static SkillDef> {
    SKILLS.iter().find(|s| s.name == name)
}

fn skill_for_category(category: SkillCategory) -> Option<&'static SkillDef> {
    SKILLS.iter().find(|s| s.category == category)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w.eq_ignore_ascii_case(word))
}

/// Select a skill for a task. Stateless, no side effects.
pub fn dispatch_skill(task: &Task) -> &'static SkillDef {
    // 1. Explicit label.
    for label in &task.labels {
        let label = label.to_ascii_lowercase();
        if let Some((_, category)) = LABEL_CATEGORIES.iter().find(|(l, _)| *l == label) {
            if let Some(skill) = skill_for_category(*category) {
                return skill;
            }
        }
    }

    let text = format!("{} {}", task.title, task.description);

    // 2. Category taxonomy over title/description.
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| contains_word(&text, k)) {
            if let Some(skill) = skill_for_category(*category) {
                return skill;
            }
        }
    }

    // 3. Per-skill triggers.
    for skill in SKILLS {
        if skill.triggers.iter().any(|t| contains_word(&text, t)) {
            return skill;
        }
    }

    // 4. Task-type fallback.
    let fallback = match task.task_type {
        TaskType::Epic => SkillCategory::Orchestration,
        TaskType::Task | TaskType::Subtask => SkillCategory::Execution,
    };
    if let Some(skill) = skill_for_category(fallback) {
        return skill;
    }

    // 5. Default executor. The registry always carries it.
    skill_by_name(DEFAULT_SKILL).expect("default skill registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str, description: &str) -> Task {
        Task::new("T1", title, description)
    }

    #[test]
    fn test_registry_covers_every_category() {
        for category in [
            SkillCategory::Research,
            SkillCategory::Execution,
            SkillCategory::Planning,
            SkillCategory::Documentation,
            SkillCategory::Testing,
            SkillCategory::Validation,
            SkillCategory::Specification,
            SkillCategory::BashLibrary,
            SkillCategory::Workflow,
            SkillCategory::Orchestration,
        ] {
            assert!(
                skill_for_category(category).is_some(),
                "no skill for {category:?}"
            );
        }
    }

    #[test]
    fn test_label_takes_priority_over_keywords() {
        let mut t = task("Write tests for parser", "Cover the parser module with tests");
        t.labels.push("research".into());
        // Keywords say testing, the label says research; the label wins.
        assert_eq!(dispatch_skill(&t).name, "ct-researcher");
    }

    #[test]
    fn test_keyword_match_on_title() {
        let t = task(
            "Investigate flaky CI runs",
            "Track down why the suite fails intermittently",
        );
        assert_eq!(dispatch_skill(&t).category, SkillCategory::Research);
    }

    #[test]
    fn test_keyword_match_is_word_bounded() {
        // "contest" contains "test" as a substring but not as a word.
        let t = task(
            "Prepare the contest entry",
            "Assemble materials for the annual entry submission",
        );
        assert_eq!(dispatch_skill(&t).name, DEFAULT_SKILL);
    }

    #[test]
    fn test_trigger_match_after_taxonomy() {
        // "estimate" is a planner trigger but not a taxonomy keyword.
        let t = task(
            "Estimate the migration effort",
            "Come up with rough numbers for the storage move",
        );
        assert_eq!(dispatch_skill(&t).name, "ct-planner");
    }

    #[test]
    fn test_epic_falls_back_to_orchestrator() {
        let mut t = task("Q3 storage initiative", "Umbrella for the storage work this quarter");
        t.task_type = TaskType::Epic;
        assert_eq!(dispatch_skill(&t).name, "ct-orchestrator");
    }

    #[test]
    fn test_plain_task_falls_back_to_executor() {
        let t = task("Wire up the config loader", "Load settings at startup and cache them");
        assert_eq!(dispatch_skill(&t).name, DEFAULT_SKILL);
    }

    #[test]
    fn test_dispatch_is_stateless() {
        let t = task(
            "Investigate flaky CI runs",
            "Track down why the suite fails intermittently",
        );
        let first = dispatch_skill(&t).name;
        let second = dispatch_skill(&t).name;
        assert_eq!(first, second);
    }

    #[test]
    fn test_skill_by_name() {
        assert!(skill_by_name("ct-validator").is_some());
        assert!(skill_by_name("ct-nope").is_none());
    }

    #[test]
    fn test_templates_are_nonempty() {
        for skill in SKILLS {
            assert!(
                !skill.template.trim().is_empty(),
                "{} template is empty",
                skill.name
            );
        }
    }
}
