//! MVI tier projection: which domains an MCP client may reach, and the
//! compact default for large listings.

use cleo_core::envelope::Source;
use serde_json::Value;

/// Projection level. Read from `params._mviTier`, stripped before the
/// request continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MviTier {
    Minimal,
    #[default]
    Standard,
    Orchestrator,
}

impl MviTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Orchestrator => "orchestrator",
        }
    }

    /// Domains visible at this tier.
    pub fn allowed_domains(&self) -> &'static [&'static str] {
        match self {
            Self::Minimal => &["tasks", "session", "admin"],
            Self::Standard => &[
                "tasks",
                "session",
                "admin",
                "memory",
                "tools",
                "check",
                "pipeline",
                "orchestrate",
            ],
            Self::Orchestrator => &[
                "tasks",
                "session",
                "admin",
                "memory",
                "tools",
                "check",
                "pipeline",
                "orchestrate",
                "nexus",
            ],
        }
    }

    pub fn allows(&self, domain: &str) -> bool {
        self.allowed_domains().contains(&domain)
    }
}

impl std::str::FromStr for MviTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Self::Minimal),
            "standard" => Ok(Self::Standard),
            "orchestrator" => Ok(Self::Orchestrator),
            _ => Err(format!(
                "Invalid tier: '{s}'. Valid: minimal, standard, orchestrator"
            )),
        }
    }
}

/// Pull `_mviTier` out of the params (removing the key), defaulting to
/// standard. An unparseable tier is reported as an error string.
pub fn take_tier(params: &mut Value) -> Result<MviTier, String> {
    let Some(map) = params.as_object_mut() else {
        return Ok(MviTier::default());
    };
    match map.remove("_mviTier") {
        None => Ok(MviTier::default()),
        Some(Value::String(s)) => s.parse(),
        Some(other) => Err(format!("Invalid tier: {other}")),
    }
}

/// MCP task listings default to the compact projection unless the caller
/// explicitly chose one.
pub fn apply_compact_default(source: Source, domain: &str, operation: &str, params: &mut Value) {
    if source == Source::Mcp && domain == "tasks" && operation == "list" {
        if let Some(map) = params.as_object_mut() {
            map.entry("compact").or_insert(Value::Bool(true));
        }
    }
}
