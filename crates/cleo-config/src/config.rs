//! Effective configuration: a flat mapping of recognized keys backed by
//! `.cleo/config.toml`. Unknown keys are rejected, never silently kept.

use anyhow::{Context, Result};
use cleo_core::{CleoError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    #[default]
    Json,
    Sqlite,
}

impl std::fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// How strictly session requirements are applied to task mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEnforcement {
    #[default]
    None,
    Warn,
    Strict,
}

/// Log verbosity, mapped onto the tracing filter at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Default output format when neither flag nor TTY detection decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub engine: StorageEngine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchySection {
    /// 0 means unlimited.
    #[serde(default)]
    pub max_siblings: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

fn default_max_depth() -> u32 {
    3
}

impl Default for HierarchySection {
    fn default() -> Self {
        Self {
            max_siblings: 0,
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub enforcement: SessionEnforcement,
    #[serde(default)]
    pub require_session: bool,
    #[serde(default)]
    pub require_session_note: bool,
    #[serde(default)]
    pub require_notes_on_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancellationSection {
    #[serde(default)]
    pub require_reason: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSection {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatSection {
    #[serde(default)]
    pub default: DefaultFormat,
}

/// The full effective configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub hierarchy: HierarchySection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub cancellation: CancellationSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub format: FormatSection,
}

/// Every key accepted by `config.set`, in documentation order.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "storage.engine",
    "hierarchy.maxSiblings",
    "hierarchy.maxDepth",
    "session.enforcement",
    "session.requireSession",
    "session.requireSessionNote",
    "session.requireNotesOnComplete",
    "cancellation.requireReason",
    "archive.retentionDays",
    "logging.level",
    "format.default",
];

impl Config {
    /// Load from the config file, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    /// Set a recognized key from its string value. Unknown keys and
    /// malformed values are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), CleoError> {
        match key {
            "storage.engine" => {
                self.storage.engine = match value {
                    "json" => StorageEngine::Json,
                    "sqlite" => StorageEngine::Sqlite,
                    _ => return Err(bad_value(key, value, "json | sqlite")),
                }
            }
            "hierarchy.maxSiblings" => {
                self.hierarchy.max_siblings = parse_uint(key, value)?;
            }
            "hierarchy.maxDepth" => {
                let depth = parse_uint(key, value)?;
                if depth == 0 {
                    return Err(bad_value(key, value, "an integer >= 1"));
                }
                self.hierarchy.max_depth = depth;
            }
            "session.enforcement" => {
                self.session.enforcement = match value {
                    "none" => SessionEnforcement::None,
                    "warn" => SessionEnforcement::Warn,
                    "strict" => SessionEnforcement::Strict,
                    _ => return Err(bad_value(key, value, "none | warn | strict")),
                }
            }
            "session.requireSession" => self.session.require_session = parse_bool(key, value)?,
            "session.requireSessionNote" => {
                self.session.require_session_note = parse_bool(key, value)?;
            }
            "session.requireNotesOnComplete" => {
                self.session.require_notes_on_complete = parse_bool(key, value)?;
            }
            "cancellation.requireReason" => {
                self.cancellation.require_reason = parse_bool(key, value)?;
            }
            "archive.retentionDays" => self.archive.retention_days = parse_uint(key, value)?,
            "logging.level" => {
                self.logging.level = match value {
                    "error" => LogLevel::Error,
                    "warn" => LogLevel::Warn,
                    "info" => LogLevel::Info,
                    "debug" => LogLevel::Debug,
                    _ => return Err(bad_value(key, value, "error | warn | info | debug")),
                }
            }
            "format.default" => {
                self.format.default = match value {
                    "human" => DefaultFormat::Human,
                    "json" => DefaultFormat::Json,
                    _ => return Err(bad_value(key, value, "human | json")),
                }
            }
            _ => {
                return Err(CleoError::new(
                    ErrorCode::ValidationError,
                    format!("Unknown config key: '{key}'"),
                )
                .with_alternatives(RECOGNIZED_KEYS.iter().map(|k| k.to_string()).collect()));
            }
        }
        Ok(())
    }

    /// Current value of a recognized key, rendered as a string.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "storage.engine" => Some(self.storage.engine.to_string()),
            "hierarchy.maxSiblings" => Some(self.hierarchy.max_siblings.to_string()),
            "hierarchy.maxDepth" => Some(self.hierarchy.max_depth.to_string()),
            "session.enforcement" => Some(
                match self.session.enforcement {
                    SessionEnforcement::None => "none",
                    SessionEnforcement::Warn => "warn",
                    SessionEnforcement::Strict => "strict",
                }
                .to_string(),
            ),
            "session.requireSession" => Some(self.session.require_session.to_string()),
            "session.requireSessionNote" => Some(self.session.require_session_note.to_string()),
            "session.requireNotesOnComplete" => {
                Some(self.session.require_notes_on_complete.to_string())
            }
            "cancellation.requireReason" => Some(self.cancellation.require_reason.to_string()),
            "archive.retentionDays" => Some(self.archive.retention_days.to_string()),
            "logging.level" => Some(self.logging.level.as_filter().to_string()),
            "format.default" => Some(
                match self.format.default {
                    DefaultFormat::Human => "human",
                    DefaultFormat::Json => "json",
                }
                .to_string(),
            ),
            _ => None,
        }
    }
}

fn bad_value(key: &str, value: &str, expected: &str) -> CleoError {
    CleoError::new(
        ErrorCode::ValidationError,
        format!("Invalid value '{value}' for '{key}'. Expected: {expected}"),
    )
}

fn parse_bool(key: &str, value: &str) -> std::result::Result<bool, CleoError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(bad_value(key, value, "true | false")),
    }
}

fn parse_uint(key: &str, value: &str) -> std::result::Result<u32, CleoError> {
    value
        .parse::<u32>()
        .map_err(|_| bad_value(key, value, "a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.engine, StorageEngine::Json);
        assert_eq!(config.hierarchy.max_siblings, 0);
        assert_eq!(config.hierarchy.max_depth, 3);
        assert_eq!(config.session.enforcement, SessionEnforcement::None);
        assert_eq!(config.archive.retention_days, 30);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.format.default, DefaultFormat::Human);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cleo").join("config.toml");

        let mut config = Config::default();
        config.set("storage.engine", "sqlite").unwrap();
        config.set("hierarchy.maxSiblings", "12").unwrap();
        config.set("session.enforcement", "strict").unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.storage.engine, StorageEngine::Sqlite);
        assert_eq!(loaded.hierarchy.max_siblings, 12);
    }

    #[test]
    fn test_set_every_recognized_key() {
        let mut config = Config::default();
        for (key, value) in [
            ("storage.engine", "sqlite"),
            ("hierarchy.maxSiblings", "4"),
            ("hierarchy.maxDepth", "3"),
            ("session.enforcement", "warn"),
            ("session.requireSession", "true"),
            ("session.requireSessionNote", "true"),
            ("session.requireNotesOnComplete", "false"),
            ("cancellation.requireReason", "true"),
            ("archive.retentionDays", "90"),
            ("logging.level", "debug"),
            ("format.default", "json"),
        ] {
            config.set(key, value).unwrap_or_else(|e| panic!("{key}: {e}"));
        }
        assert_eq!(config.get("archive.retentionDays").unwrap(), "90");
        assert_eq!(config.get("logging.level").unwrap(), "debug");
    }

    #[test]
    fn test_unknown_key_rejected_with_alternatives() {
        let mut config = Config::default();
        let err = config.set("storage.backend", "json").unwrap_err();
        assert_eq!(err.code, cleo_core::ErrorCode::ValidationError);
        assert!(err.message.contains("storage.backend"));
        let alternatives = err.alternatives.unwrap();
        assert!(alternatives.contains(&"storage.engine".to_string()));
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut config = Config::default();
        assert!(config.set("storage.engine", "postgres").is_err());
        assert!(config.set("hierarchy.maxSiblings", "-1").is_err());
        assert!(config.set("hierarchy.maxDepth", "0").is_err());
        assert!(config.set("session.requireSession", "yes").is_err());
        assert!(config.set("logging.level", "trace").is_err());
    }

    #[test]
    fn test_get_unknown_key_is_none() {
        let config = Config::default();
        assert!(config.get("nope.nothing").is_none());
    }

    #[test]
    fn test_recognized_keys_all_settable_and_gettable() {
        let config = Config::default();
        for key in RECOGNIZED_KEYS {
            assert!(config.get(key).is_some(), "{key} must be readable");
        }
    }

    #[test]
    fn test_parse_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nengine = \"sqlite\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.engine, StorageEngine::Sqlite);
        assert_eq!(config.hierarchy.max_depth, 3);
    }
}
