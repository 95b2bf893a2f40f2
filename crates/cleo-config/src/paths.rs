//! Resolution of the project data directory and every per-file path.

use std::path::{Path, PathBuf};

/// Per-project data directory env override.
pub const ENV_DIR: &str = "CLEO_DIR";
/// Global install directory env override.
pub const ENV_HOME: &str = "CLEO_HOME";
/// Output format override (`human` or `json`).
pub const ENV_FORMAT: &str = "CLEO_FORMAT";
/// Debug logging toggle.
pub const ENV_DEBUG: &str = "CLEO_DEBUG";

/// Default data directory name under the project root.
pub const DATA_DIR_NAME: &str = ".cleo";

/// All file locations for one project, derived once from the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
    data_dir: PathBuf,
}

impl ProjectPaths {
    /// Resolve paths for a project root, honoring `CLEO_DIR` when set.
    pub fn resolve(root: &Path) -> Self {
        let data_dir = match std::env::var(ENV_DIR) {
            Ok(dir) if !dir.is_empty() => {
                let p = PathBuf::from(dir);
                if p.is_absolute() { p } else { root.join(p) }
            }
            _ => root.join(DATA_DIR_NAME),
        };
        Self {
            root: root.to_path_buf(),
            data_dir,
        }
    }

    /// Paths with an explicit data directory (for testing).
    pub fn with_data_dir(root: PathBuf, data_dir: PathBuf) -> Self {
        Self { root, data_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn todo(&self) -> PathBuf {
        self.data_dir.join("todo.json")
    }

    pub fn archive(&self) -> PathBuf {
        self.data_dir.join("todo-archive.json")
    }

    pub fn sessions(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    /// The audit log. Named `.jsonl` for historical reasons but holding a
    /// single JSON object with an `entries` array; the shape is preserved
    /// until a migration exists.
    pub fn audit_log(&self) -> PathBuf {
        self.data_dir.join("todo-log.jsonl")
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn db(&self) -> PathBuf {
        self.data_dir.join("tasks.db")
    }

    /// The live data files covered by backups, in a stable order.
    pub fn data_files(&self) -> Vec<PathBuf> {
        vec![self.todo(), self.archive(), self.sessions(), self.audit_log()]
    }
}

/// Global install directory: `CLEO_HOME`, defaulting to `~/.cleo`.
pub fn home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var(ENV_HOME) {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(DATA_DIR_NAME))
}

/// Debug logging requested via `CLEO_DEBUG` (any non-empty value except `0`).
pub fn debug_enabled() -> bool {
    match std::env::var(ENV_DEBUG) {
        Ok(v) => !v.is_empty() && v != "0",
        Err(_) => false,
    }
}

/// Format requested via `CLEO_FORMAT`, if any.
pub fn env_format() -> Option<String> {
    std::env::var(ENV_FORMAT).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_resolve_default_data_dir() {
        // SAFETY: test process manipulates its own environment; guarded by
        // #[serial] against concurrent env access.
        unsafe { std::env::remove_var(ENV_DIR) };
        let paths = ProjectPaths::resolve(Path::new("/work/proj"));
        assert_eq!(paths.data_dir(), Path::new("/work/proj/.cleo"));
        assert_eq!(paths.todo(), PathBuf::from("/work/proj/.cleo/todo.json"));
        assert_eq!(
            paths.archive(),
            PathBuf::from("/work/proj/.cleo/todo-archive.json")
        );
        assert_eq!(
            paths.audit_log(),
            PathBuf::from("/work/proj/.cleo/todo-log.jsonl")
        );
    }

    #[test]
    #[serial]
    fn test_resolve_relative_env_dir_joins_root() {
        unsafe { std::env::set_var(ENV_DIR, "state/cleo") };
        let paths = ProjectPaths::resolve(Path::new("/work/proj"));
        assert_eq!(paths.data_dir(), Path::new("/work/proj/state/cleo"));
        unsafe { std::env::remove_var(ENV_DIR) };
    }

    #[test]
    #[serial]
    fn test_resolve_absolute_env_dir_wins() {
        unsafe { std::env::set_var(ENV_DIR, "/var/lib/cleo") };
        let paths = ProjectPaths::resolve(Path::new("/work/proj"));
        assert_eq!(paths.data_dir(), Path::new("/var/lib/cleo"));
        unsafe { std::env::remove_var(ENV_DIR) };
    }

    #[test]
    #[serial]
    fn test_home_dir_env_override() {
        unsafe { std::env::set_var(ENV_HOME, "/opt/cleo") };
        assert_eq!(home_dir(), Some(PathBuf::from("/opt/cleo")));
        unsafe { std::env::remove_var(ENV_HOME) };
    }

    #[test]
    #[serial]
    fn test_debug_enabled() {
        unsafe { std::env::remove_var(ENV_DEBUG) };
        assert!(!debug_enabled());
        unsafe { std::env::set_var(ENV_DEBUG, "1") };
        assert!(debug_enabled());
        unsafe { std::env::set_var(ENV_DEBUG, "0") };
        assert!(!debug_enabled());
        unsafe { std::env::remove_var(ENV_DEBUG) };
    }

    #[test]
    fn test_data_files_are_stable() {
        let paths = ProjectPaths::with_data_dir(
            PathBuf::from("/p"),
            PathBuf::from("/p/.cleo"),
        );
        let files = paths.data_files();
        assert_eq!(files.len(), 4);
        assert!(files[0].ends_with("todo.json"));
        assert!(files[3].ends_with("todo-log.jsonl"));
    }
}
