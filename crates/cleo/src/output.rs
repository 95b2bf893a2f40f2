//! Output format selection and envelope rendering.
//!
//! The envelope always goes to stdout; stderr carries the human-readable
//! error summary. `--json` emits one compact line, `--human` pretty-prints;
//! with neither, `CLEO_FORMAT` wins, then a TTY check.

use cleo_core::envelope::DispatchResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Resolve the effective format: explicit flag, then `CLEO_FORMAT`, then
/// TTY detection on stdout.
pub fn resolve_format(json_flag: bool, human_flag: bool) -> OutputFormat {
    if json_flag {
        return OutputFormat::Json;
    }
    if human_flag {
        return OutputFormat::Human;
    }
    match cleo_config::paths::env_format().as_deref() {
        Some("json") => return OutputFormat::Json,
        Some("human") => return OutputFormat::Human,
        Some(other) => {
            tracing::warn!(value = other, "ignoring unrecognized CLEO_FORMAT");
        }
        None => {}
    }
    if stdout_is_tty() {
        OutputFormat::Human
    } else {
        OutputFormat::Json
    }
}

fn stdout_is_tty() -> bool {
    // SAFETY: isatty on the constant stdout fd has no preconditions.
    unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 }
}

/// Print the envelope and return the process exit code.
pub fn render(response: &DispatchResponse, format: OutputFormat) -> i32 {
    let text = match format {
        OutputFormat::Json => serde_json::to_string(response),
        OutputFormat::Human => serde_json::to_string_pretty(response),
    }
    .unwrap_or_else(|e| format!("{{\"success\":false,\"serializeError\":\"{e}\"}}"));
    println!("{text}");

    if let Some(error) = &response.error {
        eprintln!("error: {}", error.message);
        if let Some(fix) = &error.fix {
            eprintln!("  fix: {fix}");
        }
        if let Some(alternatives) = &error.alternatives {
            if !alternatives.is_empty() {
                eprintln!("  alternatives: {}", alternatives.join(", "));
            }
        }
    }

    response.exit_code
}
