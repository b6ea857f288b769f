//! Filesystem layout helpers.
//!
//! All runtime state lives under a single data root (current directory by
//! default, overridable with `BERINIA_DATA_DIR`): `agents/<name>/` for
//! per-agent config and prompt files, `logs/` for the rotating sinks,
//! `data/knowledge/` for the offline corpus and `data/` for the scheduler
//! task file.

use std::env;
use std::path::PathBuf;

/// Root directory for all runtime state.
pub fn data_root() -> PathBuf {
    env::var("BERINIA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Directory holding the rotating log sinks.
pub fn logs_dir() -> PathBuf {
    data_root().join("logs")
}

/// Directory holding the offline knowledge corpus (`**/*.md`).
pub fn knowledge_dir() -> PathBuf {
    data_root().join("data").join("knowledge")
}

/// Per-agent asset directory: `agents/<snake_case>/`.
///
/// Only the snake_case layout is supported; `MetaAgent` resolves to
/// `agents/meta/`, `ResponseListenerAgent` to `agents/response_listener/`.
pub fn agent_dir(agent_name: &str) -> PathBuf {
    data_root().join("agents").join(snake_dir_name(agent_name))
}

/// Convert an agent name into its directory name: strip a trailing `Agent`,
/// then snake_case the remainder.
pub fn snake_dir_name(agent_name: &str) -> String {
    let trimmed = agent_name.strip_suffix("Agent").unwrap_or(agent_name);
    let mut out = String::with_capacity(trimmed.len() + 4);
    for (i, ch) in trimmed.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            for low in ch.to_lowercase() {
                out.push(low);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_dir_name_strips_agent_suffix() {
        assert_eq!(snake_dir_name("MetaAgent"), "meta");
        assert_eq!(snake_dir_name("ResponseListenerAgent"), "response_listener");
        assert_eq!(snake_dir_name("TestAgent"), "test");
    }

    #[test]
    fn test_snake_dir_name_keeps_non_agent_names() {
        assert_eq!(snake_dir_name("ScrapingSupervisor"), "scraping_supervisor");
        assert_eq!(
            snake_dir_name("QualificationSupervisor"),
            "qualification_supervisor"
        );
    }
}
