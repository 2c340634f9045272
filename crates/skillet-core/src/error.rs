//! Errors raised while loading an agent repository from disk.

use std::path::PathBuf;

/// Configuration loading is fail-fast: the first structural problem aborts
/// the load with one of these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("agent path must be a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("SKILL.md must have YAML frontmatter: {0}")]
    MissingFrontmatter(PathBuf),

    #[error("missing required field '{field}' in {path}")]
    MissingField { field: &'static str, path: PathBuf },
}
