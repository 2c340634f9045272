//! Agent repository loader.
//!
//! Reads the whole agent directory in one pass and fails fast on the first
//! structural problem. Connectivity problems (an MCP server that will not
//! start) are deliberately not checked here; they surface at initialization
//! as skipped servers.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::config::schema::{LlmSettings, McpServerConfig, RetryPolicy, SkillMetadata};

// ─────────────────────────────────────────────
// Loaded configuration
// ─────────────────────────────────────────────

/// Everything an agent needs, loaded from its directory.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub root: PathBuf,
    pub llm: LlmSettings,
    /// Free-form `config:` section, available to `${config.*}` placeholders.
    pub vars: serde_json::Value,
    pub retry: RetryPolicy,
    /// AGENTS.md contents, or empty when absent.
    pub instructions: String,
    /// Skills sorted by directory name.
    pub skills: Vec<SkillMetadata>,
    /// MCP server descriptors sorted by file name.
    pub mcp_servers: Vec<McpServerConfig>,
}

#[derive(Default, serde::Deserialize)]
struct ConfigFile {
    #[serde(default)]
    llm: LlmSettings,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    tools: RetryPolicy,
}

/// Load an agent repository rooted at `root`.
pub fn load_agent(root: impl AsRef<Path>) -> Result<AgentConfig, ConfigError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ConfigError::NotADirectory(root.to_path_buf()));
    }

    let config_path = root.join("config.yaml");
    let file: ConfigFile = if config_path.exists() {
        let raw = read(&config_path)?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: config_path.clone(),
            source,
        })?
    } else {
        ConfigFile::default()
    };
    if file.llm.model.is_empty() {
        return Err(ConfigError::MissingField {
            field: "llm.model",
            path: config_path,
        });
    }

    let instructions_path = root.join("AGENTS.md");
    let instructions = if instructions_path.exists() {
        read(&instructions_path)?
    } else {
        String::new()
    };

    let skills = load_skills(&root.join("skills"))?;
    let mcp_servers = load_mcp_servers(&root.join("tools").join("mcp"))?;

    debug!(
        root = %root.display(),
        skills = skills.len(),
        mcp_servers = mcp_servers.len(),
        "loaded agent repository"
    );

    Ok(AgentConfig {
        root: root.to_path_buf(),
        llm: file.llm,
        vars: file.config,
        retry: file.tools,
        instructions,
        skills,
        mcp_servers,
    })
}

/// Every `skills/<dir>/SKILL.md`, sorted by directory name.
fn load_skills(skills_dir: &Path) -> Result<Vec<SkillMetadata>, ConfigError> {
    let mut dirs = list_sorted(skills_dir, |p| p.is_dir());
    dirs.retain(|d| d.join("SKILL.md").is_file());
    dirs.iter()
        .map(|d| SkillMetadata::from_skill_md(&d.join("SKILL.md")))
        .collect()
}

/// Every `tools/mcp/*.yaml`, sorted by file name.
fn load_mcp_servers(mcp_dir: &Path) -> Result<Vec<McpServerConfig>, ConfigError> {
    let files = list_sorted(mcp_dir, |p| {
        p.extension().and_then(|e| e.to_str()) == Some("yaml")
    });
    files
        .iter()
        .map(|path| {
            let raw = read(path)?;
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                path: path.clone(),
                source,
            })
        })
        .collect()
}

fn list_sorted(dir: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| keep(p))
            .collect(),
        Err(_) => Vec::new(),
    };
    paths.sort();
    paths
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
