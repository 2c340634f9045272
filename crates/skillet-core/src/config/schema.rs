//! Typed schema for `config.yaml`, SKILL.md frontmatter, and MCP server
//! descriptors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─────────────────────────────────────────────
// LLM settings (`llm:` section of config.yaml)
// ─────────────────────────────────────────────

/// Model selection and request parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    /// Model identifier, e.g. `"gpt-4o"`. Required.
    pub model: String,
    /// API base URL. Defaults to the OpenAI endpoint when unset.
    pub api_base: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Retry attempts for transient API failures.
    pub max_retries: u32,
    /// Cap on model invocations per agent run.
    pub max_iterations: usize,
    /// Context window size used by the pruning threshold.
    pub max_input_tokens: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            api_base: None,
            api_key_env: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
            max_retries: 7,
            max_iterations: 50,
            max_input_tokens: 128_000,
        }
    }
}

// ─────────────────────────────────────────────
// Tool retry policy (`tools:` section of config.yaml)
// ─────────────────────────────────────────────

/// Timeout and retry behavior applied to every tool invocation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff_secs * 2^n`.
    pub backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_secs: 1.0,
        }
    }
}

// ─────────────────────────────────────────────
// MCP server descriptors (tools/mcp/*.yaml)
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    #[default]
    Stdio,
    #[serde(alias = "streamable_http", alias = "streamable-http")]
    Http,
}

/// One MCP server the agent may connect to.
///
/// `command` (stdio) and `url` (http) are validated at connect time, so a
/// broken descriptor degrades to a skipped server rather than a failed load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub transport: McpTransport,
    /// Executable for stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the spawned process. Values may contain
    /// `${config.*}` and `${ENV_VAR}` placeholders.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Endpoint for http transport.
    #[serde(default)]
    pub url: Option<String>,
    /// Extra HTTP headers, also placeholder-expanded.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// ─────────────────────────────────────────────
// Skills (skills/<name>/SKILL.md)
// ─────────────────────────────────────────────

/// A skill parsed from disk: frontmatter, body, and sibling resources.
#[derive(Clone, Debug, PartialEq)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    /// Tools this skill needs. Empty means the skill opts into the whole
    /// catalog once loaded.
    pub tools: Vec<String>,
    /// SKILL.md body (everything after the frontmatter).
    pub content: String,
    pub path: PathBuf,
    /// Reference documents keyed by file stem.
    pub references: BTreeMap<String, PathBuf>,
    /// Scripts keyed by file stem.
    pub scripts: BTreeMap<String, PathBuf>,
}

#[derive(Deserialize)]
struct SkillFrontmatter {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tools: Vec<String>,
}

impl SkillMetadata {
    /// Parse a SKILL.md file and scan its `references/` and `scripts/`
    /// siblings.
    pub fn from_skill_md(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let (frontmatter, body) = split_frontmatter(&raw)
            .ok_or_else(|| ConfigError::MissingFrontmatter(path.to_path_buf()))?;

        let meta: SkillFrontmatter =
            serde_yaml::from_str(frontmatter).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        let name = meta.name.ok_or(ConfigError::MissingField {
            field: "name",
            path: path.to_path_buf(),
        })?;

        let skill_dir = path.parent().unwrap_or_else(|| Path::new("."));

        Ok(Self {
            name,
            description: meta.description,
            tools: meta.tools,
            content: body.trim_start().to_string(),
            path: path.to_path_buf(),
            references: scan_resources(&skill_dir.join("references"), &["md"]),
            scripts: scan_resources(&skill_dir.join("scripts"), &["py", "sh", "js"]),
        })
    }
}

/// Split `---\n<yaml>\n---\n<body>` into its two halves.
fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = rest[end + 4..].strip_prefix('\n').unwrap_or(&rest[end + 4..]);
    Some((frontmatter, body))
}

/// Collect files with the given extensions, keyed by stem. Unreadable or
/// missing directories yield an empty map.
fn scan_resources(dir: &Path, extensions: &[&str]) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return found,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            found.insert(stem.to_string(), path);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_llm_settings_defaults() {
        let settings: LlmSettings = serde_yaml::from_str("model: gpt-4o").unwrap();
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.timeout_secs, 120);
        assert_eq!(settings.max_retries, 7);
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.max_input_tokens, 128_000);
        assert!(settings.temperature.is_none());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.timeout_secs, 30);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_secs, 1.0);
    }

    #[test]
    fn test_mcp_server_minimal_yaml() {
        let cfg: McpServerConfig = serde_yaml::from_str("name: jira\ncommand: jira-mcp").unwrap();
        assert_eq!(cfg.name, "jira");
        assert_eq!(cfg.transport, McpTransport::Stdio);
        assert_eq!(cfg.command.as_deref(), Some("jira-mcp"));
        assert!(cfg.args.is_empty());
    }

    #[test]
    fn test_mcp_server_http_alias() {
        let yaml = "name: web\ntransport: streamable_http\nurl: http://localhost:9000/mcp";
        let cfg: McpServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.transport, McpTransport::Http);
    }

    #[test]
    fn test_mcp_server_requires_name() {
        let parsed: Result<McpServerConfig, _> = serde_yaml::from_str("command: jira-mcp");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_skill_from_skill_md() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("triage");
        fs::create_dir_all(skill_dir.join("references")).unwrap();
        fs::create_dir_all(skill_dir.join("scripts")).unwrap();
        fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: triage\ndescription: Triage bugs\ntools:\n  - search\n---\n\nDo the triage.\n",
        )
        .unwrap();
        fs::write(skill_dir.join("references").join("guide.md"), "guide").unwrap();
        fs::write(skill_dir.join("references").join("notes.txt"), "skip me").unwrap();
        fs::write(skill_dir.join("scripts").join("run.py"), "print()").unwrap();

        let skill = SkillMetadata::from_skill_md(&skill_dir.join("SKILL.md")).unwrap();
        assert_eq!(skill.name, "triage");
        assert_eq!(skill.description, "Triage bugs");
        assert_eq!(skill.tools, vec!["search"]);
        assert_eq!(skill.content, "Do the triage.\n");
        assert_eq!(skill.references.len(), 1);
        assert!(skill.references.contains_key("guide"));
        assert!(skill.scripts.contains_key("run"));
    }

    #[test]
    fn test_skill_missing_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SKILL.md");
        fs::write(&path, "No frontmatter here.").unwrap();
        let err = SkillMetadata::from_skill_md(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFrontmatter(_)));
    }

    #[test]
    fn test_skill_missing_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SKILL.md");
        fs::write(&path, "---\ndescription: nameless\n---\nbody").unwrap();
        let err = SkillMetadata::from_skill_md(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "name", .. }));
    }

    #[test]
    fn test_skill_tools_must_be_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SKILL.md");
        fs::write(&path, "---\nname: x\ntools: not-a-list\n---\nbody").unwrap();
        let err = SkillMetadata::from_skill_md(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
