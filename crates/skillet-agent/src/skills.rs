//! Skill manager — progressive disclosure of skill content.
//!
//! # Architecture
//!
//! Skills start folded: only name and description appear in the system
//! prompt. The model pulls in what it needs through three meta-tools:
//!
//! 1. `load_skill(name)` — the full SKILL.md body, always offered
//! 2. `load_reference(skill_name, reference_name)` — reference documents,
//!    offered once a loaded skill has any
//! 3. `load_script(skill_name, script_name)` — executable scripts, likewise
//!
//! Loading a skill also widens the visible tool catalog: the loop exposes
//! the union of `tools:` lists across loaded skills, or the whole catalog
//! when no loaded skill names any tool.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::debug;

use skillet_core::config::schema::SkillMetadata;
use skillet_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Load results
// ─────────────────────────────────────────────

/// Outcome of `load_skill`. `content` is either the skill body or an error
/// string meant for the model.
#[derive(Clone, Debug)]
pub struct SkillLoadResult {
    pub content: String,
    pub tools: Vec<String>,
    pub success: bool,
}

#[derive(Clone, Debug)]
pub struct ReferenceLoadResult {
    pub content: String,
    pub success: bool,
}

#[derive(Clone, Debug)]
pub struct ScriptLoadResult {
    pub content: String,
    pub language: String,
    pub success: bool,
}

// ─────────────────────────────────────────────
// SkillManager
// ─────────────────────────────────────────────

/// Tracks which skills exist and which the model has unfolded.
#[derive(Clone, Debug, Default)]
pub struct SkillManager {
    skills: BTreeMap<String, SkillMetadata>,
    loaded: BTreeSet<String>,
}

impl SkillManager {
    pub fn from_skills(skills: Vec<SkillMetadata>) -> Self {
        Self {
            skills: skills.into_iter().map(|s| (s.name.clone(), s)).collect(),
            loaded: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Names of all known skills, sorted.
    pub fn skill_names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    pub fn has_loaded_skills(&self) -> bool {
        !self.loaded.is_empty()
    }

    // ────────────── System prompt ──────────────

    /// Markdown summary of available skills, or empty when there are none.
    pub fn summary(&self) -> String {
        if self.skills.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "## Available Skills".to_string(),
            String::new(),
            "You have access to the following skills. Use `load_skill(name)` to load a \
             skill's full instructions when needed."
                .to_string(),
            String::new(),
        ];
        for skill in self.skills.values() {
            lines.push(format!("- **{}**: {}", skill.name, skill.description));
        }
        lines.join("\n")
    }

    // ────────────── Loading ──────────────

    /// Load a skill's full content and mark it unfolded. Unknown names
    /// produce an error string rather than a hard failure, since the model
    /// is the caller.
    pub fn load_skill(&mut self, name: &str) -> SkillLoadResult {
        let Some(skill) = self.skills.get(name) else {
            let available = self.skill_names().join(", ");
            debug!(skill = name, available = %available, "skill not found");
            return SkillLoadResult {
                content: format!("Error: Skill '{name}' not found. Available skills: {available}"),
                tools: Vec::new(),
                success: false,
            };
        };

        self.loaded.insert(name.to_string());
        debug!(skill = name, tools = ?skill.tools, "loaded skill");

        let mut content = format!("# Skill: {}\n\n{}", skill.name, skill.content);
        if !skill.references.is_empty() {
            content.push_str(
                "\n\n## Available References\n\nThis skill has additional reference \
                 documents. Use `load_reference(skill_name, reference_name)` to load them:\n",
            );
            for ref_name in skill.references.keys() {
                content.push_str(&format!("\n- `{ref_name}`"));
            }
        }
        if !skill.scripts.is_empty() {
            content.push_str(
                "\n\n## Available Scripts\n\nThis skill has executable scripts. Use \
                 `load_script(skill_name, script_name)` to load them, then use \
                 code_interpreter to run:\n",
            );
            for (script_name, path) in &skill.scripts {
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                content.push_str(&format!("\n- `{script_name}` (.{ext})"));
            }
        }

        SkillLoadResult {
            content,
            tools: skill.tools.clone(),
            success: true,
        }
    }

    /// Load several skills at once.
    pub fn load_skills(&mut self, names: &[String]) -> Vec<SkillLoadResult> {
        names.iter().map(|name| self.load_skill(name)).collect()
    }

    /// Union of `tools:` lists across loaded skills.
    pub fn required_tools(&self) -> BTreeSet<String> {
        self.loaded
            .iter()
            .filter_map(|name| self.skills.get(name))
            .flat_map(|skill| skill.tools.iter().cloned())
            .collect()
    }

    /// True when skills are loaded but none of them names a tool, which
    /// opts the turn into the whole catalog. As soon as one loaded skill
    /// names tools, the turn narrows to the union.
    pub fn exposes_all_tools(&self) -> bool {
        !self.loaded.is_empty()
            && self
                .loaded
                .iter()
                .filter_map(|name| self.skills.get(name))
                .all(|skill| skill.tools.is_empty())
    }

    // ────────────── References ──────────────

    pub fn load_reference(&self, skill_name: &str, reference_name: &str) -> ReferenceLoadResult {
        let Some(skill) = self.skills.get(skill_name) else {
            let available = self.skill_names().join(", ");
            return ReferenceLoadResult {
                content: format!(
                    "Error: Skill '{skill_name}' not found. Available skills: {available}"
                ),
                success: false,
            };
        };
        if skill.references.is_empty() {
            return ReferenceLoadResult {
                content: format!("Error: Skill '{skill_name}' has no references."),
                success: false,
            };
        }
        let Some(path) = skill.references.get(reference_name) else {
            let available = skill
                .references
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            return ReferenceLoadResult {
                content: format!(
                    "Error: Reference '{reference_name}' not found in skill '{skill_name}'. \
                     Available references: {available}"
                ),
                success: false,
            };
        };
        match std::fs::read_to_string(path) {
            Ok(content) => ReferenceLoadResult {
                content: format!("# Reference: {reference_name}\n\n{content}"),
                success: true,
            },
            Err(e) => ReferenceLoadResult {
                content: format!("Error: Failed to read reference '{reference_name}': {e}"),
                success: false,
            },
        }
    }

    pub fn has_references(&self) -> bool {
        self.loaded
            .iter()
            .filter_map(|name| self.skills.get(name))
            .any(|skill| !skill.references.is_empty())
    }

    /// Reference names per loaded skill.
    pub fn available_references(&self) -> BTreeMap<String, Vec<String>> {
        self.loaded
            .iter()
            .filter_map(|name| self.skills.get(name))
            .filter(|skill| !skill.references.is_empty())
            .map(|skill| (skill.name.clone(), skill.references.keys().cloned().collect()))
            .collect()
    }

    // ────────────── Scripts ──────────────

    pub fn load_script(&self, skill_name: &str, script_name: &str) -> ScriptLoadResult {
        let failure = |content: String| ScriptLoadResult {
            content,
            language: String::new(),
            success: false,
        };

        let Some(skill) = self.skills.get(skill_name) else {
            let available = self.skill_names().join(", ");
            return failure(format!(
                "Error: Skill '{skill_name}' not found. Available skills: {available}"
            ));
        };
        if skill.scripts.is_empty() {
            return failure(format!("Error: Skill '{skill_name}' has no scripts."));
        }
        let Some(path) = skill.scripts.get(script_name) else {
            let available = skill.scripts.keys().cloned().collect::<Vec<_>>().join(", ");
            return failure(format!(
                "Error: Script '{script_name}' not found in skill '{skill_name}'. \
                 Available scripts: {available}"
            ));
        };

        let language = match path.extension().and_then(|e| e.to_str()) {
            Some("py") => "python",
            Some("sh") => "bash",
            Some("js") => "javascript",
            _ => "unknown",
        };
        match std::fs::read_to_string(path) {
            Ok(content) => ScriptLoadResult {
                content,
                language: language.to_string(),
                success: true,
            },
            Err(e) => failure(format!("Error: Failed to read script '{script_name}': {e}")),
        }
    }

    pub fn has_scripts(&self) -> bool {
        self.loaded
            .iter()
            .filter_map(|name| self.skills.get(name))
            .any(|skill| !skill.scripts.is_empty())
    }

    /// Script names per loaded skill.
    pub fn available_scripts(&self) -> BTreeMap<String, Vec<String>> {
        self.loaded
            .iter()
            .filter_map(|name| self.skills.get(name))
            .filter(|skill| !skill.scripts.is_empty())
            .map(|skill| (skill.name.clone(), skill.scripts.keys().cloned().collect()))
            .collect()
    }

    // ────────────── Meta-tool definitions ──────────────

    /// The `load_skill` meta-tool, with valid names baked into the schema.
    pub fn load_skill_tool(&self) -> ToolDefinition {
        ToolDefinition::new(
            "load_skill",
            "Load a skill's full instructions. Use this when you need detailed guidance \
             for handling a specific type of request. The skill content will be added to \
             the conversation.",
            json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "The name of the skill to load",
                        "enum": self.skill_names(),
                    },
                },
                "required": ["name"],
            }),
        )
    }

    /// The `load_reference` meta-tool, or `None` until a loaded skill has
    /// references.
    pub fn load_reference_tool(&self) -> Option<ToolDefinition> {
        let refs = self.available_references();
        if refs.is_empty() {
            return None;
        }
        let listing = refs
            .iter()
            .map(|(skill, names)| format!("- {}: {}", skill, names.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        Some(ToolDefinition::new(
            "load_reference",
            format!(
                "Load a reference document from a skill. References provide additional \
                 context, examples, or detailed information. Available references:\n{listing}"
            ),
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill containing the reference",
                        "enum": refs.keys().collect::<Vec<_>>(),
                    },
                    "reference_name": {
                        "type": "string",
                        "description": "The name of the reference to load",
                    },
                },
                "required": ["skill_name", "reference_name"],
            }),
        ))
    }

    /// The `load_script` meta-tool, or `None` until a loaded skill has
    /// scripts.
    pub fn load_script_tool(&self) -> Option<ToolDefinition> {
        let scripts = self.available_scripts();
        if scripts.is_empty() {
            return None;
        }
        let listing = scripts
            .iter()
            .map(|(skill, names)| format!("- {}: {}", skill, names.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        Some(ToolDefinition::new(
            "load_script",
            format!(
                "Load an executable script from a skill. Scripts contain code that can \
                 be run using the code interpreter. Available scripts:\n{listing}"
            ),
            json!({
                "type": "object",
                "properties": {
                    "skill_name": {
                        "type": "string",
                        "description": "The name of the skill containing the script",
                        "enum": scripts.keys().collect::<Vec<_>>(),
                    },
                    "script_name": {
                        "type": "string",
                        "description": "The name of the script to load",
                    },
                },
                "required": ["skill_name", "script_name"],
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn make_skill(name: &str, description: &str, tools: &[&str]) -> SkillMetadata {
        SkillMetadata {
            name: name.to_string(),
            description: description.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            content: format!("Instructions for {name}."),
            path: PathBuf::from(format!("skills/{name}/SKILL.md")),
            references: BTreeMap::new(),
            scripts: BTreeMap::new(),
        }
    }

    #[test]
    fn test_summary_lists_all_skills() {
        let manager = SkillManager::from_skills(vec![
            make_skill("zeta", "Last", &[]),
            make_skill("alpha", "First", &[]),
        ]);
        let summary = manager.summary();
        assert!(summary.starts_with("## Available Skills"));
        assert!(summary.contains("- **alpha**: First"));
        assert!(summary.contains("- **zeta**: Last"));
        // Sorted by name regardless of construction order.
        assert!(summary.find("alpha").unwrap() < summary.find("zeta").unwrap());
    }

    #[test]
    fn test_summary_empty_without_skills() {
        assert_eq!(SkillManager::default().summary(), "");
    }

    #[test]
    fn test_load_skill_success() {
        let mut manager =
            SkillManager::from_skills(vec![make_skill("triage", "Triage bugs", &["search"])]);
        let result = manager.load_skill("triage");
        assert!(result.success);
        assert!(result.content.starts_with("# Skill: triage"));
        assert!(result.content.contains("Instructions for triage."));
        assert_eq!(result.tools, vec!["search"]);
        assert!(manager.has_loaded_skills());
    }

    #[test]
    fn test_load_skill_not_found() {
        let mut manager = SkillManager::from_skills(vec![
            make_skill("alpha", "", &[]),
            make_skill("beta", "", &[]),
        ]);
        let result = manager.load_skill("gamma");
        assert!(!result.success);
        assert_eq!(
            result.content,
            "Error: Skill 'gamma' not found. Available skills: alpha, beta"
        );
        assert!(!manager.has_loaded_skills());
    }

    #[test]
    fn test_load_skill_idempotent() {
        let mut manager = SkillManager::from_skills(vec![make_skill("a", "", &["t1"])]);
        manager.load_skill("a");
        manager.load_skill("a");
        assert_eq!(manager.required_tools().len(), 1);
    }

    #[test]
    fn test_load_skills_plural() {
        let mut manager = SkillManager::from_skills(vec![
            make_skill("a", "", &["t1"]),
            make_skill("b", "", &["t2"]),
        ]);
        let results = manager.load_skills(&["a".into(), "missing".into(), "b".into()]);
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        let tools = manager.required_tools();
        assert!(tools.contains("t1") && tools.contains("t2"));
    }

    #[test]
    fn test_all_tools_only_while_union_is_empty() {
        let mut manager = SkillManager::from_skills(vec![
            make_skill("narrow", "", &["t1"]),
            make_skill("open", "", &[]),
        ]);
        assert!(!manager.exposes_all_tools());
        manager.load_skill("open");
        assert!(manager.exposes_all_tools());
        // A loaded skill that names tools narrows the turn to the union.
        manager.load_skill("narrow");
        assert!(!manager.exposes_all_tools());
        assert_eq!(manager.required_tools().len(), 1);
    }

    #[test]
    fn test_load_skill_tool_schema_enumerates_names() {
        let manager = SkillManager::from_skills(vec![
            make_skill("a", "", &[]),
            make_skill("b", "", &[]),
        ]);
        let def = manager.load_skill_tool();
        assert_eq!(def.function.name, "load_skill");
        assert_eq!(
            def.function.parameters["properties"]["name"]["enum"],
            serde_json::json!(["a", "b"])
        );
    }

    #[test]
    fn test_reference_flow() {
        let dir = tempfile::tempdir().unwrap();
        let ref_path = dir.path().join("guide.md");
        fs::write(&ref_path, "Follow the guide.").unwrap();

        let mut skill = make_skill("docs", "", &[]);
        skill.references.insert("guide".into(), ref_path);
        let mut manager = SkillManager::from_skills(vec![skill]);

        // Meta-tool hidden until the skill is loaded.
        assert!(manager.load_reference_tool().is_none());
        let loaded = manager.load_skill("docs");
        assert!(loaded.content.contains("## Available References"));
        assert!(loaded.content.contains("- `guide`"));
        let def = manager.load_reference_tool().unwrap();
        assert!(def.function.description.contains("- docs: guide"));

        let result = manager.load_reference("docs", "guide");
        assert!(result.success);
        assert_eq!(result.content, "# Reference: guide\n\nFollow the guide.");
    }

    #[test]
    fn test_reference_errors() {
        let mut skill = make_skill("docs", "", &[]);
        skill
            .references
            .insert("guide".into(), PathBuf::from("/nonexistent/guide.md"));
        let manager = SkillManager::from_skills(vec![skill, make_skill("bare", "", &[])]);

        let missing_skill = manager.load_reference("nope", "guide");
        assert!(missing_skill.content.starts_with("Error: Skill 'nope' not found"));

        let no_refs = manager.load_reference("bare", "guide");
        assert_eq!(no_refs.content, "Error: Skill 'bare' has no references.");

        let missing_ref = manager.load_reference("docs", "other");
        assert_eq!(
            missing_ref.content,
            "Error: Reference 'other' not found in skill 'docs'. Available references: guide"
        );

        let unreadable = manager.load_reference("docs", "guide");
        assert!(!unreadable.success);
        assert!(unreadable
            .content
            .starts_with("Error: Failed to read reference 'guide':"));
    }

    #[test]
    fn test_script_flow() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("report.py");
        fs::write(&script_path, "print('hi')").unwrap();

        let mut skill = make_skill("reports", "", &[]);
        skill.scripts.insert("report".into(), script_path);
        let mut manager = SkillManager::from_skills(vec![skill]);

        assert!(manager.load_script_tool().is_none());
        let loaded = manager.load_skill("reports");
        assert!(loaded.content.contains("## Available Scripts"));
        assert!(loaded.content.contains("- `report` (.py)"));
        assert!(manager.load_script_tool().is_some());

        let result = manager.load_script("reports", "report");
        assert!(result.success);
        assert_eq!(result.language, "python");
        assert_eq!(result.content, "print('hi')");
    }

    #[test]
    fn test_script_errors() {
        let manager = SkillManager::from_skills(vec![make_skill("bare", "", &[])]);
        let result = manager.load_script("bare", "x");
        assert_eq!(result.content, "Error: Skill 'bare' has no scripts.");
        assert_eq!(result.language, "");
        assert!(!result.success);
    }
}
