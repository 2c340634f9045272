//! Agent repository configuration — schema and loader.
//!
//! An agent lives in a directory:
//!
//! ```text
//! my-agent/
//! ├── config.yaml          # llm settings, tool retry policy, free-form vars
//! ├── AGENTS.md            # base instructions
//! ├── skills/
//! │   └── <skill>/
//! │       ├── SKILL.md     # frontmatter + body
//! │       ├── references/  # *.md loaded on demand
//! │       └── scripts/     # *.py / *.sh / *.js loaded on demand
//! └── tools/
//!     └── mcp/*.yaml       # MCP server descriptors
//! ```

pub mod loader;
pub mod schema;

pub use loader::{load_agent, AgentConfig};
