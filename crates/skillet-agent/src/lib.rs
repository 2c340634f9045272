//! Skillet agent — the orchestration core.
//!
//! This crate contains:
//! - **skills**: progressive disclosure of skill content and meta-tools
//! - **tools**: unified local/MCP tool catalog with retry and interpolation
//! - **context**: token-budget pruning of long conversations
//! - **agent_loop**: the model ↔ tool main loop
//! - **agent**: blocking/async/streaming execution surface and lifecycle
//! - **cleanup**: process-wide registry for releasing agents at exit

pub mod agent;
pub mod agent_loop;
pub mod cleanup;
pub mod context;
pub mod skills;
pub mod tools;

pub use agent::{Agent, ChatAgent, EventStream, TokenStream};
pub use agent_loop::{run_agentic_loop, LoopConfig};
pub use cleanup::shutdown_all;
pub use skills::SkillManager;
pub use tools::{LocalTool, ToolManager};
