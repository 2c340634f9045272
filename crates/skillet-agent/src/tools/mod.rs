//! Tool layer for the Skillet agent.

pub mod local;
pub mod manager;

pub use local::LocalTool;
pub use manager::ToolManager;
