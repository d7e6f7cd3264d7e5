//! Tool registry and built-in tool implementations.

pub mod implementations;
pub mod registry;
pub mod truncation;

pub use implementations::register_builtin_tools;
pub use registry::{Tool, ToolArtifact, ToolContext, ToolErrorDetail, ToolRegistry, ToolResult};
