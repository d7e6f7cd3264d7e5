//! Built-in tool implementations.
//!
//! Five tools: `shell`, `read_file`, `write_file`, `web_search`,
//! `deep_research`.

pub mod bash;
pub mod deep_research;
pub mod read;
pub mod web_search;
pub mod write;

pub use bash::ShellTool;
pub use deep_research::DeepResearchTool;
pub use read::ReadFileTool;
pub use web_search::WebSearchTool;
pub use write::WriteFileTool;

use std::sync::Arc;

use crate::error::Result;
use crate::tools::registry::ToolRegistry;

/// Register every built-in tool against a fresh registry. Composition-root
/// call, made once per server/CLI process.
pub async fn register_builtin_tools(registry: &ToolRegistry) -> Result<()> {
    registry.register(Arc::new(ShellTool)).await?;
    registry.register(Arc::new(ReadFileTool)).await?;
    registry.register(Arc::new(WriteFileTool)).await?;
    registry.register(Arc::new(WebSearchTool)).await?;
    registry.register(Arc::new(DeepResearchTool)).await?;
    Ok(())
}
