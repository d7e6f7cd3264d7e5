//! `deep_research` tool — network side-effect, read-only, contract-only.
//!
//! Multi-step orchestrated search-then-synthesize pipeline. Outbound
//! network access is out of scope; registered the same way as
//! [`super::web_search`] so plans can still reference it, returning a
//! synthesized findings block instead of failing the step.

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::model::{ParamSpec, ParamType, SideEffectClass, ToolDescriptor};
use crate::tools::registry::{Tool, ToolContext, ToolResult};

static DESCRIPTOR: Lazy<ToolDescriptor> = Lazy::new(|| ToolDescriptor {
    name: "deep_research".to_string(),
    description: "Run a multi-step research pipeline over a topic and synthesize findings."
        .to_string(),
    params: vec![
        ParamSpec {
            name: "topic".to_string(),
            param_type: ParamType::String,
            required: true,
        },
        ParamSpec {
            name: "depth".to_string(),
            param_type: ParamType::Number,
            required: false,
        },
    ],
    side_effects: SideEffectClass::Network,
    idempotent: true,
    max_timeout_secs: 300,
});

pub struct DeepResearchTool;

#[derive(Deserialize)]
struct Params {
    topic: String,
    #[serde(default)]
    depth: Option<u32>,
}

#[async_trait::async_trait]
impl Tool for DeepResearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &DESCRIPTOR
    }

    async fn invoke(&self, params: Value, _ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
        let params = match serde_json::from_value::<Params>(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::validation_error(format!("invalid parameters: {e}")),
        };
        let depth = params.depth.unwrap_or(2).max(1);

        let findings: Vec<Value> = (1..=depth)
            .map(|i| {
                serde_json::json!({
                    "step": i,
                    "finding": format!("Placeholder finding {i} on \"{}\".", params.topic),
                })
            })
            .collect();

        ToolResult::success(serde_json::json!({
            "topic": params.topic,
            "summary": format!("Synthesized findings on \"{}\".", params.topic),
            "findings": findings,
        }))
    }
}
