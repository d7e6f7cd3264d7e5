//! Intent classifier — decides casual-chat vs tool-requiring task vs
//! web-search vs deep-research for an incoming message. Deterministic and
//! synchronous; no LLM call.
//!
//! The word lists are bilingual (Spanish and English) and declared as
//! configuration data, not branching logic: they live in
//! `config/classifier.toml`, bundled into the binary via `include_str!`
//! and deserialized once at startup, with an env var letting a deployment
//! swap in its own file without a recompile.

use once_cell::sync::Lazy;
use serde::Deserialize;

const DEFAULT_CLASSIFIER_TOML: &str = include_str!("../config/classifier.toml");

/// Word lists the classifier matches against. Deserialized from a bundled
/// TOML default; `CLASSIFIER_CONFIG_PATH` overrides it with a user file of
/// the same shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub casual_only_phrases: Vec<String>,
    pub task_indicators: Vec<String>,
    pub command_patterns: Vec<String>,
    pub work_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CLASSIFIER_TOML).expect("bundled config/classifier.toml is valid")
    }
}

static CLASSIFIER_CONFIG: Lazy<ClassifierConfig> = Lazy::new(|| {
    let Ok(path) = std::env::var("CLASSIFIER_CONFIG_PATH") else {
        return ClassifierConfig::default();
    };
    match std::fs::read_to_string(&path).map(|raw| toml::from_str::<ClassifierConfig>(&raw)) {
        Ok(Ok(config)) => config,
        Ok(Err(e)) => {
            tracing::warn!("CLASSIFIER_CONFIG_PATH={path} is malformed ({e}), using bundled default");
            ClassifierConfig::default()
        }
        Err(e) => {
            tracing::warn!("could not read CLASSIFIER_CONFIG_PATH={path} ({e}), using bundled default");
            ClassifierConfig::default()
        }
    }
});

/// Result of intent classification: which path the orchestrator should
/// take for this message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationResult {
    Casual,
    Task { search_mode: SearchMode, message: String },
}

/// Typed result of stripping a `[WebSearch]`/`[DeepResearch]` string tag —
/// no tag strings propagate past classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    None,
    Web,
    Deep,
}

const WEB_SEARCH_PREFIX: &str = "[WebSearch]";
const DEEP_RESEARCH_PREFIX: &str = "[DeepResearch]";

/// True if the normalized message carries a lexical task indicator,
/// system-command pattern, or work-request pattern.
fn is_task_requiring_tools(message_lower: &str) -> bool {
    let config = &*CLASSIFIER_CONFIG;

    if config
        .casual_only_phrases
        .iter()
        .any(|phrase| phrase == message_lower.trim())
    {
        return false;
    }

    let has_task_indicator = config.task_indicators.iter().any(|i| message_lower.contains(i.as_str()));
    let has_command = config.command_patterns.iter().any(|c| message_lower.contains(c.as_str()));
    let has_work_pattern = config.work_patterns.iter().any(|p| message_lower.contains(p.as_str()));

    has_task_indicator || has_command || has_work_pattern
}

/// Strip a leading `[WebSearch]`/`[DeepResearch]` tag, if present, into a
/// typed `SearchMode` plus the remaining message text.
fn strip_search_mode(message: &str) -> (SearchMode, String) {
    if let Some(rest) = message.strip_prefix(WEB_SEARCH_PREFIX) {
        return (SearchMode::Web, rest.trim().to_string());
    }
    if let Some(rest) = message.strip_prefix(DEEP_RESEARCH_PREFIX) {
        return (SearchMode::Deep, rest.trim().to_string());
    }
    (SearchMode::None, message.to_string())
}

/// Classify an incoming message. A forced search-mode prefix always wins;
/// otherwise falls back to casual/task-indicator lexical matching.
pub fn classify(raw_message: &str) -> ClassificationResult {
    let (search_mode, message) = strip_search_mode(raw_message);

    if !matches!(search_mode, SearchMode::None) {
        return ClassificationResult::Task { search_mode, message };
    }

    let message_lower = message.to_lowercase();
    if is_task_requiring_tools(&message_lower) {
        ClassificationResult::Task {
            search_mode: SearchMode::None,
            message,
        }
    } else {
        ClassificationResult::Casual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_casual_phrase_is_chat_path() {
        assert_eq!(classify("hola"), ClassificationResult::Casual);
        assert_eq!(classify("  Thanks  "), ClassificationResult::Casual);
    }

    #[test]
    fn casual_phrase_with_extra_content_is_task_path() {
        assert_ne!(classify("hola, ejecuta ls en /app"), ClassificationResult::Casual);
    }

    #[test]
    fn forced_web_search_prefix_strips_tag() {
        let result = classify("[WebSearch] latest LLM benchmarks");
        assert_eq!(
            result,
            ClassificationResult::Task {
                search_mode: SearchMode::Web,
                message: "latest LLM benchmarks".to_string(),
            }
        );
    }

    #[test]
    fn shell_command_pattern_triggers_task_path() {
        let result = classify("ejecuta ls en /app");
        assert!(matches!(
            result,
            ClassificationResult::Task { search_mode: SearchMode::None, .. }
        ));
    }

    #[test]
    fn unmatched_message_defaults_to_casual() {
        assert_eq!(classify("qwertyuiop"), ClassificationResult::Casual);
    }

    #[test]
    fn bundled_config_parses_and_is_nonempty() {
        let config = ClassifierConfig::default();
        assert!(!config.casual_only_phrases.is_empty());
        assert!(!config.task_indicators.is_empty());
    }
}
