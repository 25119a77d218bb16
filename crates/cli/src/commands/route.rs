use globaliq_agent::router::KeywordSets;
use globaliq_core::config::{AppConfig, LoadOptions};

use crate::commands::CommandResult;

/// Keyword dry run. Utterances without a keyword hit would go to the LLM classifier, which this
/// command never calls.
pub fn run(text: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("route", "config_validation", error.to_string(), 2);
        }
    };

    let text = text.trim();
    if text.is_empty() {
        return CommandResult::failure("route", "invalid_input", "utterance must not be empty", 2);
    }

    match KeywordSets::from_config(&config.routing).match_utterance(text) {
        Some(decision) => CommandResult::success_with(
            "route",
            format!("keyword match routed to {}", decision.route),
            Some(decision),
        ),
        None => CommandResult::success(
            "route",
            "no keyword match; the LLM classifier would decide this route",
        ),
    }
}
