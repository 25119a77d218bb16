use std::sync::Arc;
use std::time::Duration;

use globaliq_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use globaliq_core::config::RoutingConfig;
use globaliq_core::domain::route::{Route, RoutingDecision};
use globaliq_core::errors::ApplicationError;
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::{extract_json_object, LlmClient};

/// Confidence assigned when the classifier names a valid route but gives no score.
const UNSCORED_MODEL_CONFIDENCE: f64 = 0.5;

/// Keyword and phrase sets for the fast path. Each entry is stored pre-tokenized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordSets {
    policy: Vec<Vec<String>>,
    compensation: Vec<Vec<String>>,
    guidance: Vec<Vec<String>>,
}

impl KeywordSets {
    pub fn new(policy: &[String], compensation: &[String], guidance: &[String]) -> Self {
        Self {
            policy: tokenize_all(policy),
            compensation: tokenize_all(compensation),
            guidance: tokenize_all(guidance),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(&config.policy_keywords, &config.compensation_keywords, &config.guidance_phrases)
    }

    /// Fast path only. `None` means the utterance needs classification.
    pub fn match_utterance(&self, utterance: &str) -> Option<RoutingDecision> {
        let words = tokenize(utterance);
        let policy = matches_any(&words, &self.policy);
        let compensation = matches_any(&words, &self.compensation);

        let route = match (policy, compensation) {
            (true, true) => Route::Both,
            (true, false) => Route::Policy,
            (false, true) => Route::Compensation,
            (false, false) if matches_any(&words, &self.guidance) => Route::Guidance,
            (false, false) => return None,
        };
        Some(RoutingDecision::keyword(route))
    }
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self::from_config(&globaliq_core::config::AppConfig::default().routing)
    }
}

pub struct Router {
    keywords: KeywordSets,
    classifier: Arc<dyn LlmClient>,
    classification_timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl Router {
    pub fn new(
        keywords: KeywordSets,
        classifier: Arc<dyn LlmClient>,
        classification_timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { keywords, classifier, classification_timeout, audit }
    }

    pub fn keywords(&self) -> &KeywordSets {
        &self.keywords
    }

    /// Always returns a decision; classification failures degrade to guidance.
    pub async fn route(
        &self,
        utterance: &str,
        hint: Option<Route>,
        audit: &AuditContext,
    ) -> RoutingDecision {
        let (decision, unresolved) = match self.keywords.match_utterance(utterance) {
            Some(decision) => (decision, None),
            None => match self.classify(utterance, hint).await {
                Ok(decision) => (decision, None),
                Err(error) => {
                    warn!(
                        event_name = "routing.unresolved",
                        correlation_id = %audit.correlation_id,
                        error_kind = error.kind(),
                        error = %error,
                        "no confident route, defaulting to guidance"
                    );
                    (RoutingDecision::unresolved(), Some(error.kind()))
                }
            },
        };

        info!(
            event_name = "routing.decision",
            correlation_id = %audit.correlation_id,
            route = decision.route.as_str(),
            method = ?decision.method,
            confidence = decision.confidence,
            "utterance routed"
        );
        let mut event = AuditEvent::from_context(
            audit,
            "routing.decision",
            AuditCategory::Routing,
            AuditOutcome::Success,
        )
        .with_metadata("route", decision.route.as_str())
        .with_metadata("method", format!("{:?}", decision.method))
        .with_metadata("confidence", decision.confidence.to_string());
        if let Some(kind) = unresolved {
            event = event.with_metadata("error_kind", kind);
        }
        self.audit.emit(event);
        decision
    }

    async fn classify(
        &self,
        utterance: &str,
        hint: Option<Route>,
    ) -> Result<RoutingDecision, ApplicationError> {
        let prompt = classification_prompt(utterance, hint);
        let completion =
            tokio::time::timeout(self.classification_timeout, self.classifier.complete(&prompt))
                .await
                .map_err(|_| ApplicationError::Timeout {
                    stage: "classification",
                    deadline_ms: self.classification_timeout.as_millis(),
                })?
                .map_err(|error| {
                    ApplicationError::RoutingAmbiguous(format!("classifier call failed: {error}"))
                })?;

        parse_classification(&completion).ok_or_else(|| {
            ApplicationError::RoutingAmbiguous("classifier answered outside the route set".into())
        })
    }
}

fn classification_prompt(utterance: &str, hint: Option<Route>) -> String {
    let mut prompt = String::from(
        "Classify the user's request into exactly one of these routes:\n",
    );
    for route in Route::ALL {
        prompt.push_str(&format!("- {}: {}\n", route.as_str(), route.description()));
    }
    if let Some(hint) = hint {
        prompt.push_str(&format!(
            "\nThe previous request in this conversation was routed to `{}`. Use it as context \
             only.\n",
            hint.as_str()
        ));
    }
    prompt.push_str(&format!(
        "\nRequest: {utterance}\n\nRespond with JSON only: \
         {{\"route\": \"<one of the route names>\", \"confidence\": <number between 0 and 1>}}"
    ));
    prompt
}

fn parse_classification(completion: &str) -> Option<RoutingDecision> {
    if let Some(object) = extract_json_object(completion) {
        let route = object.get("route").and_then(Value::as_str)?.parse::<Route>().ok()?;
        let confidence =
            object.get("confidence").and_then(Value::as_f64).unwrap_or(UNSCORED_MODEL_CONFIDENCE);
        return Some(RoutingDecision::model(route, confidence));
    }

    completion
        .parse::<Route>()
        .ok()
        .map(|route| RoutingDecision::model(route, UNSCORED_MODEL_CONFIDENCE))
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn tokenize_all(entries: &[String]) -> Vec<Vec<String>> {
    entries.iter().map(|entry| tokenize(entry)).filter(|words| !words.is_empty()).collect()
}

fn matches_any(words: &[String], entries: &[Vec<String>]) -> bool {
    entries.iter().any(|entry| contains_sequence(words, entry))
}

pub(crate) fn contains_sequence(words: &[String], sequence: &[String]) -> bool {
    !sequence.is_empty() && words.windows(sequence.len()).any(|window| window == sequence)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use globaliq_core::audit::{AuditContext, InMemoryAuditSink};
    use globaliq_core::domain::route::{Route, RoutingDecision, RoutingMethod};

    use super::{KeywordSets, Router};
    use crate::llm::LlmClient;

    struct ScriptedClassifier {
        reply: Result<String, String>,
        delay: Duration,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClassifier {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self { reply: Err("backend down".to_string()), ..Self::replying("") }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClassifier {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map_err(|message| anyhow!(message))
        }
    }

    fn router(classifier: Arc<ScriptedClassifier>, sink: InMemoryAuditSink) -> Router {
        Router::new(KeywordSets::default(), classifier, Duration::from_secs(5), Arc::new(sink))
    }

    fn context() -> AuditContext {
        AuditContext::new(Some("session-1".to_string()), None, "req-1")
    }

    #[test]
    fn single_keyword_set_wins_with_full_confidence() {
        let keywords = KeywordSets::default();
        let decision =
            keywords.match_utterance("What are the visa rules for Germany?").expect("keyword hit");
        assert_eq!(decision, RoutingDecision::keyword(Route::Policy));
        assert_eq!(decision.confidence, 1.0);

        let decision = keywords.match_utterance("What SALARY should I offer?").expect("keyword hit");
        assert_eq!(decision.route, Route::Compensation);
        assert_eq!(decision.method, RoutingMethod::Keyword);
    }

    #[test]
    fn matching_both_keyword_sets_routes_to_both() {
        let decision = KeywordSets::default()
            .match_utterance("What's the cheapest compliant way to relocate a senior manager?")
            .expect("keyword hit");
        assert_eq!(decision.route, Route::Both);
        assert_eq!(decision.method, RoutingMethod::Keyword);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let keywords = KeywordSets::default();
        assert!(keywords.match_utterance("the payroll team called").is_none());
        assert!(keywords.match_utterance("paying it forward").is_none());
    }

    #[test]
    fn phrases_match_contiguous_word_sequences() {
        let keywords = KeywordSets::default();
        let decision =
            keywords.match_utterance("how does the cost-of-living work?").expect("phrase hit");
        assert_eq!(decision.route, Route::Compensation);
        assert!(keywords.match_utterance("the cost of their living room").is_none());
    }

    #[test]
    fn guidance_phrases_only_decide_without_domain_keywords() {
        let keywords = KeywordSets::default();
        assert_eq!(
            keywords.match_utterance("What can you do?").map(|decision| decision.route),
            Some(Route::Guidance)
        );
        assert_eq!(
            keywords.match_utterance("help me with a visa question").map(|decision| decision.route),
            Some(Route::Policy)
        );
    }

    #[tokio::test]
    async fn keyword_hits_never_call_the_classifier() {
        let classifier = Arc::new(ScriptedClassifier::replying("{\"route\": \"policy\"}"));
        let sink = InMemoryAuditSink::default();
        let decision = router(Arc::clone(&classifier), sink.clone())
            .route("salary for a move to Tokyo", None, &context())
            .await;

        assert_eq!(decision.route, Route::Compensation);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "routing.decision");
        assert_eq!(events[0].metadata.get("route").map(String::as_str), Some("compensation"));
    }

    #[tokio::test]
    async fn classification_result_is_clipped_and_tagged_as_model() {
        let classifier = Arc::new(ScriptedClassifier::replying(
            "```json\n{\"route\": \"policy\", \"confidence\": 1.4}\n```",
        ));
        let decision = router(Arc::clone(&classifier), InMemoryAuditSink::default())
            .route("We are sending Dana abroad next spring", None, &context())
            .await;

        assert_eq!(decision, RoutingDecision::model(Route::Policy, 1.0));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classifier_answers_outside_the_route_set_default_to_guidance() {
        let classifier =
            Arc::new(ScriptedClassifier::replying("{\"route\": \"payroll\", \"confidence\": 0.9}"));
        let sink = InMemoryAuditSink::default();
        let decision = router(classifier, sink.clone())
            .route("something unusual", None, &context())
            .await;

        assert_eq!(decision, RoutingDecision::unresolved());
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata.get("route").map(String::as_str), Some("guidance_fallback"));
        assert_eq!(
            events[0].metadata.get("error_kind").map(String::as_str),
            Some("routing_ambiguous")
        );
    }

    #[tokio::test]
    async fn classifier_failure_defaults_to_guidance() {
        let decision = router(Arc::new(ScriptedClassifier::failing()), InMemoryAuditSink::default())
            .route("something unusual", None, &context())
            .await;

        assert_eq!(decision.route, Route::Guidance);
        assert_eq!(decision.method, RoutingMethod::Model);
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_timeout_defaults_to_guidance() {
        let classifier = Arc::new(ScriptedClassifier {
            delay: Duration::from_secs(60),
            ..ScriptedClassifier::replying("{\"route\": \"policy\", \"confidence\": 0.9}")
        });
        let sink = InMemoryAuditSink::default();
        let decision = router(classifier, sink.clone())
            .route("something unusual", None, &context())
            .await;

        assert_eq!(decision, RoutingDecision::unresolved());
        assert_eq!(
            sink.events()[0].metadata.get("error_kind").map(String::as_str),
            Some("timeout")
        );
    }

    #[tokio::test]
    async fn prior_route_hint_is_passed_as_context() {
        let classifier = Arc::new(ScriptedClassifier::replying("compensation"));
        let decision = router(Arc::clone(&classifier), InMemoryAuditSink::default())
            .route("and for her spouse?", Some(Route::Compensation), &context())
            .await;

        assert_eq!(decision.route, Route::Compensation);
        let prompts = classifier.prompts.lock().expect("prompts lock");
        assert!(prompts[0].contains("previous request in this conversation was routed to `compensation`"));
    }
}
