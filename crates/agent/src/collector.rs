use std::sync::Arc;
use std::time::Duration;

use globaliq_core::audit::{AuditContext, AuditSink};
use globaliq_core::domain::collection::{
    CollectionState, CollectionStatus, ConfirmedFields, Extraction, Speaker, Turn,
};
use globaliq_core::domain::route::{clip_confidence, Route};
use globaliq_core::domain::schema::{FieldSpec, RouteSchema, SchemaRegistry};
use globaliq_core::errors::{ApplicationError, DomainError};
use globaliq_core::flows::{FlowContext, FlowEngine, FlowEvent, SlotFillingFlow};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::confirmation::{ReplyIntent, ReplyTokens};
use crate::llm::{extract_json_object, LlmClient};

const HISTORY_WINDOW: usize = 3;
const EXTRACTION_ATTEMPTS: usize = 2;

const REPHRASE_PROMPT: &str =
    "Sorry, I couldn't make sense of that. Could you rephrase it with the details you have?";
const CANCELLED_PROMPT: &str =
    "Okay, I've cancelled this request. Ask me anything whenever you want to start again.";
const CHANGE_PROMPT: &str = "No problem. Which details should I change?";

/// What the collector says back after one turn.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectorReply {
    FollowUp { prompt: String, missing: Vec<String> },
    Confirmation { prompt: String },
    Confirmed { prompt: String, fields: ConfirmedFields },
    Cancelled { prompt: String },
    Rephrase { prompt: String },
}

impl CollectorReply {
    pub fn prompt(&self) -> &str {
        match self {
            Self::FollowUp { prompt, .. }
            | Self::Confirmation { prompt }
            | Self::Confirmed { prompt, .. }
            | Self::Cancelled { prompt }
            | Self::Rephrase { prompt } => prompt,
        }
    }
}

pub struct Collector {
    extractor: Arc<dyn LlmClient>,
    schemas: Arc<SchemaRegistry>,
    tokens: ReplyTokens,
    engine: FlowEngine<SlotFillingFlow>,
    extraction_timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl Collector {
    pub fn new(
        extractor: Arc<dyn LlmClient>,
        schemas: Arc<SchemaRegistry>,
        tokens: ReplyTokens,
        extraction_timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            extractor,
            schemas,
            tokens,
            engine: FlowEngine::default(),
            extraction_timeout,
            audit,
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn start(&self, route: Route) -> Result<CollectionState, ApplicationError> {
        Ok(CollectionState::new(self.schema(route)?))
    }

    /// Runs one turn against a copy of `state`. The caller commits the returned state.
    pub async fn collect(
        &self,
        state: &CollectionState,
        utterance: &str,
        audit: &AuditContext,
    ) -> Result<(CollectionState, CollectorReply), ApplicationError> {
        let schema = self.schema(state.route())?;
        if state.status().is_terminal() {
            return Err(DomainError::UnexpectedCollectionStatus {
                expected: CollectionStatus::Collecting,
                actual: state.status(),
            }
            .into());
        }

        let intent = self.tokens.classify(utterance);
        let mut next = state.clone();

        if intent == ReplyIntent::Cancel {
            next.record_turn(Speaker::User, utterance);
            self.transition(&mut next, FlowEvent::CancelRequested, Vec::new(), audit)?;
            return Ok(self.reply(next, CollectorReply::Cancelled { prompt: CANCELLED_PROMPT.into() }));
        }

        let reply = match state.status() {
            CollectionStatus::AwaitingConfirmation if intent == ReplyIntent::Affirmative => {
                next.record_turn(Speaker::User, utterance);
                self.transition(&mut next, FlowEvent::Affirmed, Vec::new(), audit)?;
                let fields = next.freeze(schema)?;
                CollectorReply::Confirmed {
                    prompt: format!("Thanks, running the {} analysis now.", schema.route()),
                    fields,
                }
            }
            CollectionStatus::AwaitingConfirmation if intent == ReplyIntent::Negative => {
                next.record_turn(Speaker::User, utterance);
                self.transition(&mut next, FlowEvent::CorrectionReceived, Vec::new(), audit)?;
                CollectorReply::FollowUp { prompt: CHANGE_PROMPT.into(), missing: Vec::new() }
            }
            status => {
                let extraction = match self
                    .extract_information(schema, utterance, state.recent_turns(HISTORY_WINDOW), audit)
                    .await
                {
                    Ok(extraction) => extraction,
                    Err(error) => {
                        warn!(
                            event_name = "collector.extraction_abandoned",
                            correlation_id = %audit.correlation_id,
                            route = schema.route().as_str(),
                            error = %error,
                            "extraction failed twice, asking the user to rephrase"
                        );
                        return Ok((
                            state.clone(),
                            CollectorReply::Rephrase { prompt: REPHRASE_PROMPT.into() },
                        ));
                    }
                };

                next.record_turn(Speaker::User, utterance);
                match status {
                    CollectionStatus::Init => {
                        self.transition(&mut next, FlowEvent::UtteranceReceived, Vec::new(), audit)?
                    }
                    CollectionStatus::AwaitingConfirmation => self.transition(
                        &mut next,
                        FlowEvent::CorrectionReceived,
                        Vec::new(),
                        audit,
                    )?,
                    _ => {}
                }
                let changed = next.merge(&extraction);
                debug!(
                    event_name = "collector.merged",
                    correlation_id = %audit.correlation_id,
                    changed,
                    "extraction merged into collection state"
                );
                self.evaluate(schema, &mut next, audit)?
            }
        };

        Ok(self.reply(next, reply))
    }

    /// Calls the extraction backend, retrying a failed attempt exactly once.
    pub async fn extract_information(
        &self,
        schema: &RouteSchema,
        utterance: &str,
        history: &[Turn],
        audit: &AuditContext,
    ) -> Result<Extraction, ApplicationError> {
        let prompt = extraction_prompt(schema, utterance, history);
        let mut last_error = String::new();

        for attempt in 1..=EXTRACTION_ATTEMPTS {
            let outcome =
                tokio::time::timeout(self.extraction_timeout, self.extractor.complete(&prompt)).await;
            let result = match outcome {
                Ok(Ok(completion)) => parse_extraction(schema, &completion),
                Ok(Err(error)) => Err(format!("extraction call failed: {error}")),
                Err(_) => Err(format!(
                    "extraction call exceeded {}ms",
                    self.extraction_timeout.as_millis()
                )),
            };

            match result {
                Ok(extraction) => {
                    info!(
                        event_name = "collector.extracted",
                        correlation_id = %audit.correlation_id,
                        route = schema.route().as_str(),
                        attempt,
                        extracted = extraction.extracted_count(),
                        "fields extracted"
                    );
                    return Ok(extraction);
                }
                Err(detail) => {
                    warn!(
                        event_name = "collector.extraction_failed",
                        correlation_id = %audit.correlation_id,
                        route = schema.route().as_str(),
                        attempt,
                        error = %detail,
                        "extraction attempt failed"
                    );
                    last_error = detail;
                }
            }
        }

        Err(ApplicationError::ExtractionFailure { route: schema.route(), detail: last_error })
    }

    fn evaluate(
        &self,
        schema: &RouteSchema,
        state: &mut CollectionState,
        audit: &AuditContext,
    ) -> Result<CollectorReply, ApplicationError> {
        let missing = state
            .missing_required(schema)
            .into_iter()
            .map(|field| field.name.clone())
            .collect::<Vec<_>>();

        if missing.is_empty() {
            self.transition(state, FlowEvent::RequiredFieldsCollected, Vec::new(), audit)?;
            Ok(CollectorReply::Confirmation { prompt: generate_confirmation(schema, state) })
        } else {
            self.transition(state, FlowEvent::FieldsMissing, missing.clone(), audit)?;
            Ok(CollectorReply::FollowUp { prompt: generate_follow_up(schema, state), missing })
        }
    }

    fn transition(
        &self,
        state: &mut CollectionState,
        event: FlowEvent,
        missing_required_fields: Vec<String>,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let outcome = self.engine.apply_with_audit(
            &state.status(),
            &event,
            &FlowContext { missing_required_fields },
            self.audit.as_ref(),
            audit,
        )
        .map_err(DomainError::from)?;
        state.apply(&outcome)?;

        info!(
            event_name = "collector.transition",
            correlation_id = %audit.correlation_id,
            route = state.route().as_str(),
            from = ?outcome.from,
            to = ?outcome.to,
            event = ?outcome.event,
            "collection state advanced"
        );
        Ok(())
    }

    fn reply(
        &self,
        mut state: CollectionState,
        reply: CollectorReply,
    ) -> (CollectionState, CollectorReply) {
        state.record_turn(Speaker::Assistant, reply.prompt());
        (state, reply)
    }

    fn schema(&self, route: Route) -> Result<&RouteSchema, ApplicationError> {
        self.schemas.get(route).ok_or_else(|| {
            ApplicationError::Configuration(format!("no schema registered for route `{route}`"))
        })
    }
}

/// Opening prompt shown when collection for a route begins.
pub fn start_prompt(schema: &RouteSchema) -> String {
    let intro = match schema.route() {
        Route::Compensation => "I can estimate a relocation compensation package.",
        Route::Policy => "I can check how global mobility policy applies to this move.",
        Route::Both | Route::Guidance => "I can help with that.",
    };
    let mut prompt = format!("{intro} These details help:");
    for field in schema.fields() {
        prompt.push_str(&format!("\n- {}", describe(field)));
    }
    prompt.push_str("\nShare whatever you have and I'll ask for anything missing.");
    prompt
}

/// Names exactly the required fields that are still null.
pub fn generate_follow_up(schema: &RouteSchema, state: &CollectionState) -> String {
    let missing = state.missing_required(schema);
    let mut prompt = String::from("Thanks. To continue I still need:");
    for field in missing {
        prompt.push_str(&format!("\n- {}", describe(field)));
    }
    prompt
}

pub fn generate_confirmation(schema: &RouteSchema, state: &CollectionState) -> String {
    let mut prompt = String::from("Here's what I have:");
    for field in schema.fields() {
        let value = state.value(&field.name).unwrap_or("not provided");
        prompt.push_str(&format!("\n- {}: {value}", label(&field.name)));
    }
    prompt.push_str("\nIs this correct? Reply yes to proceed, or tell me what to change.");
    prompt
}

fn describe(field: &FieldSpec) -> String {
    if field.description.trim().is_empty() {
        label(&field.name)
    } else {
        format!("{} ({})", label(&field.name), field.description)
    }
}

fn label(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut characters = spaced.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().chain(characters).collect(),
        None => String::new(),
    }
}

fn extraction_prompt(schema: &RouteSchema, utterance: &str, history: &[Turn]) -> String {
    let mut prompt = format!(
        "Extract details for a {} request from the user's latest message.\nFields:\n",
        schema.route()
    );
    for field in schema.fields() {
        prompt.push_str(&format!("- {}: {}\n", field.name, field.description));
    }
    if !history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in history {
            let speaker = match turn.speaker {
                Speaker::User => "user",
                Speaker::Assistant => "assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", turn.text));
        }
    }
    prompt.push_str(&format!(
        "\nLatest message: {utterance}\n\nRespond with JSON only: {{\"extracted_fields\": \
         {{<field>: <string value or null>}}, \"confidence\": {{<field>: <number 0-1>}}}}. Use \
         null for anything the user did not state. Do not invent fields."
    ));
    prompt
}

fn parse_extraction(schema: &RouteSchema, completion: &str) -> Result<Extraction, String> {
    let object = extract_json_object(completion)
        .ok_or_else(|| "extraction response contained no JSON object".to_string())?;
    let fields = object
        .get("extracted_fields")
        .and_then(Value::as_object)
        .ok_or_else(|| "extraction response is missing `extracted_fields`".to_string())?;

    let mut extraction = Extraction::default();
    for field in schema.fields() {
        extraction.values.insert(field.name.clone(), None);
    }
    for (name, value) in fields {
        if !schema.contains(name) {
            debug!(event_name = "collector.unknown_field_dropped", field = %name, "dropped field");
            continue;
        }
        extraction.values.insert(name.clone(), normalize_value(value));
    }
    if let Some(confidence) = object.get("confidence").and_then(Value::as_object) {
        for (name, score) in confidence {
            if let (true, Some(score)) = (schema.contains(name), score.as_f64()) {
                extraction.confidence.insert(name.clone(), clip_confidence(score));
            }
        }
    }
    Ok(extraction)
}

fn normalize_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    let placeholder = matches!(text.to_ascii_lowercase().as_str(), "" | "null" | "none" | "unknown");
    (!placeholder).then_some(text)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use globaliq_core::audit::{AuditContext, InMemoryAuditSink};
    use globaliq_core::domain::collection::{CollectionState, CollectionStatus};
    use globaliq_core::domain::route::Route;
    use globaliq_core::domain::schema::{RouteSchema, SchemaRegistry};
    use globaliq_core::errors::ApplicationError;
    use serde_json::json;

    use super::{generate_follow_up, start_prompt, Collector, CollectorReply};
    use crate::confirmation::ReplyTokens;
    use crate::llm::LlmClient;

    /// Replays queued completions in order; `Err` entries simulate backend failures.
    #[derive(Default)]
    struct QueuedExtractor {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl QueuedExtractor {
        fn with(replies: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), ..Self::default() })
        }
    }

    #[async_trait]
    impl LlmClient for QueuedExtractor {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            let next = self.replies.lock().expect("replies lock").pop_front();
            match next {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no scripted reply left")),
            }
        }
    }

    fn collector(extractor: Arc<QueuedExtractor>) -> Collector {
        Collector::new(
            extractor,
            Arc::new(SchemaRegistry::builtin()),
            ReplyTokens::default(),
            Duration::from_secs(5),
            Arc::new(InMemoryAuditSink::default()),
        )
    }

    fn context() -> AuditContext {
        AuditContext::new(Some("session-1".to_string()), Some(Route::Compensation), "req-1")
    }

    fn scenario_a_reply() -> Result<String, String> {
        Ok(json!({
            "extracted_fields": {
                "origin_location": "Chicago",
                "destination_location": "Mumbai",
                "current_salary": "100k",
                "assignment_duration": "2 years",
                "job_level": null,
                "family_size": null,
                "housing_preference": null
            },
            "confidence": { "origin_location": 0.95 }
        })
        .to_string())
    }

    fn scenario_b_reply() -> Result<String, String> {
        Ok(json!({
            "extracted_fields": {
                "job_level": "Senior Engineer",
                "family_size": "3",
                "housing_preference": "company housing"
            }
        })
        .to_string())
    }

    async fn awaiting_confirmation(collector: &Collector) -> CollectionState {
        let state = collector.start(Route::Compensation).expect("schema");
        let (state, _) = collector
            .collect(&state, "moving someone from chicago to mumbai making 100k for 2 years", &context())
            .await
            .expect("scenario a");
        let (state, _) = collector
            .collect(&state, "Senior Engineer, family of 3, company housing", &context())
            .await
            .expect("scenario b");
        state
    }

    #[tokio::test]
    async fn scenario_a_partial_extraction_keeps_collecting() {
        let extractor = QueuedExtractor::with(vec![scenario_a_reply()]);
        let collector = collector(Arc::clone(&extractor));
        let state = collector.start(Route::Compensation).expect("schema");

        let (state, reply) = collector
            .collect(&state, "moving someone from chicago to mumbai making 100k for 2 years", &context())
            .await
            .expect("turn succeeds");

        assert_eq!(state.status(), CollectionStatus::Collecting);
        assert_eq!(state.value("origin_location"), Some("Chicago"));
        assert_eq!(state.value("destination_location"), Some("Mumbai"));
        assert_eq!(state.value("current_salary"), Some("100k"));
        assert_eq!(state.value("assignment_duration"), Some("2 years"));
        assert_eq!(state.value("job_level"), None);
        assert_eq!(state.value("family_size"), None);
        assert_eq!(state.value("housing_preference"), None);

        match reply {
            CollectorReply::FollowUp { prompt, missing } => {
                assert_eq!(missing, vec!["job_level", "family_size", "housing_preference"]);
                assert!(prompt.contains("Job level"));
                assert!(!prompt.contains("Origin location"));
            }
            other => panic!("expected follow-up, got {other:?}"),
        }
        assert_eq!(state.turn_history().len(), 2);
    }

    #[tokio::test]
    async fn scenario_b_completing_fields_requests_confirmation() {
        let extractor = QueuedExtractor::with(vec![scenario_a_reply(), scenario_b_reply()]);
        let collector = collector(Arc::clone(&extractor));
        let state = awaiting_confirmation(&collector).await;

        assert_eq!(state.status(), CollectionStatus::AwaitingConfirmation);
        assert!(state.fields().values().all(Option::is_some));
        let last = state.turn_history().last().expect("assistant turn");
        assert!(last.text.contains("Housing preference: company housing"));
        assert!(last.text.contains("Origin location: Chicago"));

        let prompts = extractor.prompts.lock().expect("prompts lock");
        assert!(prompts[1].contains("Recent conversation"));
        assert!(prompts[1].contains("chicago to mumbai"));
    }

    #[tokio::test]
    async fn scenario_c_affirmation_freezes_fields() {
        let extractor = QueuedExtractor::with(vec![scenario_a_reply(), scenario_b_reply()]);
        let collector = collector(Arc::clone(&extractor));
        let state = awaiting_confirmation(&collector).await;

        let (state, reply) = collector.collect(&state, "yes", &context()).await.expect("confirm");

        assert_eq!(state.status(), CollectionStatus::Complete);
        let CollectorReply::Confirmed { fields, .. } = reply else {
            panic!("expected confirmed fields");
        };
        assert_eq!(fields.route(), Route::Compensation);
        assert_eq!(fields.values().len(), 7);
        assert_eq!(fields.get("origin_location"), Some("Chicago"));
        assert_eq!(fields.get("job_level"), Some("Senior Engineer"));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2, "affirmation needs no extraction");
    }

    #[tokio::test]
    async fn correction_during_confirmation_is_merged_last_write_wins() {
        let correction = Ok(json!({ "extracted_fields": { "current_salary": "120k" } }).to_string());
        let extractor =
            QueuedExtractor::with(vec![scenario_a_reply(), scenario_b_reply(), correction]);
        let collector = collector(extractor);
        let state = awaiting_confirmation(&collector).await;

        let (state, reply) = collector
            .collect(&state, "actually the salary is 120k", &context())
            .await
            .expect("correction");

        assert_eq!(state.status(), CollectionStatus::AwaitingConfirmation);
        assert_eq!(state.value("current_salary"), Some("120k"));
        assert_eq!(state.value("origin_location"), Some("Chicago"));
        assert!(matches!(reply, CollectorReply::Confirmation { ref prompt } if prompt.contains("120k")));
    }

    #[tokio::test]
    async fn pure_negative_asks_what_to_change() {
        let extractor = QueuedExtractor::with(vec![scenario_a_reply(), scenario_b_reply()]);
        let collector = collector(Arc::clone(&extractor));
        let state = awaiting_confirmation(&collector).await;

        let (state, reply) = collector.collect(&state, "no", &context()).await.expect("negative");

        assert_eq!(state.status(), CollectionStatus::Collecting);
        assert!(matches!(reply, CollectorReply::FollowUp { ref missing, .. } if missing.is_empty()));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_is_terminal_from_any_open_state() {
        let collector = collector(QueuedExtractor::with(vec![scenario_a_reply()]));
        let state = collector.start(Route::Compensation).expect("schema");
        let (state, _) = collector
            .collect(&state, "moving from chicago to mumbai", &context())
            .await
            .expect("first turn");

        let (state, reply) = collector.collect(&state, "cancel", &context()).await.expect("cancel");
        assert_eq!(state.status(), CollectionStatus::Cancelled);
        assert!(matches!(reply, CollectorReply::Cancelled { .. }));

        let error = collector.collect(&state, "hello?", &context()).await.expect_err("terminal");
        assert!(matches!(error, ApplicationError::Domain(_)));
    }

    #[tokio::test]
    async fn extraction_is_retried_once_before_succeeding() {
        let extractor = QueuedExtractor::with(vec![Ok("not json".to_string()), scenario_a_reply()]);
        let collector = collector(Arc::clone(&extractor));
        let state = collector.start(Route::Compensation).expect("schema");

        let (state, _) =
            collector.collect(&state, "chicago to mumbai", &context()).await.expect("turn");

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.value("origin_location"), Some("Chicago"));
    }

    #[tokio::test]
    async fn second_extraction_failure_leaves_state_untouched() {
        let extractor =
            QueuedExtractor::with(vec![Err("backend down".to_string()), Ok("{}".to_string())]);
        let collector = collector(Arc::clone(&extractor));
        let state = collector.start(Route::Compensation).expect("schema");

        let (next, reply) =
            collector.collect(&state, "chicago to mumbai", &context()).await.expect("turn");

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(next, state);
        assert!(matches!(reply, CollectorReply::Rephrase { .. }));
    }

    #[tokio::test]
    async fn unknown_fields_from_the_backend_are_dropped() {
        let reply = Ok(json!({
            "extracted_fields": { "origin_country": "USA", "favorite_color": "blue" }
        })
        .to_string());
        let collector = collector(QueuedExtractor::with(vec![reply]));
        let state = collector.start(Route::Policy).expect("schema");

        let (state, _) = collector.collect(&state, "from the USA", &context()).await.expect("turn");

        assert_eq!(state.value("origin_country"), Some("USA"));
        assert!(!state.fields().contains_key("favorite_color"));
        assert_eq!(state.fields().len(), RouteSchema::policy().fields().len());
    }

    #[test]
    fn follow_up_never_mentions_filled_fields() {
        let schema = RouteSchema::policy();
        let mut state = CollectionState::new(&schema);
        state.merge(&globaliq_core::Extraction {
            values: [("origin_country".to_string(), Some("USA".to_string()))].into_iter().collect(),
            ..Default::default()
        });

        let prompt = generate_follow_up(&schema, &state);
        assert!(!prompt.contains("Origin country"));
        assert!(prompt.contains("Destination country"));
        assert!(prompt.contains("Job title"));
    }

    #[test]
    fn start_prompt_lists_every_field() {
        let schema = RouteSchema::compensation();
        let prompt = start_prompt(&schema);
        assert!(prompt.starts_with("I can estimate a relocation compensation package."));
        assert_eq!(prompt.matches("\n- ").count(), schema.fields().len());
    }
}
