use std::sync::Arc;

use chrono::Utc;
use globaliq_core::domain::collection::ConfirmedFields;
use globaliq_core::domain::route::clip_confidence;
use globaliq_core::domain::service::ServiceId;
use globaliq_core::errors::ApplicationError;
use serde_json::{json, Map, Value};

use crate::llm::{extract_json_object, LlmClient};
use crate::orchestrator::contract::{confidence_section, primary_section};

pub const FALLBACK_MODEL_VERSION: &str = "fallback";
const FALLBACK_METHODOLOGY: &str = "general-purpose completion fallback";
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Answers on behalf of an unavailable service, shaped like that service's response.
pub struct FallbackResponder {
    llm: Arc<dyn LlmClient>,
}

impl FallbackResponder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn respond(
        &self,
        service: ServiceId,
        fields: &ConfirmedFields,
    ) -> Result<Value, ApplicationError> {
        let prompt = fallback_prompt(service, fields);
        let raw = self.llm.complete(&prompt).await.map_err(|error| {
            ApplicationError::ServiceUnavailable {
                service: "fallback".to_string(),
                detail: format!("{error:#}"),
            }
        })?;
        Ok(reshape(service, &raw))
    }
}

fn fallback_prompt(service: ServiceId, fields: &ConfirmedFields) -> String {
    let task = match service {
        ServiceId::Compensation => {
            "Estimate the compensation package for this international assignment. \
             Cover base salary adjustment, cost of living, housing, and hardship allowances."
        }
        ServiceId::Policy => {
            "Analyse the immigration, visa, tax, and compliance considerations for this \
             international assignment."
        }
    };
    format!(
        "{task}\n\nAssignment details (JSON):\n{details}\n\n\
         Respond with a single JSON object with keys `{primary}` (an object) and \
         `{confidence}` ({confidence_shape}, every score between 0 and 1).",
        details = fields.to_json_body(),
        primary = primary_section(service),
        confidence = confidence_section(service),
        confidence_shape = match service {
            ServiceId::Compensation => "an object of scores",
            ServiceId::Policy => "a score",
        },
    )
}

/// Coerces free-form completion text into the service's response sections.
pub(crate) fn reshape(service: ServiceId, raw: &str) -> Value {
    let parsed = extract_json_object(raw).and_then(|value| match value {
        Value::Object(map) => Some(map),
        _ => None,
    });
    let primary_key = primary_section(service);
    let confidence_key = confidence_section(service);

    let primary = match &parsed {
        Some(map) => match map.get(primary_key) {
            Some(Value::Object(section)) => Value::Object(section.clone()),
            _ => {
                let rest = map
                    .iter()
                    .filter(|(key, _)| key.as_str() != confidence_key && key.as_str() != "metadata")
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect::<Map<_, _>>();
                if rest.is_empty() {
                    json!({ "summary": raw.trim() })
                } else {
                    Value::Object(rest)
                }
            }
        },
        None => json!({ "summary": raw.trim() }),
    };

    let confidence = parsed.as_ref().and_then(|map| map.get(confidence_key));
    let confidence = match (service, confidence) {
        (_, Some(Value::Object(scores))) if !scores.is_empty() => Value::Object(clip_scores(scores)),
        (ServiceId::Policy, Some(Value::Number(score))) => {
            json!(clip_confidence(score.as_f64().unwrap_or(0.0)))
        }
        (ServiceId::Compensation, _) => json!({ "overall": DEFAULT_CONFIDENCE }),
        (ServiceId::Policy, _) => json!(DEFAULT_CONFIDENCE),
    };

    json!({
        primary_key: primary,
        confidence_key: confidence,
        "metadata": {
            "model_version": FALLBACK_MODEL_VERSION,
            "timestamp": Utc::now().to_rfc3339(),
            "methodology": FALLBACK_METHODOLOGY,
        },
    })
}

fn clip_scores(scores: &Map<String, Value>) -> Map<String, Value> {
    scores
        .iter()
        .map(|(key, value)| {
            let score = value.as_f64().map(clip_confidence).unwrap_or(0.0);
            (key.clone(), json!(score))
        })
        .collect()
}
