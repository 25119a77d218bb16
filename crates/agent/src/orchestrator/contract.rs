use globaliq_core::domain::service::ServiceId;
use serde_json::{Map, Value};
use thiserror::Error;

pub const METADATA_KEYS: [&str; 3] = ["model_version", "timestamp", "methodology"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("response body is not a JSON object")]
    NotAnObject,
    #[error("missing required section `{0}`")]
    MissingSection(&'static str),
    #[error("section `{section}` must be {expected}")]
    WrongType { section: &'static str, expected: &'static str },
    #[error("confidence `{key}` in `{section}` is not a number in [0, 1]")]
    ConfidenceOutOfRange { section: &'static str, key: String },
}

/// Name of the section holding the service's main payload.
pub fn primary_section(service: ServiceId) -> &'static str {
    match service {
        ServiceId::Compensation => "predictions",
        ServiceId::Policy => "analysis",
    }
}

pub fn confidence_section(service: ServiceId) -> &'static str {
    match service {
        ServiceId::Compensation => "confidence_scores",
        ServiceId::Policy => "confidence",
    }
}

/// Checks that a downstream response carries the sections callers rely on.
pub fn validate_response(service: ServiceId, body: &Value) -> Result<(), ContractError> {
    let body = body.as_object().ok_or(ContractError::NotAnObject)?;

    let primary = primary_section(service);
    require(body, primary)?.as_object().ok_or(ContractError::WrongType {
        section: primary,
        expected: "an object",
    })?;

    let confidence = confidence_section(service);
    let confidence_value = require(body, confidence)?;
    match (service, confidence_value) {
        (ServiceId::Compensation, Value::Object(scores)) => check_scores(confidence, scores)?,
        (ServiceId::Policy, Value::Object(scores)) => check_scores(confidence, scores)?,
        (ServiceId::Policy, Value::Number(_)) => {
            check_score(confidence, "value", confidence_value)?
        }
        (ServiceId::Compensation, _) => {
            return Err(ContractError::WrongType {
                section: confidence,
                expected: "an object of numbers",
            })
        }
        (ServiceId::Policy, _) => {
            return Err(ContractError::WrongType {
                section: confidence,
                expected: "a number or an object of numbers",
            })
        }
    }

    let metadata = require(body, "metadata")?
        .as_object()
        .ok_or(ContractError::WrongType { section: "metadata", expected: "an object" })?;
    for key in METADATA_KEYS {
        if !metadata.get(key).is_some_and(Value::is_string) {
            return Err(ContractError::WrongType {
                section: "metadata",
                expected: "an object with string model_version, timestamp, methodology",
            });
        }
    }

    Ok(())
}

fn require<'a>(body: &'a Map<String, Value>, section: &'static str) -> Result<&'a Value, ContractError> {
    body.get(section).ok_or(ContractError::MissingSection(section))
}

fn check_scores(section: &'static str, scores: &Map<String, Value>) -> Result<(), ContractError> {
    if scores.is_empty() {
        return Err(ContractError::WrongType { section, expected: "at least one confidence score" });
    }
    scores.iter().try_for_each(|(key, score)| check_score(section, key, score))
}

fn check_score(section: &'static str, key: &str, score: &Value) -> Result<(), ContractError> {
    match score.as_f64() {
        Some(value) if (0.0..=1.0).contains(&value) => Ok(()),
        _ => Err(ContractError::ConfidenceOutOfRange { section, key: key.to_string() }),
    }
}
