use thiserror::Error;

use crate::{domain::collection::CollectionStatus, domain::route::Route, flows::FlowTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("collection state is {actual:?}, expected {expected:?}")]
    UnexpectedCollectionStatus { expected: CollectionStatus, actual: CollectionStatus },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("schema invariant violation: {0}")]
    SchemaViolation(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure kinds raised inside the orchestration core.
///
/// Missing required fields are not represented here: they drive a follow-up prompt.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no confident route for utterance: {0}")]
    RoutingAmbiguous(String),
    #[error("extraction failed for route {route}: {detail}")]
    ExtractionFailure { route: Route, detail: String },
    #[error("service `{service}` unavailable: {detail}")]
    ServiceUnavailable { service: String, detail: String },
    #[error("service `{service}` violated its response contract: {detail}")]
    ContractViolation { service: String, detail: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{stage} exceeded its deadline of {deadline_ms}ms")]
    Timeout { stage: &'static str, deadline_ms: u128 },
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("timed out: {message}")]
    Timeout { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Timeout { .. } => "That took longer than expected. Please try again.",
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Timeout { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Timeout { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }

    /// Stable label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain",
            Self::RoutingAmbiguous(_) => "routing_ambiguous",
            Self::ExtractionFailure { .. } => "extraction_failure",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::ContractViolation { .. } => "contract_violation",
            Self::Validation(_) => "validation",
            Self::Timeout { .. } => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }
}

// Messages carried across this boundary are fixed strings; the source detail stays in logs.
impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_) => {
                Self::BadRequest { message: "domain validation failed".to_owned(), correlation_id }
            }
            ApplicationError::Validation(_) => {
                Self::BadRequest { message: "request validation failed".to_owned(), correlation_id }
            }
            ApplicationError::RoutingAmbiguous(_) => Self::BadRequest {
                message: "request could not be routed".to_owned(),
                correlation_id,
            },
            ApplicationError::ExtractionFailure { .. }
            | ApplicationError::ServiceUnavailable { .. }
            | ApplicationError::ContractViolation { .. } => Self::ServiceUnavailable {
                message: "downstream service unavailable".to_owned(),
                correlation_id,
            },
            ApplicationError::Timeout { .. } => {
                Self::Timeout { message: "deadline exceeded".to_owned(), correlation_id }
            }
            ApplicationError::Configuration(_) => {
                Self::Internal { message: "configuration error".to_owned(), correlation_id }
            }
        }
    }
}
