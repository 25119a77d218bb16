use serde::{Deserialize, Serialize};

use crate::domain::collection::CollectionStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    UtteranceReceived,
    FieldsMissing,
    RequiredFieldsCollected,
    Affirmed,
    CorrectionReceived,
    CancelRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    ExtractFields,
    PromptForMissingFields,
    RequestConfirmation,
    FreezeFields,
    DispatchToOrchestrator,
    DiscardState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: CollectionStatus,
    pub to: CollectionStatus,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
