use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::collection::CollectionStatus;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> CollectionStatus;
    fn transition(
        &self,
        current: &CollectionStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Multi-turn field collection: gather, confirm, then hand off.
#[derive(Clone, Debug, Default)]
pub struct SlotFillingFlow;

impl FlowDefinition for SlotFillingFlow {
    fn initial_state(&self) -> CollectionStatus {
        CollectionStatus::Init
    }

    fn transition(
        &self,
        current: &CollectionStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_slot_filling(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> CollectionStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &CollectionStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &CollectionStatus,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "collection.transition_applied",
                        AuditCategory::Collection,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "collection.transition_rejected",
                        AuditCategory::Collection,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<SlotFillingFlow> {
    fn default() -> Self {
        Self::new(SlotFillingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: CollectionStatus, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: CollectionStatus, event: FlowEvent },
}

fn transition_slot_filling(
    current: &CollectionStatus,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use CollectionStatus::{AwaitingConfirmation, Cancelled, Collecting, Complete, Init};
    use FlowAction::{
        DiscardState, DispatchToOrchestrator, ExtractFields, FreezeFields, PromptForMissingFields,
        RequestConfirmation,
    };
    use FlowEvent::{
        Affirmed, CancelRequested, CorrectionReceived, FieldsMissing, RequiredFieldsCollected,
        UtteranceReceived,
    };

    let (to, actions) = match (current, event) {
        (Init, UtteranceReceived) => (Collecting, vec![ExtractFields]),
        (Collecting, FieldsMissing) => (Collecting, vec![PromptForMissingFields]),
        (Collecting, RequiredFieldsCollected) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: *current,
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            (AwaitingConfirmation, vec![RequestConfirmation])
        }
        (AwaitingConfirmation, Affirmed) => (Complete, vec![FreezeFields, DispatchToOrchestrator]),
        (AwaitingConfirmation, CorrectionReceived) => (Collecting, vec![ExtractFields]),
        (Init | Collecting | AwaitingConfirmation, CancelRequested) => {
            (Cancelled, vec![DiscardState])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::collection::CollectionStatus;
    use crate::domain::route::Route;
    use crate::flows::engine::{FlowEngine, FlowTransitionError, SlotFillingFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent};

    #[test]
    fn slot_filling_happy_path_reaches_complete() {
        let engine = FlowEngine::new(SlotFillingFlow);
        let context = FlowContext::default();
        let mut state = engine.initial_state();

        state = engine
            .apply(&state, &FlowEvent::UtteranceReceived, &context)
            .expect("init -> collecting")
            .to;
        state = engine
            .apply(&state, &FlowEvent::FieldsMissing, &context)
            .expect("collecting loops")
            .to;
        state = engine
            .apply(&state, &FlowEvent::RequiredFieldsCollected, &context)
            .expect("collecting -> awaiting confirmation")
            .to;
        let complete =
            engine.apply(&state, &FlowEvent::Affirmed, &context).expect("awaiting -> complete");

        assert_eq!(complete.to, CollectionStatus::Complete);
        assert_eq!(
            complete.actions,
            vec![FlowAction::FreezeFields, FlowAction::DispatchToOrchestrator]
        );
    }

    #[test]
    fn correction_returns_to_collecting() {
        let outcome = FlowEngine::default()
            .apply(
                &CollectionStatus::AwaitingConfirmation,
                &FlowEvent::CorrectionReceived,
                &FlowContext::default(),
            )
            .expect("correction is valid");

        assert_eq!(outcome.to, CollectionStatus::Collecting);
        assert_eq!(outcome.actions, vec![FlowAction::ExtractFields]);
    }

    #[test]
    fn missing_required_fields_block_confirmation() {
        let error = FlowEngine::default()
            .apply(
                &CollectionStatus::Collecting,
                &FlowEvent::RequiredFieldsCollected,
                &FlowContext { missing_required_fields: vec!["job_level".to_owned()] },
            )
            .expect_err("must reject missing fields");

        assert!(matches!(error, FlowTransitionError::MissingRequiredFields { .. }));
    }

    #[test]
    fn terminal_states_reject_every_event() {
        let engine = FlowEngine::default();
        let events = [
            FlowEvent::UtteranceReceived,
            FlowEvent::FieldsMissing,
            FlowEvent::RequiredFieldsCollected,
            FlowEvent::Affirmed,
            FlowEvent::CorrectionReceived,
            FlowEvent::CancelRequested,
        ];

        for state in [CollectionStatus::Complete, CollectionStatus::Cancelled] {
            for event in &events {
                let result = engine.apply(&state, event, &FlowContext::default());
                assert!(
                    matches!(result, Err(FlowTransitionError::InvalidTransition { .. })),
                    "{state:?} accepted {event:?}"
                );
            }
        }
    }

    #[test]
    fn affirmation_is_only_valid_while_awaiting_confirmation() {
        let engine = FlowEngine::default();
        for state in [CollectionStatus::Init, CollectionStatus::Collecting] {
            assert!(engine.apply(&state, &FlowEvent::Affirmed, &FlowContext::default()).is_err());
        }
    }

    #[test]
    fn cancel_is_accepted_from_every_open_state() {
        let engine = FlowEngine::default();
        for state in [
            CollectionStatus::Init,
            CollectionStatus::Collecting,
            CollectionStatus::AwaitingConfirmation,
        ] {
            let outcome = engine
                .apply(&state, &FlowEvent::CancelRequested, &FlowContext::default())
                .expect("cancel is always allowed before completion");
            assert_eq!(outcome.to, CollectionStatus::Cancelled);
        }
    }

    #[test]
    fn transition_emits_audit_event() {
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some("session-7".to_owned()), Some(Route::Policy), "req-42");

        FlowEngine::default()
            .apply_with_audit(
                &CollectionStatus::Init,
                &FlowEvent::UtteranceReceived,
                &FlowContext::default(),
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        let _ = FlowEngine::default().apply_with_audit(
            &CollectionStatus::Complete,
            &FlowEvent::Affirmed,
            &FlowContext::default(),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "collection.transition_applied");
        assert_eq!(events[0].session_id.as_deref(), Some("session-7"));
        assert_eq!(events[1].event_type, "collection.transition_rejected");
        assert_eq!(events[1].correlation_id, "req-42");
    }
}
