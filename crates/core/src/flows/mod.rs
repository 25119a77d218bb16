pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, SlotFillingFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};
