//! Agent Runtime - routing, slot filling and service dispatch
//!
//! This crate turns free-text requests into calls against the GlobalIQ
//! prediction services:
//! - Routes each utterance to a workflow by keyword or a constrained classification call
//! - Collects the workflow's required fields across turns with an explicit state machine
//! - Dispatches the confirmed field set to a downstream service, with health caching,
//!   contract checks and a completion fallback
//!
//! # Architecture
//!
//! One turn flows through:
//! 1. **Routing** (`router`) - utterance → `RoutingDecision`
//! 2. **Collection** (`collector`, `confirmation`) - utterance → updated `CollectionState`
//! 3. **Orchestration** (`orchestrator`) - `ConfirmedFields` → `TaggedResult`
//!
//! `runtime::AgentRuntime` wires the three together per session.
//!
//! # Safety Principle
//!
//! The LLM only classifies and extracts. It never adds fields outside a route's schema,
//! and a field set reaches a service only after the user confirms it.

pub mod collector;
pub mod confirmation;
pub mod llm;
pub mod orchestrator;
pub mod router;
pub mod runtime;
