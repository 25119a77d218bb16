//! Dispatch of confirmed field sets to the downstream prediction services.
//!
//! Every call runs the same pipeline: endpoint validation, a cached health check,
//! a bounded primary dispatch with contract validation, and at most one fallback.

pub mod contract;
pub mod endpoint;
pub mod fallback;
pub mod health;
pub mod service;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use globaliq_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use globaliq_core::config::DispatchConfig;
use globaliq_core::domain::collection::ConfirmedFields;
use globaliq_core::domain::route::Route;
use globaliq_core::domain::schema::{RouteSchema, SchemaRegistry};
use globaliq_core::domain::service::{HealthStatus, ServiceEndpoint, ServiceId};
use globaliq_core::errors::{ApplicationError, InterfaceError};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

pub use contract::{validate_response, ContractError};
pub use endpoint::HostAllowList;
pub use fallback::FallbackResponder;
pub use health::{HealthMonitor, LivenessProbe};
pub use service::{DispatchError, HttpServiceClient, PredictionService};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionPath {
    Primary { service_id: ServiceId },
    Fallback,
}

impl ExecutionPath {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary { service_id } => service_id.as_str(),
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaggedResult {
    pub route: Route,
    pub path: ExecutionPath,
    pub response: Value,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    primary_successes: AtomicU64,
    primary_failures: AtomicU64,
    fallback_dispatches: AtomicU64,
    errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub primary_successes: u64,
    pub primary_failures: u64,
    pub fallback_dispatches: u64,
    pub errors: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            primary_successes: self.primary_successes.load(Ordering::Relaxed),
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            fallback_dispatches: self.fallback_dispatches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Upper bound on any primary request timeout, whatever the caller asks for.
    pub timeout_ceiling: Duration,
    pub default_request_timeout: Duration,
    pub overall_deadline: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            timeout_ceiling: config.timeout_ceiling(),
            default_request_timeout: config.request_timeout(),
            overall_deadline: config.turn_deadline(),
        }
    }

    pub fn request_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(self.default_request_timeout)
            .min(self.timeout_ceiling)
    }
}

pub struct Orchestrator {
    endpoints: BTreeMap<ServiceId, ServiceEndpoint>,
    schemas: Arc<SchemaRegistry>,
    allow_list: HostAllowList,
    health: Arc<HealthMonitor>,
    primary: Arc<dyn PredictionService>,
    fallback: FallbackResponder,
    settings: OrchestratorSettings,
    stats: DispatchStats,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoints: impl IntoIterator<Item = ServiceEndpoint>,
        schemas: Arc<SchemaRegistry>,
        allow_list: HostAllowList,
        health: Arc<HealthMonitor>,
        primary: Arc<dyn PredictionService>,
        fallback: FallbackResponder,
        settings: OrchestratorSettings,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let endpoints =
            endpoints.into_iter().map(|endpoint| (endpoint.service_id, endpoint)).collect();
        Self {
            endpoints,
            schemas,
            allow_list,
            health,
            primary,
            fallback,
            settings,
            stats: DispatchStats::default(),
            audit,
        }
    }

    pub fn health_snapshot(&self) -> Vec<HealthStatus> {
        self.health.snapshot()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.endpoints.values()
    }

    /// Runs the dispatch pipeline for a confirmed field set. Error detail stays in the logs.
    pub async fn execute(
        &self,
        route: Route,
        fields: &ConfirmedFields,
        requested_timeout: Option<Duration>,
        audit: &AuditContext,
    ) -> Result<TaggedResult, InterfaceError> {
        let deadline = self.settings.overall_deadline;
        let result =
            match tokio::time::timeout(deadline, self.run(route, fields, requested_timeout, audit))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ApplicationError::Timeout {
                    stage: "orchestration",
                    deadline_ms: deadline.as_millis(),
                }),
            };

        match result {
            Ok(tagged) => {
                info!(
                    event_name = "orchestrator.execution_completed",
                    correlation_id = %audit.correlation_id,
                    route = %route,
                    path = tagged.path.label(),
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "orchestration.executed",
                        AuditCategory::Orchestration,
                        AuditOutcome::Success,
                    )
                    .with_metadata("path", tagged.path.label()),
                );
                Ok(tagged)
            }
            Err(failure) => {
                DispatchStats::bump(&self.stats.errors);
                error!(
                    event_name = "orchestrator.execution_failed",
                    correlation_id = %audit.correlation_id,
                    route = %route,
                    error_kind = failure.kind(),
                    error = %failure,
                    "orchestration failed"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "orchestration.failed",
                        AuditCategory::Orchestration,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error_kind", failure.kind()),
                );
                Err(failure.into_interface(audit.correlation_id.clone()))
            }
        }
    }

    async fn run(
        &self,
        route: Route,
        fields: &ConfirmedFields,
        requested_timeout: Option<Duration>,
        audit: &AuditContext,
    ) -> Result<TaggedResult, ApplicationError> {
        let service_id = ServiceId::for_route(route).ok_or_else(|| {
            ApplicationError::Validation(format!("route `{route}` has no downstream service"))
        })?;
        let endpoint = self.endpoints.get(&service_id).ok_or_else(|| {
            ApplicationError::Configuration(format!("no endpoint configured for `{service_id}`"))
        })?;
        self.allow_list.validate(&endpoint.base_url)?;

        let schema = self.schemas.get(route).ok_or_else(|| {
            ApplicationError::Configuration(format!("no schema registered for `{route}`"))
        })?;
        validate_fields(route, schema, fields)?;

        if self.health.check(endpoint, audit).await {
            let timeout = self.settings.request_timeout(requested_timeout);
            match self.dispatch_primary(endpoint, fields, timeout).await {
                Ok(response) => {
                    DispatchStats::bump(&self.stats.primary_successes);
                    return Ok(TaggedResult {
                        route,
                        path: ExecutionPath::Primary { service_id },
                        response,
                    });
                }
                Err(failure) => {
                    DispatchStats::bump(&self.stats.primary_failures);
                    warn!(
                        event_name = "orchestrator.primary_failed",
                        correlation_id = %audit.correlation_id,
                        service = %service_id,
                        error_kind = failure.kind(),
                        error = %failure,
                        "primary dispatch failed"
                    );
                }
            }
        } else {
            info!(
                event_name = "orchestrator.service_unhealthy",
                correlation_id = %audit.correlation_id,
                service = %service_id,
            );
        }

        DispatchStats::bump(&self.stats.fallback_dispatches);
        warn!(
            event_name = "orchestrator.fallback_dispatched",
            correlation_id = %audit.correlation_id,
            service = %service_id,
        );
        let response = self.fallback.respond(service_id, fields).await?;
        Ok(TaggedResult { route, path: ExecutionPath::Fallback, response })
    }

    async fn dispatch_primary(
        &self,
        endpoint: &ServiceEndpoint,
        fields: &ConfirmedFields,
        timeout: Duration,
    ) -> Result<Value, ApplicationError> {
        let service_id = endpoint.service_id;
        let body = fields.to_json_body();
        let timed_out =
            || ApplicationError::Timeout { stage: "primary_dispatch", deadline_ms: timeout.as_millis() };

        let response =
            match tokio::time::timeout(timeout, self.primary.dispatch(endpoint, &body, timeout)).await {
                Err(_) | Ok(Err(DispatchError::Timeout)) => return Err(timed_out()),
                Ok(Err(failure)) => {
                    return Err(ApplicationError::ServiceUnavailable {
                        service: service_id.to_string(),
                        detail: failure.to_string(),
                    })
                }
                Ok(Ok(response)) => response,
            };

        validate_response(service_id, &response).map_err(|violation| {
            ApplicationError::ContractViolation {
                service: service_id.to_string(),
                detail: violation.to_string(),
            }
        })?;
        Ok(response)
    }
}

fn validate_fields(
    route: Route,
    schema: &RouteSchema,
    fields: &ConfirmedFields,
) -> Result<(), ApplicationError> {
    if fields.route() != route {
        return Err(ApplicationError::Validation(format!(
            "fields collected for `{}` cannot be dispatched to `{route}`",
            fields.route()
        )));
    }
    let expected = schema.fields().iter().map(|field| field.name.as_str()).collect::<BTreeSet<_>>();
    let actual = fields.values().keys().map(String::as_str).collect::<BTreeSet<_>>();
    if expected != actual {
        return Err(ApplicationError::Validation(format!(
            "field set does not match the `{route}` schema"
        )));
    }
    if let Some(missing) = schema.required_fields().find(|field| fields.get(&field.name).is_none()) {
        return Err(ApplicationError::Validation(format!(
            "required field `{}` has no value",
            missing.name
        )));
    }
    Ok(())
}
