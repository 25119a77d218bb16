use std::sync::Arc;

use globaliq_agent::runtime::{AgentRuntime, SessionStore};
use globaliq_core::audit::{AuditEvent, AuditSink};
use globaliq_core::config::AppConfig;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionStore>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

/// Writes audit events to the log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = "audit.event",
            correlation_id = %event.correlation_id,
            audit_event_id = %event.event_id,
            audit_event_type = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            session_id = event.session_id.as_deref().unwrap_or("none"),
            route = event.route.map(|route| route.as_str()).unwrap_or("none"),
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

pub fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let runtime = AgentRuntime::from_config(&config, Arc::new(TracingAuditSink))?;
    for endpoint in runtime.orchestrator().endpoints() {
        info!(
            event_name = "system.bootstrap.service_registered",
            correlation_id = "bootstrap",
            service = %endpoint.service_id,
            base_url = %endpoint.base_url,
            "downstream service registered"
        );
    }

    let sessions = Arc::new(SessionStore::from_config(&config.server));
    Ok(Application { config, runtime: Arc::new(runtime), sessions })
}
