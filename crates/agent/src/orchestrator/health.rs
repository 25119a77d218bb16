use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use globaliq_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use globaliq_core::domain::service::{HealthStatus, ServiceEndpoint, ServiceId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `Ok(true)` only for a service that reports itself healthy.
    async fn probe(&self, endpoint: &ServiceEndpoint) -> Result<bool>;
}

struct CacheEntry {
    status: HealthStatus,
    observed: Instant,
}

/// TTL cache of service liveness with at most one in-flight probe per service.
pub struct HealthMonitor {
    probe: Arc<dyn LivenessProbe>,
    ttl: Duration,
    probe_timeout: Duration,
    cache: RwLock<HashMap<ServiceId, CacheEntry>>,
    probe_locks: Mutex<HashMap<ServiceId, Arc<tokio::sync::Mutex<()>>>>,
    audit: Arc<dyn AuditSink>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn LivenessProbe>, ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            probe,
            ttl,
            probe_timeout,
            cache: RwLock::new(HashMap::new()),
            probe_locks: Mutex::new(HashMap::new()),
            audit: Arc::new(NoopAuditSink),
        }
    }

    /// Records one audit event per probe that actually ran. Cache hits are not audited.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn check(&self, endpoint: &ServiceEndpoint, audit: &AuditContext) -> bool {
        let service_id = endpoint.service_id;
        if let Some(healthy) = self.fresh(service_id) {
            debug!(event_name = "health.cache_hit", service = %service_id, healthy);
            return healthy;
        }

        let lock = self.probe_lock(service_id);
        let _guard = lock.lock().await;

        // Another caller may have refreshed the entry while this one waited.
        if let Some(healthy) = self.fresh(service_id) {
            debug!(event_name = "health.cache_refreshed_by_peer", service = %service_id, healthy);
            return healthy;
        }

        let healthy = match tokio::time::timeout(self.probe_timeout, self.probe.probe(endpoint)).await
        {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(error)) => {
                warn!(
                    event_name = "health.probe_failed",
                    service = %service_id,
                    error = %error,
                    "liveness probe failed"
                );
                false
            }
            Err(_) => {
                warn!(
                    event_name = "health.probe_timeout",
                    service = %service_id,
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "liveness probe timed out"
                );
                false
            }
        };

        self.record(service_id, healthy);
        info!(
            event_name = "health.probe_completed",
            correlation_id = %audit.correlation_id,
            service = %service_id,
            healthy,
        );
        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "health.probed",
                AuditCategory::Health,
                if healthy { AuditOutcome::Success } else { AuditOutcome::Failed },
            )
            .with_metadata("service", service_id.to_string())
            .with_metadata("healthy", healthy.to_string()),
        );
        healthy
    }

    /// Latest known status for every probed service, stale entries included.
    pub fn snapshot(&self) -> Vec<HealthStatus> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut statuses =
            cache.values().map(|entry| entry.status.clone()).collect::<Vec<_>>();
        statuses.sort_by_key(|status| status.service_id);
        statuses
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self, service_id: ServiceId) -> Option<bool> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(&service_id)
            .filter(|entry| entry.observed.elapsed() < self.ttl)
            .map(|entry| entry.status.healthy)
    }

    fn record(&self, service_id: ServiceId, healthy: bool) {
        let entry = CacheEntry {
            status: HealthStatus { service_id, healthy, checked_at: Utc::now() },
            observed: Instant::now(),
        };
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(service_id, entry);
    }

    fn probe_lock(&self, service_id: ServiceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.probe_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(service_id).or_default())
    }
}
