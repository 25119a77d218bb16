use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::route::Route;

/// Downstream prediction services known to the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceId {
    #[serde(rename = "compensation_server")]
    Compensation,
    #[serde(rename = "policy_server")]
    Policy,
}

impl ServiceId {
    pub const ALL: [ServiceId; 2] = [ServiceId::Compensation, ServiceId::Policy];

    pub fn for_route(route: Route) -> Option<Self> {
        match route {
            Route::Compensation => Some(Self::Compensation),
            Route::Policy => Some(Self::Policy),
            Route::Both | Route::Guidance => None,
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Self::Compensation => Route::Compensation,
            Self::Policy => Route::Policy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compensation => "compensation_server",
            Self::Policy => "policy_server",
        }
    }

    pub fn dispatch_path(&self) -> &'static str {
        match self {
            Self::Compensation => "/predict",
            Self::Policy => "/analyze",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service_id: ServiceId,
    pub base_url: String,
}

impl ServiceEndpoint {
    pub fn new(service_id: ServiceId, base_url: impl Into<String>) -> Self {
        Self { service_id, base_url: base_url.into() }
    }

    pub fn health_url(&self) -> String {
        join_url(&self.base_url, "/health")
    }

    pub fn dispatch_url(&self) -> String {
        join_url(&self.base_url, self.service_id.dispatch_path())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service_id: ServiceId,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}
