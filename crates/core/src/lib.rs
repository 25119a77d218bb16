pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::collection::{
    CollectionState, CollectionStatus, ConfirmedFields, Extraction, Speaker, Turn,
};
pub use domain::route::{Route, RoutingDecision, RoutingMethod};
pub use domain::schema::{FieldSpec, RouteSchema, SchemaRegistry};
pub use domain::service::{HealthStatus, ServiceEndpoint, ServiceId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
