use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::route::Route;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), required: true }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), required: false }
    }
}

/// Ordered field descriptors for one route. Built once and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteSchema {
    route: Route,
    fields: Vec<FieldSpec>,
}

impl RouteSchema {
    pub fn new(route: Route, fields: Vec<FieldSpec>) -> Result<Self, DomainError> {
        if !route.collects_fields() {
            return Err(DomainError::SchemaViolation(format!(
                "route `{route}` does not collect fields"
            )));
        }
        if fields.is_empty() {
            return Err(DomainError::SchemaViolation(format!(
                "schema for `{route}` must declare at least one field"
            )));
        }

        let mut seen = BTreeSet::new();
        for field in &fields {
            let name = field.name.trim();
            if name.is_empty() {
                return Err(DomainError::SchemaViolation(format!(
                    "schema for `{route}` contains a field with a blank name"
                )));
            }
            if name != field.name {
                return Err(DomainError::SchemaViolation(format!(
                    "field `{}` in `{route}` has surrounding whitespace",
                    field.name
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(DomainError::SchemaViolation(format!(
                    "field `{name}` is declared twice in `{route}`"
                )));
            }
        }

        Ok(Self { route, fields })
    }

    pub fn compensation() -> Self {
        Self {
            route: Route::Compensation,
            fields: vec![
                FieldSpec::required("origin_location", "Employee's current city and country"),
                FieldSpec::required(
                    "destination_location",
                    "City and country the employee will relocate to",
                ),
                FieldSpec::required("current_salary", "Annual salary with currency"),
                FieldSpec::required("assignment_duration", "How long the assignment will last"),
                FieldSpec::required("job_level", "Employee's position or seniority level"),
                FieldSpec::required(
                    "family_size",
                    "Number of people relocating, including the employee",
                ),
                FieldSpec::required("housing_preference", "Preferred housing arrangement"),
            ],
        }
    }

    pub fn policy() -> Self {
        Self {
            route: Route::Policy,
            fields: vec![
                FieldSpec::required("origin_country", "Employee's current country"),
                FieldSpec::required("destination_country", "Country the employee is moving to"),
                FieldSpec::required(
                    "assignment_type",
                    "Type of assignment (short-term, long-term, permanent)",
                ),
                FieldSpec::required("assignment_duration", "Duration of the assignment"),
                FieldSpec::required("job_title", "Employee's job title or position"),
            ],
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| field.required)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<Route, RouteSchema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SchemaRegistry {
    pub fn builtin() -> Self {
        let schemas = [RouteSchema::compensation(), RouteSchema::policy()]
            .into_iter()
            .map(|schema| (schema.route(), schema))
            .collect();
        Self { schemas }
    }

    /// Every route that collects fields must end up with exactly one schema.
    pub fn from_schemas(schemas: Vec<RouteSchema>) -> Result<Self, DomainError> {
        let mut by_route = BTreeMap::new();
        for schema in schemas {
            let route = schema.route();
            if by_route.insert(route, schema).is_some() {
                return Err(DomainError::SchemaViolation(format!(
                    "route `{route}` has more than one schema"
                )));
            }
        }

        for route in Route::ALL.into_iter().filter(Route::collects_fields) {
            if !by_route.contains_key(&route) {
                return Err(DomainError::SchemaViolation(format!(
                    "route `{route}` has no schema"
                )));
            }
        }

        Ok(Self { schemas: by_route })
    }

    pub fn get(&self, route: Route) -> Option<&RouteSchema> {
        self.schemas.get(&route)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteSchema> {
        self.schemas.values()
    }
}
