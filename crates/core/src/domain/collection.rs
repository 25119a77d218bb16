use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::route::Route;
use crate::domain::schema::{FieldSpec, RouteSchema};
use crate::errors::DomainError;
use crate::flows::TransitionOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionStatus {
    Init,
    Collecting,
    AwaitingConfirmation,
    Complete,
    Cancelled,
}

impl CollectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Result of one extraction call: a value or null for each schema field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub values: BTreeMap<String, Option<String>>,
    pub confidence: BTreeMap<String, f64>,
}

impl Extraction {
    pub fn extracted_count(&self) -> usize {
        self.values.values().filter(|value| value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.extracted_count() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    route: Route,
    fields: BTreeMap<String, Option<String>>,
    turn_history: Vec<Turn>,
    status: CollectionStatus,
}

impl CollectionState {
    pub fn new(schema: &RouteSchema) -> Self {
        let fields = schema.fields().iter().map(|field| (field.name.clone(), None)).collect();
        Self {
            route: schema.route(),
            fields,
            turn_history: Vec::new(),
            status: CollectionStatus::Init,
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn status(&self) -> CollectionStatus {
        self.status
    }

    pub fn fields(&self) -> &BTreeMap<String, Option<String>> {
        &self.fields
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|value| value.as_deref())
    }

    pub fn turn_history(&self) -> &[Turn] {
        &self.turn_history
    }

    pub fn recent_turns(&self, count: usize) -> &[Turn] {
        let start = self.turn_history.len().saturating_sub(count);
        &self.turn_history[start..]
    }

    pub fn record_turn(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.turn_history.push(Turn { speaker, text: text.into() });
    }

    /// Last write wins per field. Nulls and names outside the schema are ignored.
    /// Returns how many entries changed.
    pub fn merge(&mut self, extraction: &Extraction) -> usize {
        let mut changed = 0;
        for (name, value) in &extraction.values {
            let Some(value) = value else {
                continue;
            };
            if let Some(slot) = self.fields.get_mut(name) {
                if slot.as_ref() != Some(value) {
                    *slot = Some(value.clone());
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn missing_required<'a>(&self, schema: &'a RouteSchema) -> Vec<&'a FieldSpec> {
        schema
            .required_fields()
            .filter(|field| self.value(&field.name).is_none())
            .collect()
    }

    pub fn is_complete(&self, schema: &RouteSchema) -> bool {
        self.missing_required(schema).is_empty()
    }

    pub fn apply(&mut self, outcome: &TransitionOutcome) -> Result<(), DomainError> {
        if outcome.from != self.status {
            return Err(DomainError::UnexpectedCollectionStatus {
                expected: outcome.from,
                actual: self.status,
            });
        }
        self.status = outcome.to;
        Ok(())
    }

    pub fn freeze(&self, schema: &RouteSchema) -> Result<ConfirmedFields, DomainError> {
        if self.status != CollectionStatus::Complete {
            return Err(DomainError::UnexpectedCollectionStatus {
                expected: CollectionStatus::Complete,
                actual: self.status,
            });
        }
        if schema.route() != self.route {
            return Err(DomainError::InvariantViolation(format!(
                "state for `{}` cannot be frozen against the `{}` schema",
                self.route,
                schema.route()
            )));
        }
        let missing = self.missing_required(schema);
        if !missing.is_empty() {
            let names = missing.iter().map(|field| field.name.as_str()).collect::<Vec<_>>();
            return Err(DomainError::InvariantViolation(format!(
                "complete state is missing required fields: {}",
                names.join(", ")
            )));
        }

        let values = schema
            .fields()
            .iter()
            .map(|field| (field.name.clone(), self.fields.get(&field.name).cloned().flatten()))
            .collect();
        Ok(ConfirmedFields { route: self.route, values })
    }
}

/// Field map frozen at confirmation time. Keys are exactly the schema's field names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfirmedFields {
    route: Route,
    values: BTreeMap<String, Option<String>>,
}

impl ConfirmedFields {
    pub fn route(&self) -> Route {
        self.route
    }

    pub fn values(&self) -> &BTreeMap<String, Option<String>> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|value| value.as_deref())
    }

    pub fn to_json_body(&self) -> Value {
        let body = self
            .values
            .iter()
            .map(|(name, value)| {
                (name.clone(), value.as_ref().map(|v| Value::String(v.clone())).unwrap_or(Value::Null))
            })
            .collect::<Map<_, _>>();
        Value::Object(body)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(route: Route, values: BTreeMap<String, Option<String>>) -> Self {
        Self { route, values }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{CollectionState, CollectionStatus, ConfirmedFields, Extraction, Speaker};
    use crate::domain::route::Route;
    use crate::domain::schema::{FieldSpec, RouteSchema};
    use crate::flows::{FlowEngine, FlowEvent};

    fn extraction(pairs: &[(&str, Option<&str>)]) -> Extraction {
        Extraction {
            values: pairs
                .iter()
                .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
                .collect(),
            confidence: BTreeMap::new(),
        }
    }

    fn mixed_schema() -> RouteSchema {
        RouteSchema::new(
            Route::Policy,
            vec![
                FieldSpec::required("origin_country", ""),
                FieldSpec::required("destination_country", ""),
                FieldSpec::optional("notes", ""),
            ],
        )
        .expect("valid schema")
    }

    #[test]
    fn new_state_starts_in_init_with_every_field_null() {
        let schema = RouteSchema::compensation();
        let state = CollectionState::new(&schema);

        assert_eq!(state.status(), CollectionStatus::Init);
        assert_eq!(state.fields().len(), schema.fields().len());
        assert!(state.fields().values().all(Option::is_none));
    }

    #[test]
    fn merge_is_last_write_wins_and_ignores_nulls() {
        let schema = mixed_schema();
        let mut state = CollectionState::new(&schema);

        state.merge(&extraction(&[("origin_country", Some("USA"))]));
        let changed = state.merge(&extraction(&[
            ("origin_country", None),
            ("destination_country", Some("India")),
        ]));
        assert_eq!(changed, 1);
        assert_eq!(state.value("origin_country"), Some("USA"));

        state.merge(&extraction(&[("origin_country", Some("Canada"))]));
        assert_eq!(state.value("origin_country"), Some("Canada"));
    }

    #[test]
    fn merge_never_introduces_fields_outside_the_schema() {
        let schema = mixed_schema();
        let mut state = CollectionState::new(&schema);
        let changed = state.merge(&extraction(&[("salary", Some("100k"))]));

        assert_eq!(changed, 0);
        assert!(!state.fields().contains_key("salary"));
    }

    #[test]
    fn completeness_depends_only_on_required_fields_for_any_fill_order() {
        let schema = mixed_schema();
        let orders: [[&str; 3]; 3] = [
            ["origin_country", "destination_country", "notes"],
            ["notes", "destination_country", "origin_country"],
            ["destination_country", "notes", "origin_country"],
        ];

        for order in orders {
            let mut state = CollectionState::new(&schema);
            for name in order {
                state.merge(&extraction(&[(name, Some("value"))]));
                let required_filled = ["origin_country", "destination_country"]
                    .iter()
                    .all(|required| state.value(required).is_some());
                assert_eq!(state.is_complete(&schema), required_filled, "order {order:?}");
            }
        }
    }

    #[test]
    fn freeze_requires_complete_status() {
        let schema = mixed_schema();
        let mut state = CollectionState::new(&schema);
        state.merge(&extraction(&[
            ("origin_country", Some("USA")),
            ("destination_country", Some("India")),
        ]));

        assert!(state.freeze(&schema).is_err());

        let engine = FlowEngine::default();
        for (event, missing) in [
            (FlowEvent::UtteranceReceived, Vec::new()),
            (FlowEvent::RequiredFieldsCollected, Vec::new()),
            (FlowEvent::Affirmed, Vec::new()),
        ] {
            let outcome = engine
                .apply(&state.status(), &event, &crate::flows::FlowContext {
                    missing_required_fields: missing,
                })
                .expect("valid transition");
            state.apply(&outcome).expect("status matches");
        }

        let frozen = state.freeze(&schema).expect("complete state freezes");
        assert_eq!(frozen.values().len(), 3);
        assert_eq!(frozen.get("destination_country"), Some("India"));
        assert_eq!(frozen.get("notes"), None);
        assert_eq!(
            frozen.to_json_body(),
            serde_json::json!({
                "origin_country": "USA",
                "destination_country": "India",
                "notes": null
            })
        );
    }

    #[test]
    fn apply_rejects_outcomes_computed_from_another_status() {
        let schema = mixed_schema();
        let mut state = CollectionState::new(&schema);
        let outcome = FlowEngine::default()
            .apply(
                &CollectionStatus::AwaitingConfirmation,
                &FlowEvent::Affirmed,
                &Default::default(),
            )
            .expect("valid in isolation");

        assert!(state.apply(&outcome).is_err());
        assert_eq!(state.status(), CollectionStatus::Init);
    }

    #[test]
    fn recent_turns_returns_the_tail() {
        let mut state = CollectionState::new(&mixed_schema());
        for index in 0..5 {
            state.record_turn(Speaker::User, format!("message {index}"));
        }
        let tail = state.recent_turns(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].text, "message 2");
        assert_eq!(state.recent_turns(10).len(), 5);
    }

    #[test]
    fn confirmed_fields_render_nulls_for_unfilled_optional_fields() {
        let fields = ConfirmedFields::from_parts(
            Route::Policy,
            [("job_title".to_string(), Some("Engineer".to_string()))].into_iter().collect(),
        );
        assert_eq!(fields.to_json_body(), serde_json::json!({ "job_title": "Engineer" }));
        assert_eq!(fields.route(), Route::Policy);
    }
}
