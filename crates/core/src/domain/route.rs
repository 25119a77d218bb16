use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Workflow destinations an utterance can be routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Route {
    #[serde(rename = "policy")]
    Policy,
    #[serde(rename = "compensation")]
    Compensation,
    #[serde(rename = "both_policy_and_compensation")]
    Both,
    #[serde(rename = "guidance_fallback")]
    Guidance,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Policy, Route::Compensation, Route::Both, Route::Guidance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Compensation => "compensation",
            Self::Both => "both_policy_and_compensation",
            Self::Guidance => "guidance_fallback",
        }
    }

    /// Routes that own a field schema and a downstream prediction service.
    pub fn collects_fields(&self) -> bool {
        matches!(self, Self::Policy | Self::Compensation)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Policy => {
                "Corporate global mobility policy questions: assignment rules, visas and \
                 immigration, compliance, eligibility, and program guidelines."
            }
            Self::Compensation => {
                "Relocation compensation questions: salary calculations, cost-of-living \
                 adjustments, housing allowances, hardship pay, and total package cost."
            }
            Self::Both => {
                "Scenarios that weigh policy constraints against compensation cost, such as \
                 the cheapest compliant way to relocate a senior manager."
            }
            Self::Guidance => {
                "Vague, off-topic, or exploratory requests where the user needs to hear what \
                 the assistant can do."
            }
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("`{0}` is not a known route")]
pub struct UnknownRoute(pub String);

impl FromStr for Route {
    type Err = UnknownRoute;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches(|c| c == '"' || c == '\'').to_ascii_lowercase();
        Route::ALL
            .into_iter()
            .find(|route| route.as_str() == normalized)
            .ok_or_else(|| UnknownRoute(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    Keyword,
    Model,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: Route,
    pub method: RoutingMethod,
    pub confidence: f64,
}

impl RoutingDecision {
    pub fn keyword(route: Route) -> Self {
        Self { route, method: RoutingMethod::Keyword, confidence: 1.0 }
    }

    pub fn model(route: Route, confidence: f64) -> Self {
        Self { route, method: RoutingMethod::Model, confidence: clip_confidence(confidence) }
    }

    /// Outcome used when classification fails or returns something outside the route set.
    pub fn unresolved() -> Self {
        Self { route: Route::Guidance, method: RoutingMethod::Model, confidence: 0.0 }
    }
}

pub fn clip_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{clip_confidence, Route, RoutingDecision, RoutingMethod};

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for route in Route::ALL {
            assert_eq!(route.as_str().parse::<Route>(), Ok(route));
        }
        assert_eq!(" \"Policy\" ".parse::<Route>(), Ok(Route::Policy));
    }

    #[test]
    fn values_outside_the_route_set_are_rejected() {
        assert!("payroll".parse::<Route>().is_err());
        assert!("".parse::<Route>().is_err());
        assert!("both".parse::<Route>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let encoded = serde_json::to_string(&Route::Both).expect("serialize");
        assert_eq!(encoded, "\"both_policy_and_compensation\"");
        let decoded: Route = serde_json::from_str("\"guidance_fallback\"").expect("deserialize");
        assert_eq!(decoded, Route::Guidance);
    }

    #[test]
    fn model_confidence_is_clipped() {
        assert_eq!(RoutingDecision::model(Route::Policy, 1.7).confidence, 1.0);
        assert_eq!(RoutingDecision::model(Route::Policy, -0.2).confidence, 0.0);
        assert_eq!(clip_confidence(f64::NAN), 0.0);
        assert_eq!(RoutingDecision::keyword(Route::Compensation).method, RoutingMethod::Keyword);
    }

    #[test]
    fn only_policy_and_compensation_collect_fields() {
        assert!(Route::Policy.collects_fields());
        assert!(Route::Compensation.collects_fields());
        assert!(!Route::Both.collects_fields());
        assert!(!Route::Guidance.collects_fields());
    }
}
