use std::time::Duration;

use globaliq_agent::llm::ChatCompletionsClient;
use globaliq_agent::orchestrator::{HostAllowList, HttpServiceClient, LivenessProbe};
use globaliq_core::config::{AppConfig, LoadOptions};
use globaliq_core::domain::service::ServiceEndpoint;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn exit_code(&self) -> u8 {
        if self.overall_status == CheckStatus::Pass {
            0
        } else {
            1
        }
    }
}

pub fn run(json_output: bool) -> (u8, String) {
    let report = build_report();
    let exit_code = report.exit_code();

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (exit_code, output);
    }

    (exit_code, render_human(&report))
}

pub fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation".to_string(),
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_allow_list(&config));
            checks.push(check_llm_client(&config));
            checks.extend(check_service_liveness(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation".to_string(),
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["endpoint_allow_list", "llm_client", "service_liveness"] {
                checks.push(DoctorCheck {
                    name: name.to_string(),
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_allow_list(config: &AppConfig) -> DoctorCheck {
    let allow_list = HostAllowList::new(&config.security.allowed_hosts);
    let rejected: Vec<String> = config
        .services
        .endpoints()
        .iter()
        .filter_map(|endpoint| {
            allow_list
                .validate(&endpoint.base_url)
                .err()
                .map(|error| format!("{}: {error}", endpoint.service_id))
        })
        .collect();

    if rejected.is_empty() {
        DoctorCheck {
            name: "endpoint_allow_list".to_string(),
            status: CheckStatus::Pass,
            details: format!(
                "all service URLs resolve to allowed hosts ({})",
                allow_list.hosts().collect::<Vec<_>>().join(", ")
            ),
        }
    } else {
        DoctorCheck {
            name: "endpoint_allow_list".to_string(),
            status: CheckStatus::Fail,
            details: rejected.join("; "),
        }
    }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match ChatCompletionsClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "llm_client".to_string(),
            status: CheckStatus::Pass,
            details: format!("client ready for `{}`", client.endpoint()),
        },
        Err(error) => DoctorCheck {
            name: "llm_client".to_string(),
            status: CheckStatus::Fail,
            details: format!("{error:#}"),
        },
    }
}

fn check_service_liveness(config: &AppConfig) -> Vec<DoctorCheck> {
    let endpoints = config.services.endpoints();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "service_liveness".to_string(),
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };
    let client = match HttpServiceClient::new() {
        Ok(client) => client,
        Err(error) => {
            return vec![DoctorCheck {
                name: "service_liveness".to_string(),
                status: CheckStatus::Fail,
                details: format!("failed to build http client: {error:#}"),
            }];
        }
    };
    let probe_timeout = config.health.probe_timeout();
    let allow_list = HostAllowList::new(&config.security.allowed_hosts);

    endpoints
        .iter()
        .map(|endpoint| match allow_list.validate(&endpoint.base_url) {
            Ok(_) => runtime.block_on(probe_endpoint(&client, endpoint, probe_timeout)),
            Err(_) => DoctorCheck {
                name: format!("{}_liveness", endpoint.service_id),
                status: CheckStatus::Skipped,
                details: "skipped because the endpoint is not allow-listed".to_string(),
            },
        })
        .collect()
}

async fn probe_endpoint(
    client: &HttpServiceClient,
    endpoint: &ServiceEndpoint,
    probe_timeout: Duration,
) -> DoctorCheck {
    let name = format!("{}_liveness", endpoint.service_id);
    let (status, details) =
        match tokio::time::timeout(probe_timeout, client.probe(endpoint)).await {
            Ok(Ok(true)) => (CheckStatus::Pass, format!("`{}` reports healthy", endpoint.health_url())),
            Ok(Ok(false)) => {
                (CheckStatus::Fail, format!("`{}` reports unhealthy", endpoint.health_url()))
            }
            Ok(Err(error)) => (CheckStatus::Fail, format!("{error:#}")),
            Err(_) => (
                CheckStatus::Fail,
                format!("no answer within {}s from `{}`", probe_timeout.as_secs(), endpoint.health_url()),
            ),
        };

    DoctorCheck { name, status, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
