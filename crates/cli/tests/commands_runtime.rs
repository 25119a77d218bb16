use std::env;
use std::sync::{Mutex, OnceLock};

use axum::{routing::get, Json, Router};
use globaliq_cli::commands::{config, doctor, route};
use serde_json::{json, Value};

#[test]
fn config_redacts_the_api_key_and_attributes_env_sources() {
    with_env(
        &[
            ("GLOBALIQ_LLM_PROVIDER", "openai"),
            ("GLOBALIQ_LLM_API_KEY", "sk-live-secret"),
            ("GLOBALIQ_SERVICES_POLICY_URL", "http://127.0.0.1:9200"),
        ],
        || {
            let output = config::run();

            assert!(!output.contains("sk-live-secret"), "api key must never be printed");
            assert!(output.contains("- llm.api_key = <redacted> (source: env (GLOBALIQ_LLM_API_KEY))"));
            assert!(output.contains(
                "- services.policy_url = http://127.0.0.1:9200 (source: env (GLOBALIQ_SERVICES_POLICY_URL))"
            ));
            assert!(output.contains("- services.compensation_url = http://localhost:8081 (source: default)"));
            assert!(output.contains("- server.session_idle_secs = 1800 (source: default)"));
        },
    );
}

#[test]
fn config_reports_validation_failures() {
    with_env(&[("GLOBALIQ_LLM_PROVIDER", "openai")], || {
        let output = config::run();
        assert!(output.starts_with("config validation failed"));
        assert!(output.contains("llm.api_key"));
    });
}

#[test]
fn doctor_fails_when_services_are_unreachable() {
    with_env(
        &[
            ("GLOBALIQ_SERVICES_COMPENSATION_URL", "http://127.0.0.1:1"),
            ("GLOBALIQ_SERVICES_POLICY_URL", "http://127.0.0.1:1"),
        ],
        || {
            let (exit_code, output) = doctor::run(true);
            assert_eq!(exit_code, 1);

            let payload = parse_payload(&output);
            assert_eq!(payload["overall_status"], "fail");
            assert_eq!(check(&payload, "config_validation")["status"], "pass");
            assert_eq!(check(&payload, "endpoint_allow_list")["status"], "pass");
            assert_eq!(check(&payload, "llm_client")["status"], "pass");
            assert_eq!(check(&payload, "compensation_server_liveness")["status"], "fail");
            assert_eq!(check(&payload, "policy_server_liveness")["status"], "fail");
        },
    );
}

#[test]
fn doctor_flags_service_urls_outside_the_allow_list() {
    with_env(
        &[
            ("GLOBALIQ_SERVICES_COMPENSATION_URL", "http://127.0.0.1:1"),
            ("GLOBALIQ_SERVICES_POLICY_URL", "http://127.0.0.1:1"),
            ("GLOBALIQ_SECURITY_ALLOWED_HOSTS", "models.internal"),
        ],
        || {
            let (exit_code, output) = doctor::run(true);
            assert_eq!(exit_code, 1);

            let payload = parse_payload(&output);
            let allow_list = check(&payload, "endpoint_allow_list");
            assert_eq!(allow_list["status"], "fail");
            assert!(allow_list["details"]
                .as_str()
                .is_some_and(|details| details.contains("not allow-listed")));
            for name in ["compensation_server_liveness", "policy_server_liveness"] {
                let liveness = check(&payload, name);
                assert_eq!(liveness["status"], "skipped", "{name} must not reach a rejected host");
                assert!(liveness["details"]
                    .as_str()
                    .is_some_and(|details| details.contains("not allow-listed")));
            }
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("GLOBALIQ_LLM_PROVIDER", "openai")], || {
        let (exit_code, output) = doctor::run(false);
        assert_eq!(exit_code, 1);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation:"));
        assert!(output.contains("- [skip] service_liveness:"));
    });
}

#[test]
fn doctor_passes_against_healthy_services() {
    let server = tokio::runtime::Runtime::new().expect("server runtime");
    let listener =
        server.block_on(tokio::net::TcpListener::bind("127.0.0.1:0")).expect("bind stub");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
    let app = Router::new().route("/health", get(|| async { Json(json!({"status": "healthy"})) }));
    server.spawn(async move { axum::serve(listener, app).await });

    with_env(
        &[
            ("GLOBALIQ_SERVICES_COMPENSATION_URL", base_url.as_str()),
            ("GLOBALIQ_SERVICES_POLICY_URL", base_url.as_str()),
        ],
        || {
            let (exit_code, output) = doctor::run(true);
            let payload = parse_payload(&output);
            assert_eq!(exit_code, 0, "unexpected report: {payload}");
            assert_eq!(payload["overall_status"], "pass");
            assert_eq!(check(&payload, "policy_server_liveness")["status"], "pass");
        },
    );
}

#[test]
fn route_reports_keyword_matches() {
    with_env(&[], || {
        let result = route::run("What are the visa rules for Germany?");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "route");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["route"], "policy");
        assert_eq!(payload["data"]["method"], "keyword");
    });
}

#[test]
fn route_defers_unmatched_utterances_to_the_classifier() {
    with_env(&[], || {
        let result = route::run("I am thinking about moving someone to Lisbon");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert!(payload.get("data").is_none());
        assert!(payload["message"].as_str().is_some_and(|message| message.contains("classifier")));
    });
}

#[test]
fn route_returns_config_failure_for_invalid_config() {
    with_env(&[("GLOBALIQ_LLM_PROVIDER", "openai")], || {
        let result = route::run("visa rules");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("missing doctor check `{name}`"))
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "GLOBALIQ_LLM_PROVIDER",
        "GLOBALIQ_LLM_API_KEY",
        "GLOBALIQ_LLM_BASE_URL",
        "GLOBALIQ_LLM_MODEL",
        "GLOBALIQ_LLM_TIMEOUT_SECS",
        "GLOBALIQ_LLM_MAX_RETRIES",
        "GLOBALIQ_SERVICES_COMPENSATION_URL",
        "GLOBALIQ_SERVICES_POLICY_URL",
        "GLOBALIQ_HEALTH_TTL_SECS",
        "GLOBALIQ_HEALTH_PROBE_TIMEOUT_SECS",
        "GLOBALIQ_SECURITY_ALLOWED_HOSTS",
        "GLOBALIQ_SERVER_BIND_ADDRESS",
        "GLOBALIQ_SERVER_PORT",
        "GLOBALIQ_SERVER_SESSION_IDLE_SECS",
        "GLOBALIQ_SERVER_MAX_SESSIONS",
        "GLOBALIQ_LOGGING_LEVEL",
        "GLOBALIQ_LOGGING_FORMAT",
        "GLOBALIQ_LOG_LEVEL",
        "GLOBALIQ_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
