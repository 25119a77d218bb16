use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use globaliq_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_PATHS};
use toml::Value;

struct ConfigRow {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for row in rows(&config) {
        let source =
            field_source(&row, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", row.key, row.value));
    }
    lines.join("\n")
}

fn rows(config: &AppConfig) -> Vec<ConfigRow> {
    vec![
        row("llm.provider", format!("{:?}", config.llm.provider), &["GLOBALIQ_LLM_PROVIDER"]),
        row("llm.model", config.llm.model.clone(), &["GLOBALIQ_LLM_MODEL"]),
        row(
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["GLOBALIQ_LLM_BASE_URL"],
        ),
        row(
            "llm.api_key",
            if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
            &["GLOBALIQ_LLM_API_KEY"],
        ),
        row("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["GLOBALIQ_LLM_TIMEOUT_SECS"]),
        row("llm.max_retries", config.llm.max_retries.to_string(), &["GLOBALIQ_LLM_MAX_RETRIES"]),
        row(
            "services.compensation_url",
            config.services.compensation_url.clone(),
            &["GLOBALIQ_SERVICES_COMPENSATION_URL"],
        ),
        row("services.policy_url", config.services.policy_url.clone(), &["GLOBALIQ_SERVICES_POLICY_URL"]),
        row("health.ttl_secs", config.health.ttl_secs.to_string(), &["GLOBALIQ_HEALTH_TTL_SECS"]),
        row(
            "health.probe_timeout_secs",
            config.health.probe_timeout_secs.to_string(),
            &["GLOBALIQ_HEALTH_PROBE_TIMEOUT_SECS"],
        ),
        row(
            "dispatch.timeout_ceiling_secs",
            config.dispatch.timeout_ceiling_secs.to_string(),
            &["GLOBALIQ_DISPATCH_TIMEOUT_CEILING_SECS"],
        ),
        row(
            "dispatch.request_timeout_secs",
            config.dispatch.request_timeout_secs.to_string(),
            &["GLOBALIQ_DISPATCH_REQUEST_TIMEOUT_SECS"],
        ),
        row(
            "dispatch.turn_deadline_secs",
            config.dispatch.turn_deadline_secs.to_string(),
            &["GLOBALIQ_DISPATCH_TURN_DEADLINE_SECS"],
        ),
        row(
            "security.allowed_hosts",
            config.security.allowed_hosts.join(", "),
            &["GLOBALIQ_SECURITY_ALLOWED_HOSTS"],
        ),
        row(
            "routing.policy_keywords",
            format!("{} entries", config.routing.policy_keywords.len()),
            &[],
        ),
        row(
            "routing.compensation_keywords",
            format!("{} entries", config.routing.compensation_keywords.len()),
            &[],
        ),
        row(
            "routing.classification_timeout_secs",
            config.routing.classification_timeout_secs.to_string(),
            &["GLOBALIQ_ROUTING_CLASSIFICATION_TIMEOUT_SECS"],
        ),
        row(
            "schemas.compensation",
            schema_summary(config.schemas.compensation.as_ref().map(Vec::len)),
            &[],
        ),
        row("schemas.policy", schema_summary(config.schemas.policy.as_ref().map(Vec::len)), &[]),
        row("server.bind_address", config.server.bind_address.clone(), &["GLOBALIQ_SERVER_BIND_ADDRESS"]),
        row("server.port", config.server.port.to_string(), &["GLOBALIQ_SERVER_PORT"]),
        row(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["GLOBALIQ_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        row(
            "server.session_idle_secs",
            config.server.session_idle_secs.to_string(),
            &["GLOBALIQ_SERVER_SESSION_IDLE_SECS"],
        ),
        row(
            "server.max_sessions",
            config.server.max_sessions.to_string(),
            &["GLOBALIQ_SERVER_MAX_SESSIONS"],
        ),
        row(
            "logging.level",
            config.logging.level.clone(),
            &["GLOBALIQ_LOGGING_LEVEL", "GLOBALIQ_LOG_LEVEL"],
        ),
        row(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["GLOBALIQ_LOGGING_FORMAT", "GLOBALIQ_LOG_FORMAT"],
        ),
    ]
}

fn row(key: &'static str, value: String, env_keys: &'static [&'static str]) -> ConfigRow {
    ConfigRow { key, value, env_keys }
}

fn schema_summary(custom_fields: Option<usize>) -> String {
    match custom_fields {
        Some(count) => format!("custom ({count} fields)"),
        None => "built-in".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    row: &ConfigRow,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = row.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, row.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
