use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::route::Route;
use crate::domain::schema::{FieldSpec, RouteSchema, SchemaRegistry};
use crate::domain::service::{ServiceEndpoint, ServiceId};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub services: ServicesConfig,
    pub health: HealthConfig,
    pub dispatch: DispatchConfig,
    pub security: SecurityConfig,
    pub routing: RoutingConfig,
    pub collector: CollectorConfig,
    pub schemas: SchemasConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServicesConfig {
    pub compensation_url: String,
    pub policy_url: String,
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
    pub ttl_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub timeout_ceiling_secs: u64,
    pub request_timeout_secs: u64,
    pub turn_deadline_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub allowed_hosts: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub policy_keywords: Vec<String>,
    pub compensation_keywords: Vec<String>,
    pub guidance_phrases: Vec<String>,
    pub classification_timeout_secs: u64,
}

/// Reply token overrides. `None` keeps the built-in English sets.
#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    pub affirmative_tokens: Option<Vec<String>>,
    pub negative_tokens: Option<Vec<String>>,
    pub cancel_tokens: Option<Vec<String>>,
}

/// Per-route field list overrides. `None` keeps the built-in schema.
#[derive(Clone, Debug, Default)]
pub struct SchemasConfig {
    pub compensation: Option<Vec<FieldSpec>>,
    pub policy: Option<Vec<FieldSpec>>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Sessions without a turn for this long are dropped.
    pub session_idle_secs: u64,
    pub max_sessions: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub compensation_url: Option<String>,
    pub policy_url: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["globaliq.toml", "config/globaliq.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            services: ServicesConfig {
                compensation_url: "http://localhost:8081".to_string(),
                policy_url: "http://localhost:8082".to_string(),
            },
            health: HealthConfig { ttl_secs: 30, probe_timeout_secs: 2 },
            dispatch: DispatchConfig {
                timeout_ceiling_secs: 30,
                request_timeout_secs: 10,
                turn_deadline_secs: 60,
            },
            security: SecurityConfig { allowed_hosts: to_strings(&["localhost", "127.0.0.1", "::1"]) },
            routing: RoutingConfig {
                policy_keywords: to_strings(DEFAULT_POLICY_KEYWORDS),
                compensation_keywords: to_strings(DEFAULT_COMPENSATION_KEYWORDS),
                guidance_phrases: to_strings(DEFAULT_GUIDANCE_PHRASES),
                classification_timeout_secs: 10,
            },
            collector: CollectorConfig::default(),
            schemas: SchemasConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                session_idle_secs: 1_800,
                max_sessions: 10_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

const DEFAULT_POLICY_KEYWORDS: &[&str] = &[
    "policy",
    "policies",
    "visa",
    "visas",
    "immigration",
    "compliance",
    "compliant",
    "eligible",
    "eligibility",
    "guidelines",
    "rules",
    "regulations",
    "work permit",
    "tax equalization",
];

const DEFAULT_COMPENSATION_KEYWORDS: &[&str] = &[
    "compensation",
    "salary",
    "pay",
    "allowance",
    "allowances",
    "cost of living",
    "col adjustment",
    "hardship",
    "package",
    "cheapest",
    "budget",
    "relocation cost",
];

const DEFAULT_GUIDANCE_PHRASES: &[&str] =
    &["what can you do", "who are you", "help me", "how does this work", "getting started"];

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ServerConfig {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

impl HealthConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl DispatchConfig {
    pub fn timeout_ceiling(&self) -> Duration {
        Duration::from_secs(self.timeout_ceiling_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn turn_deadline(&self) -> Duration {
        Duration::from_secs(self.turn_deadline_secs)
    }
}

impl ServicesConfig {
    pub fn endpoints(&self) -> Vec<ServiceEndpoint> {
        vec![
            ServiceEndpoint::new(ServiceId::Compensation, self.compensation_url.clone()),
            ServiceEndpoint::new(ServiceId::Policy, self.policy_url.clone()),
        ]
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Builds the route schemas, applying any configured overrides on top of the built-ins.
    pub fn schema_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        let compensation = match &self.schemas.compensation {
            Some(fields) => RouteSchema::new(Route::Compensation, fields.clone())
                .map_err(|error| ConfigError::Validation(format!("schemas.compensation: {error}")))?,
            None => RouteSchema::compensation(),
        };
        let policy = match &self.schemas.policy {
            Some(fields) => RouteSchema::new(Route::Policy, fields.clone())
                .map_err(|error| ConfigError::Validation(format!("schemas.policy: {error}")))?,
            None => RouteSchema::policy(),
        };

        SchemaRegistry::from_schemas(vec![compensation, policy])
            .map_err(|error| ConfigError::Validation(error.to_string()))
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(services) = patch.services {
            if let Some(url) = services.compensation_url {
                self.services.compensation_url = url;
            }
            if let Some(url) = services.policy_url {
                self.services.policy_url = url;
            }
        }

        if let Some(health) = patch.health {
            if let Some(ttl_secs) = health.ttl_secs {
                self.health.ttl_secs = ttl_secs;
            }
            if let Some(probe_timeout_secs) = health.probe_timeout_secs {
                self.health.probe_timeout_secs = probe_timeout_secs;
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(value) = dispatch.timeout_ceiling_secs {
                self.dispatch.timeout_ceiling_secs = value;
            }
            if let Some(value) = dispatch.request_timeout_secs {
                self.dispatch.request_timeout_secs = value;
            }
            if let Some(value) = dispatch.turn_deadline_secs {
                self.dispatch.turn_deadline_secs = value;
            }
        }

        if let Some(security) = patch.security {
            if let Some(allowed_hosts) = security.allowed_hosts {
                self.security.allowed_hosts = allowed_hosts;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(keywords) = routing.policy_keywords {
                self.routing.policy_keywords = keywords;
            }
            if let Some(keywords) = routing.compensation_keywords {
                self.routing.compensation_keywords = keywords;
            }
            if let Some(phrases) = routing.guidance_phrases {
                self.routing.guidance_phrases = phrases;
            }
            if let Some(value) = routing.classification_timeout_secs {
                self.routing.classification_timeout_secs = value;
            }
        }

        if let Some(collector) = patch.collector {
            if collector.affirmative_tokens.is_some() {
                self.collector.affirmative_tokens = collector.affirmative_tokens;
            }
            if collector.negative_tokens.is_some() {
                self.collector.negative_tokens = collector.negative_tokens;
            }
            if collector.cancel_tokens.is_some() {
                self.collector.cancel_tokens = collector.cancel_tokens;
            }
        }

        if let Some(schemas) = patch.schemas {
            if schemas.compensation.is_some() {
                self.schemas.compensation = schemas.compensation;
            }
            if schemas.policy.is_some() {
                self.schemas.policy = schemas.policy;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(session_idle_secs) = server.session_idle_secs {
                self.server.session_idle_secs = session_idle_secs;
            }
            if let Some(max_sessions) = server.max_sessions {
                self.server.max_sessions = max_sessions;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("GLOBALIQ_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("GLOBALIQ_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("GLOBALIQ_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("GLOBALIQ_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("GLOBALIQ_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("GLOBALIQ_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("GLOBALIQ_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("GLOBALIQ_SERVICES_COMPENSATION_URL") {
            self.services.compensation_url = value;
        }
        if let Some(value) = read_env("GLOBALIQ_SERVICES_POLICY_URL") {
            self.services.policy_url = value;
        }

        if let Some(value) = read_env("GLOBALIQ_HEALTH_TTL_SECS") {
            self.health.ttl_secs = parse_u64("GLOBALIQ_HEALTH_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_HEALTH_PROBE_TIMEOUT_SECS") {
            self.health.probe_timeout_secs =
                parse_u64("GLOBALIQ_HEALTH_PROBE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GLOBALIQ_DISPATCH_TIMEOUT_CEILING_SECS") {
            self.dispatch.timeout_ceiling_secs =
                parse_u64("GLOBALIQ_DISPATCH_TIMEOUT_CEILING_SECS", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_DISPATCH_REQUEST_TIMEOUT_SECS") {
            self.dispatch.request_timeout_secs =
                parse_u64("GLOBALIQ_DISPATCH_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_DISPATCH_TURN_DEADLINE_SECS") {
            self.dispatch.turn_deadline_secs =
                parse_u64("GLOBALIQ_DISPATCH_TURN_DEADLINE_SECS", &value)?;
        }

        if let Some(value) = read_env("GLOBALIQ_SECURITY_ALLOWED_HOSTS") {
            self.security.allowed_hosts = split_list(&value);
        }

        if let Some(value) = read_env("GLOBALIQ_ROUTING_CLASSIFICATION_TIMEOUT_SECS") {
            self.routing.classification_timeout_secs =
                parse_u64("GLOBALIQ_ROUTING_CLASSIFICATION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GLOBALIQ_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("GLOBALIQ_SERVER_PORT") {
            self.server.port = parse_u16("GLOBALIQ_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("GLOBALIQ_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_SERVER_SESSION_IDLE_SECS") {
            self.server.session_idle_secs =
                parse_u64("GLOBALIQ_SERVER_SESSION_IDLE_SECS", &value)?;
        }
        if let Some(value) = read_env("GLOBALIQ_SERVER_MAX_SESSIONS") {
            self.server.max_sessions = parse_usize("GLOBALIQ_SERVER_MAX_SESSIONS", &value)?;
        }

        let log_level =
            read_env("GLOBALIQ_LOGGING_LEVEL").or_else(|| read_env("GLOBALIQ_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("GLOBALIQ_LOGGING_FORMAT").or_else(|| read_env("GLOBALIQ_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(url) = overrides.compensation_url {
            self.services.compensation_url = url;
        }
        if let Some(url) = overrides.policy_url {
            self.services.policy_url = url;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_services(&self.services)?;
        validate_health(&self.health)?;
        validate_dispatch(&self.dispatch)?;
        validate_security(&self.security)?;
        validate_routing(&self.routing)?;
        validate_collector(&self.collector)?;
        self.schema_registry()?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_services(services: &ServicesConfig) -> Result<(), ConfigError> {
    for (key, url) in [
        ("services.compensation_url", &services.compensation_url),
        ("services.policy_url", &services.policy_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }
    Ok(())
}

fn validate_health(health: &HealthConfig) -> Result<(), ConfigError> {
    if health.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "health.ttl_secs must be greater than zero".to_string(),
        ));
    }
    if health.probe_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "health.probe_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if dispatch.timeout_ceiling_secs == 0 || dispatch.timeout_ceiling_secs > 300 {
        return Err(ConfigError::Validation(
            "dispatch.timeout_ceiling_secs must be in range 1..=300".to_string(),
        ));
    }
    if dispatch.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "dispatch.request_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if dispatch.turn_deadline_secs == 0 {
        return Err(ConfigError::Validation(
            "dispatch.turn_deadline_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    if security.allowed_hosts.iter().all(|host| host.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "security.allowed_hosts must list at least one host".to_string(),
        ));
    }
    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.policy_keywords.is_empty() || routing.compensation_keywords.is_empty() {
        return Err(ConfigError::Validation(
            "routing.policy_keywords and routing.compensation_keywords must not be empty"
                .to_string(),
        ));
    }
    if routing.classification_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "routing.classification_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_collector(collector: &CollectorConfig) -> Result<(), ConfigError> {
    for (key, tokens) in [
        ("collector.affirmative_tokens", &collector.affirmative_tokens),
        ("collector.negative_tokens", &collector.negative_tokens),
        ("collector.cancel_tokens", &collector.cancel_tokens),
    ] {
        if tokens.as_ref().is_some_and(|tokens| tokens.is_empty()) {
            return Err(ConfigError::Validation(format!("{key} must not be empty when set")));
        }
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.session_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "server.session_idle_secs must be greater than zero".to_string(),
        ));
    }

    if server.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "server.max_sessions must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    services: Option<ServicesPatch>,
    health: Option<HealthPatch>,
    dispatch: Option<DispatchPatch>,
    security: Option<SecurityPatch>,
    routing: Option<RoutingPatch>,
    collector: Option<CollectorPatch>,
    schemas: Option<SchemasPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicesPatch {
    compensation_url: Option<String>,
    policy_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthPatch {
    ttl_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    timeout_ceiling_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    turn_deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    allowed_hosts: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    policy_keywords: Option<Vec<String>>,
    compensation_keywords: Option<Vec<String>>,
    guidance_phrases: Option<Vec<String>>,
    classification_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CollectorPatch {
    affirmative_tokens: Option<Vec<String>>,
    negative_tokens: Option<Vec<String>>,
    cancel_tokens: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemasPatch {
    compensation: Option<Vec<FieldSpec>>,
    policy: Option<Vec<FieldSpec>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    session_idle_secs: Option<u64>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
