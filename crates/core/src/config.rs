use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub advisor: AdvisorConfig,
    pub guardrails: GuardrailConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AdvisorConfig {
    pub mode: AdvisorMode,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub strict_failure: StrictFailurePolicy,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub identity_retry_budget: u32,
    pub max_input_chars: usize,
    pub damage_claim_alert_threshold: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// How much weight the language-model advisor carries per turn.
/// `Deterministic` never calls it, `Hybrid` consults it but falls back
/// silently, `Strict` treats advisor failure per [`StrictFailurePolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorMode {
    Deterministic,
    Hybrid,
    Strict,
}

impl AdvisorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisorMode::Deterministic => "deterministic",
            AdvisorMode::Hybrid => "hybrid",
            AdvisorMode::Strict => "strict",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrictFailurePolicy {
    Abort,
    Freeze,
    Escalate,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub advisor_mode: Option<AdvisorMode>,
    pub advisor_model: Option<String>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://caseflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            advisor: AdvisorConfig {
                mode: AdvisorMode::Deterministic,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 20,
                max_retries: 2,
                strict_failure: StrictFailurePolicy::Escalate,
            },
            guardrails: GuardrailConfig {
                identity_retry_budget: 3,
                max_input_chars: 4_000,
                damage_claim_alert_threshold: 3,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8088,
                health_check_port: 8089,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for AdvisorMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "hybrid" => Ok(Self::Hybrid),
            "strict" => Ok(Self::Strict),
            other => Err(ConfigError::Validation(format!(
                "unsupported advisor mode `{other}` (expected deterministic|hybrid|strict)"
            ))),
        }
    }
}

impl std::str::FromStr for StrictFailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "freeze" => Ok(Self::Freeze),
            "escalate" => Ok(Self::Escalate),
            other => Err(ConfigError::Validation(format!(
                "unsupported strict failure policy `{other}` (expected abort|freeze|escalate)"
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("caseflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(advisor) = patch.advisor {
            if let Some(mode) = advisor.mode {
                self.advisor.mode = mode;
            }
            if let Some(advisor_api_key_value) = advisor.api_key {
                self.advisor.api_key = Some(secret_value(advisor_api_key_value));
            }
            if let Some(base_url) = advisor.base_url {
                self.advisor.base_url = Some(base_url);
            }
            if let Some(model) = advisor.model {
                self.advisor.model = model;
            }
            if let Some(timeout_secs) = advisor.timeout_secs {
                self.advisor.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = advisor.max_retries {
                self.advisor.max_retries = max_retries;
            }
            if let Some(strict_failure) = advisor.strict_failure {
                self.advisor.strict_failure = strict_failure;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(identity_retry_budget) = guardrails.identity_retry_budget {
                self.guardrails.identity_retry_budget = identity_retry_budget;
            }
            if let Some(max_input_chars) = guardrails.max_input_chars {
                self.guardrails.max_input_chars = max_input_chars;
            }
            if let Some(threshold) = guardrails.damage_claim_alert_threshold {
                self.guardrails.damage_claim_alert_threshold = threshold;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("CASEFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CASEFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CASEFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CASEFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CASEFLOW_ADVISOR_MODE") {
            self.advisor.mode = value.parse()?;
        }
        if let Some(value) = read_env("CASEFLOW_ADVISOR_API_KEY") {
            self.advisor.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CASEFLOW_ADVISOR_BASE_URL") {
            self.advisor.base_url = Some(value);
        }
        if let Some(value) = read_env("CASEFLOW_ADVISOR_MODEL") {
            self.advisor.model = value;
        }
        if let Some(value) = read_env("CASEFLOW_ADVISOR_TIMEOUT_SECS") {
            self.advisor.timeout_secs = parse_u64("CASEFLOW_ADVISOR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_ADVISOR_MAX_RETRIES") {
            self.advisor.max_retries = parse_u32("CASEFLOW_ADVISOR_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_ADVISOR_STRICT_FAILURE") {
            self.advisor.strict_failure = value.parse()?;
        }

        if let Some(value) = read_env("CASEFLOW_GUARDRAILS_IDENTITY_RETRY_BUDGET") {
            self.guardrails.identity_retry_budget =
                parse_u32("CASEFLOW_GUARDRAILS_IDENTITY_RETRY_BUDGET", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_GUARDRAILS_MAX_INPUT_CHARS") {
            self.guardrails.max_input_chars =
                parse_u32("CASEFLOW_GUARDRAILS_MAX_INPUT_CHARS", &value)? as usize;
        }
        if let Some(value) = read_env("CASEFLOW_GUARDRAILS_DAMAGE_CLAIM_ALERT_THRESHOLD") {
            self.guardrails.damage_claim_alert_threshold =
                parse_u32("CASEFLOW_GUARDRAILS_DAMAGE_CLAIM_ALERT_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("CASEFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CASEFLOW_SERVER_PORT") {
            self.server.port = parse_u16("CASEFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CASEFLOW_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CASEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CASEFLOW_LOGGING_LEVEL").or_else(|| read_env("CASEFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CASEFLOW_LOGGING_FORMAT").or_else(|| read_env("CASEFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(advisor_mode) = overrides.advisor_mode {
            self.advisor.mode = advisor_mode;
        }
        if let Some(advisor_model) = overrides.advisor_model {
            self.advisor.model = advisor_model;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_advisor(&self.advisor)?;
        validate_guardrails(&self.guardrails)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("caseflow.toml"), PathBuf::from("config/caseflow.toml")]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_advisor(advisor: &AdvisorConfig) -> Result<(), ConfigError> {
    if advisor.timeout_secs == 0 || advisor.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "advisor.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match advisor.mode {
        AdvisorMode::Deterministic => {}
        AdvisorMode::Hybrid | AdvisorMode::Strict => {
            let missing_url =
                advisor.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing_url {
                return Err(ConfigError::Validation(
                    "advisor.base_url is required for hybrid/strict advisor modes".to_string(),
                ));
            }
            let missing_key = advisor
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "advisor.api_key is required for hybrid/strict advisor modes".to_string(),
                ));
            }
            if advisor.model.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "advisor.model must not be empty for hybrid/strict advisor modes".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.identity_retry_budget == 0 {
        return Err(ConfigError::Validation(
            "guardrails.identity_retry_budget must be greater than zero".to_string(),
        ));
    }

    if guardrails.max_input_chars < 64 {
        return Err(ConfigError::Validation(
            "guardrails.max_input_chars must be at least 64".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    advisor: Option<AdvisorPatch>,
    guardrails: Option<GuardrailPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AdvisorPatch {
    mode: Option<AdvisorMode>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    strict_failure: Option<StrictFailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    identity_retry_budget: Option<u32>,
    max_input_chars: Option<usize>,
    damage_claim_alert_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
