use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use caseflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |key: &str, value: &str, env_key: &str| {
        lines.push(render_line(
            key,
            value,
            field_source(
                key,
                Some(env_key),
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    };

    push("database.url", &config.database.url, "CASEFLOW_DATABASE_URL");
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        "CASEFLOW_DATABASE_MAX_CONNECTIONS",
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        "CASEFLOW_DATABASE_TIMEOUT_SECS",
    );

    push("advisor.mode", &format!("{:?}", config.advisor.mode), "CASEFLOW_ADVISOR_MODE");
    push("advisor.model", &config.advisor.model, "CASEFLOW_ADVISOR_MODEL");
    push(
        "advisor.base_url",
        config.advisor.base_url.as_deref().unwrap_or("<unset>"),
        "CASEFLOW_ADVISOR_BASE_URL",
    );
    let api_key = config
        .advisor
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    push("advisor.api_key", &api_key, "CASEFLOW_ADVISOR_API_KEY");
    push(
        "advisor.timeout_secs",
        &config.advisor.timeout_secs.to_string(),
        "CASEFLOW_ADVISOR_TIMEOUT_SECS",
    );
    push(
        "advisor.max_retries",
        &config.advisor.max_retries.to_string(),
        "CASEFLOW_ADVISOR_MAX_RETRIES",
    );
    push(
        "advisor.strict_failure",
        &format!("{:?}", config.advisor.strict_failure),
        "CASEFLOW_ADVISOR_STRICT_FAILURE",
    );

    push(
        "guardrails.identity_retry_budget",
        &config.guardrails.identity_retry_budget.to_string(),
        "CASEFLOW_GUARDRAILS_IDENTITY_RETRY_BUDGET",
    );
    push(
        "guardrails.max_input_chars",
        &config.guardrails.max_input_chars.to_string(),
        "CASEFLOW_GUARDRAILS_MAX_INPUT_CHARS",
    );
    push(
        "guardrails.damage_claim_alert_threshold",
        &config.guardrails.damage_claim_alert_threshold.to_string(),
        "CASEFLOW_GUARDRAILS_DAMAGE_CLAIM_ALERT_THRESHOLD",
    );

    push("server.bind_address", &config.server.bind_address, "CASEFLOW_SERVER_BIND_ADDRESS");
    push("server.port", &config.server.port.to_string(), "CASEFLOW_SERVER_PORT");
    push(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        "CASEFLOW_SERVER_HEALTH_CHECK_PORT",
    );

    push("logging.level", &config.logging.level, "CASEFLOW_LOGGING_LEVEL");
    push("logging.format", &format!("{:?}", config.logging.format), "CASEFLOW_LOGGING_FORMAT");

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("caseflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/caseflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
