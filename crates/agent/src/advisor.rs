use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use caseflow_core::config::AdvisorConfig;
use caseflow_core::domain::case::{IssueCategory, Resolution};
use caseflow_core::flows::Stage;

use crate::intent::IntentExtractor;

/// Context handed to the advisor for one turn. The customer text has already
/// passed the guardrail screen; slot values are the masked forms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvisorPrompt {
    pub stage: Stage,
    pub customer_text: String,
    pub filled_slots: Vec<(String, String)>,
    pub missing_slots: Vec<String>,
}

/// A suggestion, never a decision. Unknown enum values coming back from a
/// model are rejected rather than guessed at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedUpdate {
    pub issue: Option<IssueCategory>,
    pub requested: Option<Resolution>,
    pub reply_draft: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor transport failure: {0}")]
    Transport(String),
    #[error("advisor returned malformed output: {0}")]
    Malformed(String),
    #[error("advisor is not configured: {0}")]
    Configuration(String),
}

/// Backend readiness, reported through the status endpoint for operational
/// tooling. `missing` names the configuration artifacts still needed when the
/// backend is not ready.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdvisorStatus {
    pub backend: &'static str,
    pub ready: bool,
    pub missing: Vec<String>,
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn suggest(&self, prompt: &AdvisorPrompt) -> Result<SuggestedUpdate, AdvisorError>;

    fn status(&self) -> AdvisorStatus;
}

/// Keyword-driven advisor used in deterministic mode and as the hybrid
/// fallback. Cannot fail and never drafts replies.
pub struct DeterministicAdvisor {
    extractor: IntentExtractor,
}

impl DeterministicAdvisor {
    pub fn new() -> Result<Self, AdvisorError> {
        let extractor = IntentExtractor::new()
            .map_err(|error| AdvisorError::Configuration(error.to_string()))?;
        Ok(Self { extractor })
    }
}

#[async_trait]
impl Advisor for DeterministicAdvisor {
    async fn suggest(&self, prompt: &AdvisorPrompt) -> Result<SuggestedUpdate, AdvisorError> {
        let intent = self.extractor.extract(&prompt.customer_text);
        Ok(SuggestedUpdate { issue: intent.issue, requested: intent.requested, reply_draft: None })
    }

    fn status(&self) -> AdvisorStatus {
        AdvisorStatus { backend: "deterministic", ready: true, missing: Vec::new() }
    }
}

/// OpenAI-compatible chat completion adapter. Transport failures are retried
/// with exponential backoff; malformed output is never retried because the
/// model already answered.
pub struct HttpAdvisor {
    client: reqwest::Client,
    base_url: String,
    api_key: secrecy::SecretString,
    model: String,
    max_retries: u32,
}

impl HttpAdvisor {
    pub fn from_config(config: &AdvisorConfig) -> Result<Self, AdvisorError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| AdvisorError::Configuration("advisor.base_url is not set".into()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AdvisorError::Configuration("advisor.api_key is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| AdvisorError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn complete(&self, prompt: &AdvisorPrompt) -> Result<String, AdvisorError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": render_prompt(prompt) },
            ],
        });

        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await;

            let error = match result {
                Ok(response) if response.status().is_success() => {
                    let wire: CompletionWire = response
                        .json()
                        .await
                        .map_err(|error| AdvisorError::Malformed(error.to_string()))?;
                    let content = wire
                        .choices
                        .into_iter()
                        .next()
                        .map(|choice| choice.message.content)
                        .ok_or_else(|| {
                            AdvisorError::Malformed("completion had no choices".into())
                        })?;
                    return Ok(content);
                }
                Ok(response) => AdvisorError::Transport(format!(
                    "completion endpoint returned {}",
                    response.status()
                )),
                Err(error) => AdvisorError::Transport(error.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            warn!(attempt, error = %error, "advisor call failed, retrying");
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
}

// Doubles per attempt, capped at 200ms << 6.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(200 * (1u64 << attempt.min(6)))
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn suggest(&self, prompt: &AdvisorPrompt) -> Result<SuggestedUpdate, AdvisorError> {
        let content = self.complete(prompt).await?;
        parse_suggestion(&content)
    }

    // Construction already requires endpoint and credentials.
    fn status(&self) -> AdvisorStatus {
        AdvisorStatus { backend: "http", ready: true, missing: Vec::new() }
    }
}

const SYSTEM_PROMPT: &str = "You classify one customer support message about a retail order. \
Respond with a single JSON object and nothing else: \
{\"issue\": one of damaged|defective|wrong_item|not_as_described|changed_mind|late_delivery or null, \
\"resolution\": one of replacement|refund|cancellation|escalation or null, \
\"reply\": a short empathetic sentence or null}. \
Never promise refunds, amounts, or outcomes in the reply.";

fn render_prompt(prompt: &AdvisorPrompt) -> String {
    let mut rendered = format!(
        "stage: {}\nfilled slots:\n",
        prompt.stage.as_str()
    );
    for (key, value) in &prompt.filled_slots {
        rendered.push_str(&format!("  {key}: {value}\n"));
    }
    rendered.push_str("missing slots:\n");
    for key in &prompt.missing_slots {
        rendered.push_str(&format!("  {key}\n"));
    }
    rendered.push_str(&format!("customer message: {}\n", prompt.customer_text));
    rendered
}

#[derive(Debug, Deserialize)]
struct CompletionWire {
    choices: Vec<ChoiceWire>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    message: MessageWire,
}

#[derive(Debug, Deserialize)]
struct MessageWire {
    content: String,
}

#[derive(Debug, Deserialize)]
struct SuggestionWire {
    issue: Option<String>,
    resolution: Option<String>,
    reply: Option<String>,
}

/// Strict parse of model output: the content must contain exactly one JSON
/// object, and enum fields must be known values or null.
fn parse_suggestion(content: &str) -> Result<SuggestedUpdate, AdvisorError> {
    let start = content
        .find('{')
        .ok_or_else(|| AdvisorError::Malformed("no JSON object in completion".into()))?;
    let end = content
        .rfind('}')
        .ok_or_else(|| AdvisorError::Malformed("unterminated JSON object in completion".into()))?;

    let wire: SuggestionWire = serde_json::from_str(&content[start..=end])
        .map_err(|error| AdvisorError::Malformed(error.to_string()))?;

    let issue = wire
        .issue
        .map(|raw| {
            IssueCategory::parse(&raw)
                .ok_or_else(|| AdvisorError::Malformed(format!("unknown issue `{raw}`")))
        })
        .transpose()?;
    let requested = wire
        .resolution
        .map(|raw| {
            Resolution::parse(&raw)
                .ok_or_else(|| AdvisorError::Malformed(format!("unknown resolution `{raw}`")))
        })
        .transpose()?;

    let reply_draft = wire.reply.filter(|reply| !reply.trim().is_empty());

    Ok(SuggestedUpdate { issue, requested, reply_draft })
}
