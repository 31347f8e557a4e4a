use regex::Regex;
use thiserror::Error;

use caseflow_core::config::GuardrailConfig;
use caseflow_core::mask_email;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputClassification {
    Clean,
    Suspicious,
    Blocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailCategory {
    Oversize,
    Injection,
    Exfiltration,
    Fraud,
}

impl GuardrailCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oversize => "oversize",
            Self::Injection => "injection",
            Self::Exfiltration => "exfiltration",
            Self::Fraud => "fraud",
        }
    }
}

/// What the orchestrator must do with the turn. `Restrict` downgrades the
/// session to deterministic-only handling; the downgrade is one-way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailAction {
    Allow,
    Restrict,
    Refuse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailVerdict {
    pub classification: InputClassification,
    pub category: Option<GuardrailCategory>,
    pub action: GuardrailAction,
    pub reason: Option<&'static str>,
}

impl GuardrailVerdict {
    fn clean() -> Self {
        Self {
            classification: InputClassification::Clean,
            category: None,
            action: GuardrailAction::Allow,
            reason: None,
        }
    }

    pub fn refusal_message(&self) -> &'static str {
        "I can't help with that request. I can assist with returns, refunds, and order issues."
    }
}

#[derive(Debug, Error)]
#[error("guardrail pattern failed to compile: {0}")]
pub struct GuardrailBuildError(#[from] regex::Error);

/// Ordered input screen plus outbound reply scrubber. Checks run most-severe
/// first; the first hit wins.
pub struct GuardrailPipeline {
    injection: Vec<Regex>,
    exfiltration: Vec<Regex>,
    fraud_phrases: Vec<Regex>,
    email_pattern: Regex,
    card_pattern: Regex,
    max_input_chars: usize,
    damage_claim_alert_threshold: u32,
}

const INJECTION_PATTERNS: &[&str] = &[
    r"(?i)ignore\s+(all\s+|any\s+)?(previous|prior|above)\s+instructions",
    r"(?i)\bsystem\s+prompt\b",
    r"(?i)\bdeveloper\s+(message|mode)\b",
    r"(?i)\byou\s+are\s+now\b",
    r"(?i)\bjailbreak\b",
    r"(?i)disregard\s+.{0,40}(polic|rule|instruction)",
    r"(?i)pretend\s+(that\s+)?(you|the\s+policy)",
];

const EXFILTRATION_PATTERNS: &[&str] = &[
    r"(?i)\b(list|dump|show|export)\b.{0,40}\b(all|every)\b.{0,40}\b(order|customer|user|account)",
    r"(?i)\bdatabase\s+(schema|contents|dump)\b",
    r"(?i)other\s+customers?'?s?\s+(order|email|address|data)",
    r"(?i)\bfull\s+(card|credit\s+card)\s+number\b",
];

const FRAUD_PATTERNS: &[&str] = &[
    r"(?i)without\s+(a\s+)?(photo|picture|proof|evidence|receipt)",
    r"(?i)\b(skip|bypass)\b.{0,30}\b(check|verification|evidence)",
    r"(?i)refund\s+.{0,30}\bkeep\s+the\s+item\b",
];

impl GuardrailPipeline {
    pub fn new(config: &GuardrailConfig) -> Result<Self, GuardrailBuildError> {
        Ok(Self {
            injection: compile(INJECTION_PATTERNS)?,
            exfiltration: compile(EXFILTRATION_PATTERNS)?,
            fraud_phrases: compile(FRAUD_PATTERNS)?,
            email_pattern: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            card_pattern: Regex::new(r"\b(?:\d[ \-]?){12,19}\b")?,
            max_input_chars: config.max_input_chars,
            damage_claim_alert_threshold: config.damage_claim_alert_threshold,
        })
    }

    /// Screen one turn of raw customer input before intent extraction.
    pub fn screen_input(&self, text: &str, damage_claim_count: u32) -> GuardrailVerdict {
        if text.chars().count() > self.max_input_chars {
            return GuardrailVerdict {
                classification: InputClassification::Blocked,
                category: Some(GuardrailCategory::Oversize),
                action: GuardrailAction::Refuse,
                reason: Some("input exceeds maximum length"),
            };
        }

        if self.injection.iter().any(|pattern| pattern.is_match(text)) {
            return GuardrailVerdict {
                classification: InputClassification::Blocked,
                category: Some(GuardrailCategory::Injection),
                action: GuardrailAction::Refuse,
                reason: Some("prompt injection pattern"),
            };
        }

        if self.exfiltration.iter().any(|pattern| pattern.is_match(text)) {
            return GuardrailVerdict {
                classification: InputClassification::Blocked,
                category: Some(GuardrailCategory::Exfiltration),
                action: GuardrailAction::Refuse,
                reason: Some("bulk data request"),
            };
        }

        if self.fraud_phrases.iter().any(|pattern| pattern.is_match(text)) {
            return GuardrailVerdict {
                classification: InputClassification::Suspicious,
                category: Some(GuardrailCategory::Fraud),
                action: GuardrailAction::Restrict,
                reason: Some("fraud-pattern phrasing"),
            };
        }

        if damage_claim_count >= self.damage_claim_alert_threshold {
            return GuardrailVerdict {
                classification: InputClassification::Suspicious,
                category: Some(GuardrailCategory::Fraud),
                action: GuardrailAction::Restrict,
                reason: Some("repeated damage claims in session"),
            };
        }

        GuardrailVerdict::clean()
    }

    /// Scrub an outbound reply: raw emails are masked, card-length digit
    /// runs keep only their last four digits.
    pub fn sanitize_reply(&self, text: &str) -> String {
        let masked_emails = self
            .email_pattern
            .replace_all(text, |captures: &regex::Captures<'_>| mask_email(&captures[0]));

        self.card_pattern
            .replace_all(&masked_emails, |captures: &regex::Captures<'_>| {
                let digits: String =
                    captures[0].chars().filter(|c| c.is_ascii_digit()).collect();
                let last4 = &digits[digits.len().saturating_sub(4)..];
                format!("****{last4}")
            })
            .into_owned()
    }
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|pattern| Regex::new(pattern)).collect()
}
