use regex::Regex;

use caseflow_core::domain::case::{IssueCategory, Resolution};

/// Everything one turn of customer text can contribute: slot candidates,
/// confirmation signals, and correction markers. Fields are `None` when the
/// turn says nothing about them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedIntent {
    pub order_id: Option<String>,
    pub email: Option<String>,
    pub phone_last4: Option<String>,
    pub item_id: Option<String>,
    pub issue: Option<IssueCategory>,
    pub requested: Option<Resolution>,
    pub evidence_ref: Option<String>,
    pub quantity_affected: Option<u32>,
    pub correction: bool,
    pub affirmation: Option<bool>,
    pub wants_human: bool,
}

pub struct IntentExtractor {
    order_id_pattern: Regex,
    email_pattern: Regex,
    item_id_pattern: Regex,
    phone_pattern: Regex,
    evidence_pattern: Regex,
    quantity_pattern: Regex,
}

impl IntentExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            order_id_pattern: Regex::new(r"(?i)\b(ORD-\d{3,})\b")?,
            email_pattern: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            item_id_pattern: Regex::new(r"(?i)\b(ITEM-[A-Z0-9][A-Z0-9\-]*)\b")?,
            phone_pattern: Regex::new(r"(?i)(?:phone|number|digits)\D{0,20}(\d{4})\b")?,
            evidence_pattern: Regex::new(r"(?i)\b(?:photo|picture|image|attachment|evidence)\b\s*[:\-]?\s*(\S+\.(?:jpg|jpeg|png|pdf)|https?://\S+)")?,
            quantity_pattern: Regex::new(r"(?i)\b(\d{1,3})\s+of\s+(?:them|the)\b")?,
        })
    }

    pub fn extract(&self, text: &str) -> ExtractedIntent {
        let lowered = text.to_lowercase();

        ExtractedIntent {
            order_id: self
                .order_id_pattern
                .captures(text)
                .map(|captures| captures[1].to_uppercase()),
            email: self.email_pattern.find(text).map(|found| found.as_str().to_string()),
            phone_last4: self
                .phone_pattern
                .captures(text)
                .map(|captures| captures[1].to_string()),
            item_id: self
                .item_id_pattern
                .captures(text)
                .map(|captures| captures[1].to_uppercase()),
            issue: infer_issue(&lowered),
            requested: infer_resolution(&lowered),
            evidence_ref: self
                .evidence_pattern
                .captures(text)
                .map(|captures| captures[1].to_string()),
            quantity_affected: self
                .quantity_pattern
                .captures(text)
                .and_then(|captures| captures[1].parse().ok()),
            correction: is_correction(&lowered),
            affirmation: infer_affirmation(&lowered),
            wants_human: wants_human(&lowered),
        }
    }
}

fn infer_issue(lowered: &str) -> Option<IssueCategory> {
    let table: &[(&[&str], IssueCategory)] = &[
        (&["broken", "damaged", "cracked", "shattered", "dented"], IssueCategory::Damaged),
        (
            &["not working", "doesn't work", "does not work", "defective", "faulty", "dead on arrival"],
            IssueCategory::Defective,
        ),
        (&["wrong item", "different item", "not what i ordered"], IssueCategory::WrongItem),
        (
            &["not as described", "looks different", "misleading"],
            IssueCategory::NotAsDescribed,
        ),
        (
            &["changed my mind", "don't want it", "do not want it", "no longer need"],
            IssueCategory::ChangedMind,
        ),
        (
            &["never arrived", "hasn't arrived", "still waiting", "late", "delayed"],
            IssueCategory::LateDelivery,
        ),
    ];

    table
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(_, issue)| *issue)
}

fn infer_resolution(lowered: &str) -> Option<Resolution> {
    if lowered.contains("replacement") || lowered.contains("replace it") || lowered.contains("new one")
    {
        Some(Resolution::Replacement)
    } else if lowered.contains("refund") || lowered.contains("money back") {
        Some(Resolution::Refund)
    } else if lowered.contains("cancel") {
        Some(Resolution::Cancellation)
    } else if wants_human(lowered) {
        Some(Resolution::Escalation)
    } else {
        None
    }
}

fn is_correction(lowered: &str) -> bool {
    ["actually", "i meant", "i mean", "sorry,", "correction", "change that", "not that"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn infer_affirmation(lowered: &str) -> Option<bool> {
    let trimmed = lowered.trim();
    let affirmative = ["yes", "yep", "yeah", "confirm", "sounds good", "accept", "ok", "okay"];
    let negative = ["no", "nope", "decline", "don't accept", "do not accept", "not good enough"];

    if affirmative.iter().any(|word| starts_with_word(trimmed, word)) {
        Some(true)
    } else if negative.iter().any(|word| starts_with_word(trimmed, word)) {
        Some(false)
    } else {
        None
    }
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text == word
        || text
            .strip_prefix(word)
            .map(|rest| rest.starts_with([' ', ',', '.', '!']))
            .unwrap_or(false)
}

fn wants_human(lowered: &str) -> bool {
    ["human", "real person", "agent", "manager", "supervisor", "escalate"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use caseflow_core::domain::case::{IssueCategory, Resolution};

    use super::IntentExtractor;

    fn extractor() -> IntentExtractor {
        IntentExtractor::new().expect("patterns compile")
    }

    #[test]
    fn order_id_and_issue_from_one_sentence() {
        let intent =
            extractor().extract("My order ORD-1001 arrived broken, I'd like a refund please");

        assert_eq!(intent.order_id.as_deref(), Some("ORD-1001"));
        assert_eq!(intent.issue, Some(IssueCategory::Damaged));
        assert_eq!(intent.requested, Some(Resolution::Refund));
        assert!(!intent.correction);
    }

    #[test]
    fn email_and_phone_digits_are_extracted() {
        let intent = extractor()
            .extract("I don't have the order number, my email is alice@example.com and my phone ends in 1234");

        assert_eq!(intent.email.as_deref(), Some("alice@example.com"));
        assert_eq!(intent.phone_last4.as_deref(), Some("1234"));
        assert_eq!(intent.order_id, None);
    }

    #[test]
    fn evidence_reference_is_captured() {
        let intent = extractor().extract("Here is the photo: damage-front.jpg");
        assert_eq!(intent.evidence_ref.as_deref(), Some("damage-front.jpg"));
    }

    #[test]
    fn correction_marker_flips_the_flag() {
        let intent = extractor().extract("Actually I meant the item is defective");
        assert!(intent.correction);
        assert_eq!(intent.issue, Some(IssueCategory::Defective));
    }

    #[test]
    fn bare_confirmation_and_decline_are_detected() {
        assert_eq!(extractor().extract("Yes, sounds good").affirmation, Some(true));
        assert_eq!(extractor().extract("no, that is not enough").affirmation, Some(false));
        assert_eq!(extractor().extract("what about shipping?").affirmation, None);
    }

    #[test]
    fn request_for_a_human_is_detected() {
        let intent = extractor().extract("Just let me talk to a real person");
        assert!(intent.wants_human);
        assert_eq!(intent.requested, Some(Resolution::Escalation));
    }

    #[test]
    fn quantity_affected_is_parsed() {
        let intent = extractor().extract("2 of them arrived cracked");
        assert_eq!(intent.quantity_affected, Some(2));
        assert_eq!(intent.issue, Some(IssueCategory::Damaged));
    }
}
