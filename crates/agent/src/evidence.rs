use async_trait::async_trait;

use caseflow_core::domain::case::{EvidenceRecord, EvidenceStatus};

/// Boundary to the evidence store. Implementations hold the bytes; the
/// orchestration core only ever sees a reference and an accepted/rejected
/// status.
#[async_trait]
pub trait EvidenceService: Send + Sync {
    async fn review(&self, reference: &str) -> EvidenceRecord;
}

/// Reviews the reference shape only: photo formats and URLs are accepted,
/// anything else is rejected with a reason the customer can act on.
pub struct ReferenceEvidenceService;

const PHOTO_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".heic"];

#[async_trait]
impl EvidenceService for ReferenceEvidenceService {
    async fn review(&self, reference: &str) -> EvidenceRecord {
        let trimmed = reference.trim();
        let lowered = trimmed.to_lowercase();

        let looks_like_photo = PHOTO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
            || lowered.starts_with("http://")
            || lowered.starts_with("https://");

        if trimmed.is_empty() || !looks_like_photo {
            return EvidenceRecord {
                reference: trimmed.to_string(),
                status: EvidenceStatus::Rejected,
                note: Some("only photo attachments or links can be reviewed".to_string()),
            };
        }

        EvidenceRecord { reference: trimmed.to_string(), status: EvidenceStatus::Accepted, note: None }
    }
}
