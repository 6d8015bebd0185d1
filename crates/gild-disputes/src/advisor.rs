use crate::error::{DisputeError, Result};
use crate::types::{AdvisoryAnalysis, AdvisoryOutcome, DisputeEvidence};
use async_trait::async_trait;
use gild_types::EscrowId;
use tracing::debug;

/// Terms suggesting the work was actually delivered.
const DELIVERY_TERMS: &[&str] = &[
    "delivered",
    "completed",
    "submitted",
    "finished",
    "shipped",
    "merged",
];

/// Terms suggesting the deliverable is deficient or absent.
const COMPLAINT_TERMS: &[&str] = &[
    "missing",
    "broken",
    "incomplete",
    "late",
    "refund",
    "unresponsive",
    "plagiarized",
    "scam",
];

/// Produces a non-binding recommendation from dispute evidence. The panel
/// sees the recommendation; only reviewer votes move funds.
#[async_trait]
pub trait DisputeAdvisor: Send + Sync {
    async fn analyze(&self, evidence: &DisputeEvidence) -> Result<AdvisoryAnalysis>;
    fn name(&self) -> &str;
}

/// Deterministic keyword-count classifier. Used directly or as the fallback
/// when a richer external advisor is unavailable.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAdvisor;

impl HeuristicAdvisor {
    fn count_hits(text: &str, terms: &[&str]) -> usize {
        terms.iter().map(|t| text.matches(t).count()).sum()
    }
}

#[async_trait]
impl DisputeAdvisor for HeuristicAdvisor {
    async fn analyze(&self, evidence: &DisputeEvidence) -> Result<AdvisoryAnalysis> {
        let text = evidence.combined_text();
        let delivery = Self::count_hits(&text, DELIVERY_TERMS);
        let complaints = Self::count_hits(&text, COMPLAINT_TERMS);

        debug!(
            "Heuristic advisory: {} delivery terms, {} complaint terms",
            delivery, complaints
        );

        let (outcome, confidence) = if delivery == 0 && complaints == 0 {
            (AdvisoryOutcome::NeedsMediation, 0.3)
        } else if delivery > complaints * 2 {
            let gap = delivery - complaints * 2;
            (
                AdvisoryOutcome::ReleaseAssignee,
                (0.5 + 0.1 * gap as f64).min(0.9),
            )
        } else if complaints > delivery * 2 {
            let gap = complaints - delivery * 2;
            (
                AdvisoryOutcome::RefundClient,
                (0.5 + 0.1 * gap as f64).min(0.9),
            )
        } else {
            (AdvisoryOutcome::PartialSplit, 0.5)
        };

        Ok(AdvisoryAnalysis {
            outcome,
            confidence,
            reasoning: format!(
                "keyword analysis: {} delivery signals, {} complaint signals",
                delivery, complaints
            ),
        })
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Read-only view of a project's conversation history, supplied by the
/// caller. Implementations fetch from whatever store holds the messages.
#[async_trait]
pub trait ProjectHistory: Send + Sync {
    async fn recent_messages(&self, escrow: EscrowId, cap: usize) -> Result<Vec<String>>;
    async fn recent_proposals(&self, escrow: EscrowId, cap: usize) -> Result<Vec<String>>;
}

/// Caps applied while assembling an evidence bundle.
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    pub max_messages: usize,
    pub max_proposals: usize,
    pub max_text_len: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            max_proposals: 5,
            max_text_len: 500,
        }
    }
}

/// Masks tokens that look like contact handles or opaque identifiers.
/// Anything containing '@' or any alphanumeric run longer than 24 chars is
/// replaced wholesale.
pub fn redact(text: &str) -> String {
    text.split_whitespace()
        .map(|token| {
            let long_opaque =
                token.len() > 24 && token.chars().all(|c| c.is_ascii_alphanumeric());
            if token.contains('@') || long_opaque {
                "[redacted]"
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Assembles the redacted, capped evidence bundle for a dispute. History
/// fetch failures surface as `ExternalDependencyFailure`.
pub async fn build_evidence(
    history: &dyn ProjectHistory,
    escrow: EscrowId,
    project_description: &str,
    config: &EvidenceConfig,
) -> Result<DisputeEvidence> {
    let messages = history
        .recent_messages(escrow, config.max_messages)
        .await
        .map_err(|e| DisputeError::AdvisoryFailed(format!("history fetch: {}", e)))?;
    let proposals = history
        .recent_proposals(escrow, config.max_proposals)
        .await
        .map_err(|e| DisputeError::AdvisoryFailed(format!("history fetch: {}", e)))?;

    Ok(DisputeEvidence {
        project_description: truncate(&redact(project_description), config.max_text_len),
        messages: messages
            .iter()
            .take(config.max_messages)
            .map(|m| truncate(&redact(m), config.max_text_len))
            .collect(),
        proposals: proposals
            .iter()
            .take(config.max_proposals)
            .map(|p| truncate(&redact(p), config.max_text_len))
            .collect(),
    })
}
