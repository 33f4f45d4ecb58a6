//! Pre-task confidence scoring
//!
//! 0-100 composite of three components: similar-task success rate (50%),
//! recent run success rate (20%), and novelty (30%). Neutral defaults apply
//! when the knowledge store has no history; a failed recall degrades the
//! score instead of aborting the run.

use crate::collab::RecallContext;

const WEIGHT_SIMILAR: f64 = 0.50;
const WEIGHT_FAILURE: f64 = 0.20;
const WEIGHT_NOVELTY: f64 = 0.30;

/// Pre-task confidence assessment.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScore {
    /// Weighted composite, clamped 0-100
    pub total: u8,
    /// Success rate of similar past tasks
    pub similar_success: u8,
    /// Recent run success rate
    pub failure_rate: u8,
    /// How much prior art exists
    pub novelty: u8,
}

/// Score a task from recalled history.
#[must_use]
pub fn score_recall(recall: &RecallContext) -> ConfidenceScore {
    let similar_success = similar_success_score(recall);
    let failure_rate = failure_rate_score(recall);
    let novelty = novelty_score(recall.similar.len());
    let score = compose(similar_success, failure_rate, novelty);
    tracing::info!(
        total = score.total,
        similar = score.similar_success,
        failure = score.failure_rate,
        novelty = score.novelty,
        matches = recall.similar.len(),
        "confidence scored"
    );
    score
}

/// Score when recall failed entirely: unknown territory on every axis.
/// Lands below the default floor, so unattended modes tighten.
#[must_use]
pub fn degraded() -> ConfidenceScore {
    compose(30, 50, 20)
}

fn compose(similar_success: u8, failure_rate: u8, novelty: u8) -> ConfidenceScore {
    let total = f64::from(similar_success) * WEIGHT_SIMILAR
        + f64::from(failure_rate) * WEIGHT_FAILURE
        + f64::from(novelty) * WEIGHT_NOVELTY;
    ConfidenceScore {
        total: total.clamp(0.0, 100.0) as u8,
        similar_success,
        failure_rate,
        novelty,
    }
}

/// No similar tasks scores 30 (neutral-low, unknown territory).
fn similar_success_score(recall: &RecallContext) -> u8 {
    if recall.similar.is_empty() {
        return 30;
    }
    let completed = recall.similar.iter().filter(|o| o.completed).count();
    ((completed * 100) / recall.similar.len()) as u8
}

/// No run history scores 50 (neutral).
fn failure_rate_score(recall: &RecallContext) -> u8 {
    match recall.recent_success_rate {
        Some(rate) => (rate.clamp(0.0, 1.0) * 100.0) as u8,
        None => 50,
    }
}

/// More prior art, higher confidence.
fn novelty_score(similar_count: usize) -> u8 {
    match similar_count {
        0 => 20,
        1 | 2 => 50,
        _ => 80,
    }
}
