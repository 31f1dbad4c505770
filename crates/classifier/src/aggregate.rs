/// One phase voting a direction: the phase weight and the phase's own
/// confidence.
#[derive(Debug, Clone, Copy)]
pub struct DirectionalVote {
    pub weight: f64,
    pub confidence: f64,
}

const MULTI_VOTE_BONUS_STEP: f64 = 0.08;
const MULTI_VOTE_BONUS_CAP: f64 = 0.32;

/// Stacked confidence for one direction. Each concordant vote shrinks
/// the residual doubt multiplicatively; two or more votes scale the
/// residual by a small per-vote bonus before it is inverted.
pub fn stacked_confidence(votes: &[DirectionalVote]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    let residual: f64 = votes
        .iter()
        .map(|vote| 1.0 - (vote.weight * vote.confidence).clamp(0.0, 1.0))
        .product();
    let bonus = if votes.len() >= 2 {
        ((votes.len() - 1) as f64 * MULTI_VOTE_BONUS_STEP).min(MULTI_VOTE_BONUS_CAP)
    } else {
        0.0
    };
    (1.0 - residual * (1.0 + bonus)).clamp(0.0, 1.0)
}
