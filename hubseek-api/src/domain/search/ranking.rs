//! Composite ranking: vector similarity blended with metadata signals.

use time::OffsetDateTime;

use crate::domain::IssueState;

/// Ranking weights (sum to 1).
#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub semantic_similarity: f64,
    pub comment_count: f64,
    pub recency: f64,
    pub issue_state: f64,
}

pub const RANKING_WEIGHTS: RankingWeights = RankingWeights {
    semantic_similarity: 0.80,
    comment_count: 0.12,
    recency: 0.05,
    issue_state: 0.03,
};

impl RankingWeights {
    pub fn sum(&self) -> f64 {
        self.semantic_similarity + self.comment_count + self.recency + self.issue_state
    }
}

/// Comment score caps out at this many comments.
pub const COMMENT_COUNT_CAP: i64 = 80;

/// Characteristic decay time for the recency score, in days.
pub const RECENCY_BASE_DAYS: f64 = 30.0;

/// Raw cosine similarity is normalized against this anchor; perfect matches
/// top out around it, so dividing by it spreads typical scores usefully
/// across [0, 1].
pub const NORMALIZATION_ANCHOR: f64 = 0.65;

const OPEN_ISSUE_MULTIPLIER: f64 = 1.0;
const CLOSED_ISSUE_MULTIPLIER: f64 = 0.8;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Anchor-normalized cosine similarity from a cosine distance.
pub fn similarity_score(distance: f64) -> f64 {
    ((1.0 - distance) / NORMALIZATION_ANCHOR).clamp(0.0, 1.0)
}

/// Linear in comment count up to the cap.
pub fn comment_score(comment_count: i64) -> f64 {
    comment_count.clamp(0, COMMENT_COUNT_CAP) as f64 / COMMENT_COUNT_CAP as f64
}

/// Exponential decay: ~0.37 after 30 days, ~0.14 after 60, never quite zero.
pub fn recency_score(issue_updated_at: OffsetDateTime, now: OffsetDateTime) -> f64 {
    let age_days = ((now - issue_updated_at).as_seconds_f64() / SECONDS_PER_DAY).max(0.0);
    (-age_days / RECENCY_BASE_DAYS).exp()
}

/// Small bonus for open issues.
pub fn state_score(state: IssueState) -> f64 {
    match state {
        IssueState::Open => OPEN_ISSUE_MULTIPLIER,
        IssueState::Closed => CLOSED_ISSUE_MULTIPLIER,
    }
}

/// The combined ranking score.
pub fn ranking_score(
    distance: f64,
    comment_count: i64,
    issue_updated_at: OffsetDateTime,
    state: IssueState,
    now: OffsetDateTime,
) -> f64 {
    RANKING_WEIGHTS.semantic_similarity * similarity_score(distance)
        + RANKING_WEIGHTS.comment_count * comment_score(comment_count)
        + RANKING_WEIGHTS.recency * recency_score(issue_updated_at, now)
        + RANKING_WEIGHTS.issue_state * state_score(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap()
    }

    #[test]
    fn weights_sum_to_one() {
        assert!((RANKING_WEIGHTS.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn more_comments_never_score_lower() {
        let mut previous = -1.0;
        for count in 0..=200 {
            let score = ranking_score(0.3, count, now(), IssueState::Open, now());
            assert!(
                score >= previous,
                "score decreased at {count} comments: {score} < {previous}"
            );
            previous = score;
        }
    }

    #[test]
    fn comment_score_caps_at_the_cap() {
        assert_eq!(comment_score(COMMENT_COUNT_CAP), 1.0);
        assert_eq!(comment_score(COMMENT_COUNT_CAP * 10), 1.0);
        assert_eq!(comment_score(0), 0.0);
        assert_eq!(comment_score(-5), 0.0);
        assert!((comment_score(40) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn similarity_is_anchor_normalized_and_clamped() {
        // distance 0.35 => raw similarity 0.65, exactly the anchor.
        assert!((similarity_score(0.35) - 1.0).abs() < 1e-9);
        // A perfect match can not exceed 1.
        assert_eq!(similarity_score(0.0), 1.0);
        // Anti-correlated vectors bottom out at 0.
        assert_eq!(similarity_score(1.8), 0.0);
        // Half the anchor lands at 0.5.
        assert!((similarity_score(1.0 - 0.325) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn recency_decays_exponentially() {
        let fresh = recency_score(now(), now());
        assert!((fresh - 1.0).abs() < 1e-9);

        let month_old = recency_score(now() - Duration::days(30), now());
        assert!((month_old - (-1.0f64).exp()).abs() < 1e-6);

        let two_months_old = recency_score(now() - Duration::days(60), now());
        assert!((two_months_old - (-2.0f64).exp()).abs() < 1e-6);
        assert!(two_months_old > 0.0);
    }

    #[test]
    fn open_issues_outrank_identical_closed_issues() {
        let open = ranking_score(0.3, 10, now(), IssueState::Open, now());
        let closed = ranking_score(0.3, 10, now(), IssueState::Closed, now());
        assert!(open > closed);
        assert!((open - closed - 0.03 * 0.2).abs() < 1e-9);
    }

    #[test]
    fn future_timestamps_do_not_inflate_recency() {
        let score = recency_score(now() + Duration::days(1), now());
        assert_eq!(score, 1.0);
    }
}
