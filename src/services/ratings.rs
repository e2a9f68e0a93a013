//! Rating aggregation
//!
//! A serviceman's rating is a running average over completed jobs. Each client review
//! is folded in against the current completed-job counter, so the counter must be
//! incremented (at job completion) before the review that belongs to that job arrives.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::ServicemanProfile;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatingError {
    /// A review arrived for a serviceman whose counter was never incremented
    #[error("serviceman {0} has no completed jobs to rate")]
    NoCompletedJobs(Uuid),

    #[error("rating score {0} is outside 1..=5")]
    ScoreOutOfRange(u8),
}

/// `((current * (total_jobs - 1)) + score) / total_jobs`, rounded half-even to 2 places.
///
/// `total_jobs` must already include the job being rated.
pub fn fold_rating(current: Decimal, total_jobs: i32, score: u8) -> Option<Decimal> {
    if total_jobs <= 0 {
        return None;
    }
    let jobs = Decimal::from(total_jobs);
    let previous = current * (jobs - Decimal::ONE);
    Some(((previous + Decimal::from(score)) / jobs).round_dp(2))
}

/// Folds `score` into the profile's rating, returning the new value
pub fn apply_review(profile: &mut ServicemanProfile, score: u8) -> Result<Decimal, RatingError> {
    if !(1..=5).contains(&score) {
        return Err(RatingError::ScoreOutOfRange(score));
    }
    let rating = fold_rating(profile.rating, profile.total_jobs_completed, score)
        .ok_or(RatingError::NoCompletedJobs(profile.user_id))?;
    profile.rating = rating;
    Ok(rating)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_jobs(total_jobs_completed: i32) -> ServicemanProfile {
        let mut profile = ServicemanProfile::new(Uuid::new_v4(), None);
        profile.total_jobs_completed = total_jobs_completed;
        profile
    }

    #[test]
    fn first_review_sets_rating() {
        let mut profile = profile_with_jobs(1);
        assert_eq!(apply_review(&mut profile, 5).unwrap(), Decimal::from(5));
    }

    #[test]
    fn sequence_of_reviews_averages() {
        let mut profile = profile_with_jobs(0);
        for score in [5u8, 3, 4] {
            profile.total_jobs_completed += 1;
            apply_review(&mut profile, score).unwrap();
        }
        assert_eq!(profile.rating, Decimal::new(400, 2));
    }

    #[test]
    fn rounds_to_two_places() {
        // (5 + 4 + 4) / 3 = 4.333...
        let mut profile = profile_with_jobs(0);
        for score in [5u8, 4, 4] {
            profile.total_jobs_completed += 1;
            apply_review(&mut profile, score).unwrap();
        }
        assert_eq!(profile.rating, Decimal::new(433, 2));
    }

    #[test]
    fn review_without_completed_jobs_is_rejected() {
        let mut profile = profile_with_jobs(0);
        let err = apply_review(&mut profile, 4).unwrap_err();
        assert_eq!(err, RatingError::NoCompletedJobs(profile.user_id));
        assert_eq!(profile.rating, Decimal::ZERO);
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let mut profile = profile_with_jobs(1);
        assert!(matches!(apply_review(&mut profile, 0), Err(RatingError::ScoreOutOfRange(0))));
        assert!(matches!(apply_review(&mut profile, 6), Err(RatingError::ScoreOutOfRange(6))));
    }

    #[test]
    fn fold_ignores_unrated_history() {
        // Two completed jobs but only the second is reviewed: the first counts as 0
        assert_eq!(fold_rating(Decimal::ZERO, 2, 4), Some(Decimal::from(2)));
    }
}
