use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::ProgressOutcome,
    store::RecordStore,
};

pub const MAX_PERCENTAGE: f64 = 100.0;

/// Values this close to 100 count as complete, so that `n` increments of
/// `100 / n` always land on exactly 100.
pub const COMPLETION_TOLERANCE: f64 = 1e-6;

pub fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() || value <= 0.0 {
        0.0
    } else if value >= MAX_PERCENTAGE - COMPLETION_TOLERANCE {
        MAX_PERCENTAGE
    } else {
        value
    }
}

/// Share of the course one graded assessment is worth. `None` for a course
/// without assessments.
pub fn increment_for(total_assessments: usize) -> Option<f64> {
    (total_assessments > 0).then(|| MAX_PERCENTAGE / total_assessments as f64)
}

/// Sets the learner's completion to `percentage` (clamped), or applies the
/// per-assessment increment when no percentage is given.
pub async fn update_progress(
    store: &dyn RecordStore,
    user_id: Uuid,
    course_id: Uuid,
    percentage: Option<f64>,
) -> AppResult<ProgressOutcome> {
    if store.find_course(course_id).await?.is_none() {
        return Err(AppError::not_found(format!("course {course_id}")));
    }
    if store.find_user(user_id).await?.is_none() {
        return Err(AppError::not_found(format!("user {user_id}")));
    }

    let now = Utc::now();
    match percentage {
        Some(p) if p.is_nan() => Err(AppError::invalid("percentage must be a number")),
        Some(p) => {
            let progress = store
                .set_progress(user_id, course_id, clamp_percentage(p), now)
                .await?;
            info!(%user_id, %course_id, pct = progress.progress_percentage, "progress set");
            Ok(ProgressOutcome::applied(progress))
        }
        None => {
            let total = store.count_assessments(course_id).await?;
            match increment_for(total) {
                Some(delta) => {
                    let progress = store.increment_progress(user_id, course_id, delta, now).await?;
                    info!(%user_id, %course_id, pct = progress.progress_percentage, "progress advanced");
                    Ok(ProgressOutcome::applied(progress))
                }
                None => {
                    warn!(%course_id, "course has no assessments, progress increment skipped");
                    let existing = store.find_progress(user_id, course_id).await?;
                    Ok(ProgressOutcome::unchanged(user_id, course_id, existing))
                }
            }
        }
    }
}
