//! Read-only aggregates over progress records and assessment results.
//!
//! Nothing here fails for lack of data: empty inputs yield zeroed aggregates.
//! Only a course or user id that does not resolve is reported as `NotFound`.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        ActiveParticipants, AssessmentResult, Course, CourseProgressStats, Progress, RankingEntry,
        UserAverages,
    },
    store::RecordStore,
};

pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Enrolled learners ordered by completion (highest first), ties by user id.
/// Learners without a progress record sit at 0%, without results at an
/// average score of 0.
pub fn course_ranking(
    students: &[Uuid],
    progress: &[Progress],
    results: &[AssessmentResult],
) -> Vec<RankingEntry> {
    let pct: HashMap<Uuid, f64> = progress
        .iter()
        .map(|p| (p.user_id, p.progress_percentage))
        .collect();
    let mut scores: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for r in results {
        scores.entry(r.user_id).or_default().push(f64::from(r.score));
    }

    let mut ranking: Vec<RankingEntry> = students
        .iter()
        .map(|user_id| RankingEntry {
            user_id: *user_id,
            progress_percentage: pct.get(user_id).copied().unwrap_or(0.0),
            average_score: scores
                .get(user_id)
                .map(|s| mean(s.iter().copied()))
                .unwrap_or(0.0),
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.progress_percentage
            .total_cmp(&a.progress_percentage)
            .then(a.user_id.cmp(&b.user_id))
    });
    ranking.dedup_by_key(|e| e.user_id);
    ranking
}

/// Mean completion over the given enrolled courses; a course without a
/// progress record contributes 0.
pub fn average_completion(enrolled: &[Uuid], progress: &[Progress]) -> f64 {
    let pct: HashMap<Uuid, f64> = progress
        .iter()
        .map(|p| (p.course_id, p.progress_percentage))
        .collect();
    mean(enrolled.iter().map(|c| pct.get(c).copied().unwrap_or(0.0)))
}

pub fn average_quiz_score(results: &[AssessmentResult]) -> f64 {
    mean(results.iter().map(|r| f64::from(r.score)))
}

/// Progress records of the course's current students. Records kept after an
/// unenrollment, or created by a submission without enrollment, are skipped.
fn enrolled_records<'a>(course: &'a Course, progress: &'a [Progress]) -> impl Iterator<Item = &'a Progress> {
    progress
        .iter()
        .filter(move |p| p.course_id == course.id && course.students.contains(&p.user_id))
}

pub fn progress_stats(course: &Course, progress: &[Progress]) -> CourseProgressStats {
    let values: Vec<f64> = enrolled_records(course, progress)
        .map(|p| p.progress_percentage)
        .collect();
    let (min, max) = if values.is_empty() {
        (0.0, 0.0)
    } else {
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
    };
    CourseProgressStats {
        course_id: course.id,
        course_title: course.title.clone(),
        total_users: values.len(),
        average_progress: mean(values.iter().copied()),
        min_progress: min,
        max_progress: max,
    }
}

/// "Active" means any progress at all, regardless of when it was made.
pub fn active_participants(course: &Course, progress: &[Progress]) -> ActiveParticipants {
    ActiveParticipants {
        course_id: course.id,
        course_title: course.title.clone(),
        active_participants: enrolled_records(course, progress)
            .filter(|p| p.progress_percentage > 0.0)
            .count(),
    }
}

fn by_title(courses: &mut [Course]) {
    courses.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
}

async fn require_course(store: &dyn RecordStore, course_id: Uuid) -> AppResult<Course> {
    store
        .find_course(course_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("course {course_id}")))
}

pub async fn get_course_ranking(store: &dyn RecordStore, course_id: Uuid) -> AppResult<Vec<RankingEntry>> {
    let course = require_course(store, course_id).await?;
    let progress = store.course_progress(course_id).await?;
    let results = store.results_for_course(course_id).await?;
    Ok(course_ranking(&course.students, &progress, &results))
}

pub async fn get_user_averages(store: &dyn RecordStore, user_id: Uuid) -> AppResult<UserAverages> {
    if store.find_user(user_id).await?.is_none() {
        return Err(AppError::not_found(format!("user {user_id}")));
    }
    let enrolled = store.enrolled_course_ids(user_id).await?;
    let progress = store.user_progress(user_id).await?;
    let results = store.results_for_user(user_id).await?;
    Ok(UserAverages {
        user_id,
        average_completion: average_completion(&enrolled, &progress),
        average_quiz_score: average_quiz_score(&results),
    })
}

/// One entry for the given course, or one per course ordered by title.
pub async fn get_progress_statistics(
    store: &dyn RecordStore,
    course_id: Option<Uuid>,
) -> AppResult<Vec<CourseProgressStats>> {
    match course_id {
        Some(id) => {
            let course = require_course(store, id).await?;
            let progress = store.course_progress(id).await?;
            Ok(vec![progress_stats(&course, &progress)])
        }
        None => {
            let mut courses = store.list_courses().await?;
            by_title(&mut courses);
            let progress = store.all_progress().await?;
            Ok(courses.iter().map(|c| progress_stats(c, &progress)).collect())
        }
    }
}

/// Same scoping as [`get_progress_statistics`]; courses with nobody active
/// are listed with a zero count.
pub async fn get_active_participants(
    store: &dyn RecordStore,
    course_id: Option<Uuid>,
) -> AppResult<Vec<ActiveParticipants>> {
    match course_id {
        Some(id) => {
            let course = require_course(store, id).await?;
            let progress = store.course_progress(id).await?;
            Ok(vec![active_participants(&course, &progress)])
        }
        None => {
            let mut courses = store.list_courses().await?;
            by_title(&mut courses);
            let progress = store.all_progress().await?;
            Ok(courses
                .iter()
                .map(|c| active_participants(c, &progress))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course(title: &str) -> Course {
        Course {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            instructor_id: Uuid::new_v4(),
            students: vec![],
            assessment_ids: vec![],
            discussion_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn prog(user_id: Uuid, course_id: Uuid, pct: f64) -> Progress {
        Progress {
            user_id,
            course_id,
            progress_percentage: pct,
            last_updated: Utc::now(),
        }
    }

    fn result(user_id: Uuid, score: u32) -> AssessmentResult {
        AssessmentResult {
            assessment_id: Uuid::new_v4(),
            user_id,
            score,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn stats_for_zero_fifty_hundred() {
        let mut c = course("Rust 101");
        let progress: Vec<Progress> = [0.0, 50.0, 100.0]
            .into_iter()
            .map(|p| prog(Uuid::new_v4(), c.id, p))
            .collect();
        c.students = progress.iter().map(|p| p.user_id).collect();

        let stats = progress_stats(&c, &progress);
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.average_progress, 50.0);
        assert_eq!(stats.min_progress, 0.0);
        assert_eq!(stats.max_progress, 100.0);
        assert_eq!(stats.course_title, "Rust 101");

        assert_eq!(active_participants(&c, &progress).active_participants, 2);
    }

    #[test]
    fn empty_course_is_zeroed() {
        let c = course("Empty");
        let stats = progress_stats(&c, &[]);
        assert_eq!(stats.total_users, 0);
        assert_eq!(stats.average_progress, 0.0);
        assert_eq!(stats.min_progress, 0.0);
        assert_eq!(stats.max_progress, 0.0);
        assert_eq!(active_participants(&c, &[]).active_participants, 0);
    }

    #[test]
    fn other_courses_are_ignored() {
        let mut c = course("A");
        let learner = Uuid::new_v4();
        c.students = vec![learner];
        let other = prog(learner, Uuid::new_v4(), 80.0);
        assert_eq!(progress_stats(&c, &[other.clone()]).total_users, 0);
        assert_eq!(active_participants(&c, &[other]).active_participants, 0);
    }

    #[test]
    fn records_of_non_students_are_ignored() {
        let mut c = course("A");
        let (stays, left) = (Uuid::new_v4(), Uuid::new_v4());
        c.students = vec![stays];
        let progress = vec![prog(stays, c.id, 40.0), prog(left, c.id, 100.0)];

        let stats = progress_stats(&c, &progress);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.max_progress, 40.0);
        assert_eq!(active_participants(&c, &progress).active_participants, 1);
    }

    #[test]
    fn ranking_orders_by_progress_then_user_id() {
        let c = Uuid::new_v4();
        let mut ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        ids.sort();
        let (a, b, d, e) = (ids[0], ids[1], ids[2], ids[3]);
        let progress = vec![prog(e, c, 90.0), prog(d, c, 40.0), prog(b, c, 40.0)];
        let results = vec![result(d, 3), result(d, 1), result(e, 5)];

        let ranking = course_ranking(&[d, a, e, b], &progress, &results);
        let order: Vec<Uuid> = ranking.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![e, b, d, a]);

        assert_eq!(ranking[0].average_score, 5.0);
        assert_eq!(ranking[2].average_score, 2.0);
        // no results and no progress record
        assert_eq!(ranking[3].average_score, 0.0);
        assert_eq!(ranking[3].progress_percentage, 0.0);
        assert_eq!(ranking[1].average_score, 0.0);

        assert_eq!(ranking, course_ranking(&[d, a, e, b], &progress, &results));
    }

    #[test]
    fn average_completion_uses_enrolled_courses() {
        let u = Uuid::new_v4();
        let (c1, c2, c3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let progress = vec![prog(u, c1, 20.0), prog(u, c2, 60.0), prog(u, c3, 100.0)];
        // c3 was dropped; its record survives but does not count
        assert_eq!(average_completion(&[c1, c2], &progress), 40.0);
        assert_eq!(average_completion(&[], &progress), 0.0);
    }

    #[test]
    fn quiz_average_is_separate_from_completion() {
        let u = Uuid::new_v4();
        assert_eq!(average_quiz_score(&[]), 0.0);
        assert_eq!(average_quiz_score(&[result(u, 2), result(u, 3)]), 2.5);
    }
}
