use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::RecordStore;
use crate::{
    error::StoreError,
    models::{Assessment, AssessmentResult, Course, Discussion, LikeOutcome, Progress, Reply, User},
    progress::clamp_percentage,
};

struct CourseRow {
    id: Uuid,
    title: String,
    description: String,
    instructor_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

struct AssessmentRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    questions: Vec<crate::models::Question>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, CourseRow>,
    // (course, user) -> enrolled_at
    enrollments: BTreeMap<(Uuid, Uuid), DateTime<Utc>>,
    assessments: HashMap<Uuid, AssessmentRow>,
    // (assessment, user)
    results: BTreeMap<(Uuid, Uuid), AssessmentResult>,
    // (user, course)
    progress: BTreeMap<(Uuid, Uuid), Progress>,
    discussions: HashMap<Uuid, Discussion>,
}

impl Tables {
    fn course(&self, row: &CourseRow) -> Course {
        let mut students: Vec<(DateTime<Utc>, Uuid)> = self
            .enrollments
            .iter()
            .filter(|((c, _), _)| *c == row.id)
            .map(|((_, u), at)| (*at, *u))
            .collect();
        students.sort();

        let mut assessments: Vec<(DateTime<Utc>, Uuid)> = self
            .assessments
            .values()
            .filter(|a| a.course_id == row.id)
            .map(|a| (a.created_at, a.id))
            .collect();
        assessments.sort();

        let mut discussions: Vec<(DateTime<Utc>, Uuid)> = self
            .discussions
            .values()
            .filter(|d| d.course_id == row.id)
            .map(|d| (d.created_at, d.id))
            .collect();
        discussions.sort();

        Course {
            id: row.id,
            title: row.title.clone(),
            description: row.description.clone(),
            instructor_id: row.instructor_id,
            students: students.into_iter().map(|(_, id)| id).collect(),
            assessment_ids: assessments.into_iter().map(|(_, id)| id).collect(),
            discussion_ids: discussions.into_iter().map(|(_, id)| id).collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    fn assessment(&self, row: &AssessmentRow) -> Assessment {
        let mut results: Vec<AssessmentResult> = self
            .results
            .values()
            .filter(|r| r.assessment_id == row.id)
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then(a.user_id.cmp(&b.user_id))
        });
        Assessment {
            id: row.id,
            course_id: row.course_id,
            title: row.title.clone(),
            questions: row.questions.clone(),
            results,
            created_at: row.created_at,
        }
    }

    fn require_user(&self, id: Uuid) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("user {id}")))
        }
    }

    fn require_course(&self, id: Uuid) -> Result<(), StoreError> {
        if self.courses.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("course {id}")))
        }
    }

    fn increment(&mut self, user_id: Uuid, course_id: Uuid, delta: f64, now: DateTime<Utc>) -> Progress {
        let entry = self
            .progress
            .entry((user_id, course_id))
            .or_insert_with(|| Progress {
                user_id,
                course_id,
                progress_percentage: 0.0,
                last_updated: now,
            });
        entry.progress_percentage = clamp_percentage(entry.progress_percentage + delta);
        entry.last_updated = now;
        entry.clone()
    }
}

/// In-process store. One lock guards every table, so each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation(format!("email {}", user.email)));
        }
        if t.users.contains_key(&user.id) {
            return Err(StoreError::UniqueViolation(format!("user {}", user.id)));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn insert_course(&self, course: &Course) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        t.require_user(course.instructor_id)?;
        if t.courses.contains_key(&course.id) {
            return Err(StoreError::UniqueViolation(format!("course {}", course.id)));
        }
        t.courses.insert(
            course.id,
            CourseRow {
                id: course.id,
                title: course.title.clone(),
                description: course.description.clone(),
                instructor_id: course.instructor_id,
                created_at: course.created_at,
                updated_at: course.updated_at,
            },
        );
        Ok(())
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.courses.get(&id).map(|row| t.course(row)))
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let t = self.tables.lock().await;
        let mut rows: Vec<&CourseRow> = t.courses.values().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows.into_iter().map(|row| t.course(row)).collect())
    }

    async fn update_course(
        &self,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError> {
        let mut t = self.tables.lock().await;
        let Some(row) = t.courses.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = title {
            row.title = title.to_string();
        }
        if let Some(description) = description {
            row.description = description.to_string();
        }
        row.updated_at = now;
        let t = &*t;
        Ok(t.courses.get(&id).map(|row| t.course(row)))
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().await;
        if !t.courses.contains_key(&id) {
            return Ok(false);
        }
        let referenced = t.enrollments.keys().any(|(c, _)| *c == id)
            || t.assessments.values().any(|a| a.course_id == id)
            || t.discussions.values().any(|d| d.course_id == id);
        if referenced {
            return Err(StoreError::ForeignKeyViolation(format!("course {id} is still referenced")));
        }
        t.progress.retain(|(_, c), _| *c != id);
        t.courses.remove(&id);
        Ok(true)
    }

    async fn enroll(&self, course_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().await;
        t.require_course(course_id)?;
        t.require_user(user_id)?;
        if t.enrollments.contains_key(&(course_id, user_id)) {
            return Ok(false);
        }
        t.enrollments.insert((course_id, user_id), now);
        t.progress.entry((user_id, course_id)).or_insert_with(|| Progress {
            user_id,
            course_id,
            progress_percentage: 0.0,
            last_updated: now,
        });
        Ok(true)
    }

    async fn unenroll(&self, course_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .enrollments
            .remove(&(course_id, user_id))
            .is_some())
    }

    async fn enrolled_course_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let t = self.tables.lock().await;
        let mut ids: Vec<(DateTime<Utc>, Uuid)> = t
            .enrollments
            .iter()
            .filter(|((_, u), _)| *u == user_id)
            .map(|((c, _), at)| (*at, *c))
            .collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn insert_assessment(&self, assessment: &Assessment) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        t.require_course(assessment.course_id)?;
        if t.assessments.contains_key(&assessment.id) {
            return Err(StoreError::UniqueViolation(format!("assessment {}", assessment.id)));
        }
        t.assessments.insert(
            assessment.id,
            AssessmentRow {
                id: assessment.id,
                course_id: assessment.course_id,
                title: assessment.title.clone(),
                questions: assessment.questions.clone(),
                created_at: assessment.created_at,
            },
        );
        Ok(())
    }

    async fn find_assessment(&self, id: Uuid) -> Result<Option<Assessment>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.assessments.get(&id).map(|row| t.assessment(row)))
    }

    async fn course_assessments(&self, course_id: Uuid) -> Result<Vec<Assessment>, StoreError> {
        let t = self.tables.lock().await;
        let mut rows: Vec<&AssessmentRow> = t
            .assessments
            .values()
            .filter(|a| a.course_id == course_id)
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows.into_iter().map(|row| t.assessment(row)).collect())
    }

    async fn count_assessments(&self, course_id: Uuid) -> Result<usize, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.assessments.values().filter(|a| a.course_id == course_id).count())
    }

    async fn results_for_user(&self, user_id: Uuid) -> Result<Vec<AssessmentResult>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.results
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn results_for_course(&self, course_id: Uuid) -> Result<Vec<AssessmentResult>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.results
            .values()
            .filter(|r| {
                t.assessments
                    .get(&r.assessment_id)
                    .is_some_and(|a| a.course_id == course_id)
            })
            .cloned()
            .collect())
    }

    async fn commit_submission(
        &self,
        course_id: Uuid,
        result: &AssessmentResult,
        increment: Option<f64>,
    ) -> Result<Option<Progress>, StoreError> {
        let mut t = self.tables.lock().await;
        t.require_user(result.user_id)?;
        if !t.assessments.contains_key(&result.assessment_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "assessment {}",
                result.assessment_id
            )));
        }
        let key = (result.assessment_id, result.user_id);
        if t.results.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "result for assessment {} and user {}",
                result.assessment_id, result.user_id
            )));
        }
        t.results.insert(key, result.clone());
        Ok(increment.map(|delta| t.increment(result.user_id, course_id, delta, result.submitted_at)))
    }

    async fn find_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Progress>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .progress
            .get(&(user_id, course_id))
            .cloned())
    }

    async fn set_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        percentage: f64,
        now: DateTime<Utc>,
    ) -> Result<Progress, StoreError> {
        let mut t = self.tables.lock().await;
        t.require_user(user_id)?;
        t.require_course(course_id)?;
        let p = Progress {
            user_id,
            course_id,
            progress_percentage: percentage,
            last_updated: now,
        };
        t.progress.insert((user_id, course_id), p.clone());
        Ok(p)
    }

    async fn increment_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        delta: f64,
        now: DateTime<Utc>,
    ) -> Result<Progress, StoreError> {
        let mut t = self.tables.lock().await;
        t.require_user(user_id)?;
        t.require_course(course_id)?;
        Ok(t.increment(user_id, course_id, delta, now))
    }

    async fn course_progress(&self, course_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.progress
            .values()
            .filter(|p| p.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn user_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.progress
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn all_progress(&self) -> Result<Vec<Progress>, StoreError> {
        Ok(self.tables.lock().await.progress.values().cloned().collect())
    }

    async fn insert_discussion(&self, discussion: &Discussion) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        t.require_course(discussion.course_id)?;
        t.require_user(discussion.author_id)?;
        t.discussions.insert(discussion.id, discussion.clone());
        Ok(())
    }

    async fn find_discussion(&self, id: Uuid) -> Result<Option<Discussion>, StoreError> {
        Ok(self.tables.lock().await.discussions.get(&id).cloned())
    }

    async fn course_discussions(&self, course_id: Uuid) -> Result<Vec<Discussion>, StoreError> {
        let t = self.tables.lock().await;
        let mut out: Vec<Discussion> = t
            .discussions
            .values()
            .filter(|d| d.course_id == course_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn add_reply(&self, discussion_id: Uuid, reply: &Reply) -> Result<bool, StoreError> {
        let mut t = self.tables.lock().await;
        t.require_user(reply.author_id)?;
        match t.discussions.get_mut(&discussion_id) {
            Some(d) => {
                d.replies.push(reply.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn toggle_like(&self, discussion_id: Uuid, user_id: Uuid) -> Result<Option<LikeOutcome>, StoreError> {
        let mut t = self.tables.lock().await;
        t.require_user(user_id)?;
        let Some(d) = t.discussions.get_mut(&discussion_id) else {
            return Ok(None);
        };
        let liked = match d.likes.iter().position(|u| *u == user_id) {
            Some(i) => {
                d.likes.remove(i);
                false
            }
            None => {
                d.likes.push(user_id);
                true
            }
        };
        Ok(Some(LikeOutcome {
            liked,
            likes: d.likes.len(),
        }))
    }
}
