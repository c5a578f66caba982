//! Record store seam.
//!
//! Every persisted entity goes through [`RecordStore`]. Two backends exist:
//! [`postgres::PgStore`] for deployments and [`memory::MemoryStore`] for tests
//! and local runs. Backends enforce the same constraints (unique email, one
//! result per learner per assessment, one progress row per user and course)
//! and report violations as [`StoreError`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{Assessment, AssessmentResult, Course, Discussion, LikeOutcome, Progress, Reply, User},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Store = Arc<dyn RecordStore>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Linked id lists on `course` are ignored; they are derived on read.
    async fn insert_course(&self, course: &Course) -> Result<(), StoreError>;
    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError>;
    /// Ordered by creation time, then id.
    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;
    async fn update_course(
        &self,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError>;
    /// Removes the course and its progress rows. Fails with
    /// `ForeignKeyViolation` while enrollments, assessments or discussions remain.
    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Returns false when already enrolled. Creates a 0% progress row if none exists.
    async fn enroll(&self, course_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn unenroll(&self, course_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;
    async fn enrolled_course_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    async fn insert_assessment(&self, assessment: &Assessment) -> Result<(), StoreError>;
    async fn find_assessment(&self, id: Uuid) -> Result<Option<Assessment>, StoreError>;
    async fn course_assessments(&self, course_id: Uuid) -> Result<Vec<Assessment>, StoreError>;
    async fn count_assessments(&self, course_id: Uuid) -> Result<usize, StoreError>;
    async fn results_for_user(&self, user_id: Uuid) -> Result<Vec<AssessmentResult>, StoreError>;
    async fn results_for_course(&self, course_id: Uuid) -> Result<Vec<AssessmentResult>, StoreError>;

    /// Records an accepted submission and, when `increment` is given, adds it
    /// to the learner's progress in `course_id` (clamped to [0, 100]). Both
    /// writes land or neither does. A second result for the same assessment
    /// and user fails with `UniqueViolation` and changes nothing.
    async fn commit_submission(
        &self,
        course_id: Uuid,
        result: &AssessmentResult,
        increment: Option<f64>,
    ) -> Result<Option<Progress>, StoreError>;

    async fn find_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Progress>, StoreError>;
    /// Upsert; the caller passes an already clamped value.
    async fn set_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        percentage: f64,
        now: DateTime<Utc>,
    ) -> Result<Progress, StoreError>;
    /// Atomic upsert of `existing + delta`, clamped to [0, 100].
    async fn increment_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        delta: f64,
        now: DateTime<Utc>,
    ) -> Result<Progress, StoreError>;
    async fn course_progress(&self, course_id: Uuid) -> Result<Vec<Progress>, StoreError>;
    async fn user_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError>;
    async fn all_progress(&self) -> Result<Vec<Progress>, StoreError>;

    async fn insert_discussion(&self, discussion: &Discussion) -> Result<(), StoreError>;
    async fn find_discussion(&self, id: Uuid) -> Result<Option<Discussion>, StoreError>;
    async fn course_discussions(&self, course_id: Uuid) -> Result<Vec<Discussion>, StoreError>;
    /// Returns false when the discussion does not exist.
    async fn add_reply(&self, discussion_id: Uuid, reply: &Reply) -> Result<bool, StoreError>;
    /// Flips the user's like. `None` when the discussion does not exist.
    async fn toggle_like(&self, discussion_id: Uuid, user_id: Uuid) -> Result<Option<LikeOutcome>, StoreError>;
}
