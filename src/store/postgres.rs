use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use super::RecordStore;
use crate::{
    db::Db,
    error::StoreError,
    models::{
        Assessment, AssessmentResult, Course, Discussion, LikeOutcome, Progress, Question, Reply,
        Role, User,
    },
    progress::COMPLETION_TOLERANCE,
};

const COURSE_SELECT: &str = r#"
SELECT c.id, c.title, c.description, c.instructor_id, c.created_at, c.updated_at,
       COALESCE((SELECT array_agg(e.user_id ORDER BY e.enrolled_at, e.user_id)
                 FROM enrollments e WHERE e.course_id = c.id), '{}') AS students,
       COALESCE((SELECT array_agg(a.id ORDER BY a.created_at, a.id)
                 FROM assessments a WHERE a.course_id = c.id), '{}') AS assessment_ids,
       COALESCE((SELECT array_agg(d.id ORDER BY d.created_at, d.id)
                 FROM discussions d WHERE d.course_id = c.id), '{}') AS discussion_ids
FROM courses c
"#;

// same clamping rule as progress::clamp_percentage, applied in one statement
const INCREMENT_PROGRESS: &str = r#"
INSERT INTO progress (user_id, course_id, progress_percentage, last_updated)
VALUES ($1, $2,
        CASE WHEN $3::float8 >= 100 - $5::float8 THEN 100 ELSE GREATEST(0, $3::float8) END,
        $4)
ON CONFLICT (user_id, course_id)
DO UPDATE SET progress_percentage =
                  CASE WHEN progress.progress_percentage + $3::float8 >= 100 - $5::float8 THEN 100
                       ELSE GREATEST(0, progress.progress_percentage + $3::float8) END,
              last_updated = $4
RETURNING user_id, course_id, progress_percentage, last_updated
"#;

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&r.role)
            .ok_or_else(|| StoreError::Backend(format!("user {} has unknown role '{}'", r.id, r.role)))?;
        Ok(User {
            id: r.id,
            name: r.name,
            email: r.email,
            role,
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    description: String,
    instructor_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    students: Vec<Uuid>,
    assessment_ids: Vec<Uuid>,
    discussion_ids: Vec<Uuid>,
}

impl From<CourseRow> for Course {
    fn from(r: CourseRow) -> Self {
        Course {
            id: r.id,
            title: r.title,
            description: r.description,
            instructor_id: r.instructor_id,
            students: r.students,
            assessment_ids: r.assessment_ids,
            discussion_ids: r.discussion_ids,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AssessmentRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    questions: Json<Vec<Question>>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ResultRow {
    assessment_id: Uuid,
    user_id: Uuid,
    score: i32,
    submitted_at: DateTime<Utc>,
}

impl From<ResultRow> for AssessmentResult {
    fn from(r: ResultRow) -> Self {
        AssessmentResult {
            assessment_id: r.assessment_id,
            user_id: r.user_id,
            // column carries CHECK (score >= 0)
            score: r.score.max(0) as u32,
            submitted_at: r.submitted_at,
        }
    }
}

#[derive(FromRow)]
struct DiscussionRow {
    id: Uuid,
    course_id: Uuid,
    author_id: Uuid,
    title: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ReplyRow {
    discussion_id: Uuid,
    #[sqlx(flatten)]
    reply: Reply,
}

#[derive(FromRow)]
struct LikeRow {
    discussion_id: Uuid,
    user_id: Uuid,
}

fn assemble_assessments(rows: Vec<AssessmentRow>, results: Vec<ResultRow>) -> Vec<Assessment> {
    let mut by_assessment: HashMap<Uuid, Vec<AssessmentResult>> = HashMap::new();
    for r in results {
        by_assessment
            .entry(r.assessment_id)
            .or_default()
            .push(r.into());
    }
    rows.into_iter()
        .map(|row| Assessment {
            results: by_assessment.remove(&row.id).unwrap_or_default(),
            id: row.id,
            course_id: row.course_id,
            title: row.title,
            questions: row.questions.0,
            created_at: row.created_at,
        })
        .collect()
}

/// PostgreSQL backend. Multi-statement writes run inside a transaction, which
/// is rolled back if the request future is dropped before commit.
#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }

    async fn discussions_where(&self, filter: &str, id: Uuid) -> Result<Vec<Discussion>, StoreError> {
        let sql = format!(
            "SELECT id, course_id, author_id, title, content, created_at FROM discussions \
             WHERE {filter} = $1 ORDER BY created_at, id"
        );
        let rows: Vec<DiscussionRow> = sqlx::query_as(&sql).bind(id).fetch_all(&self.pool).await?;
        let ids: Vec<Uuid> = rows.iter().map(|d| d.id).collect();

        let replies: Vec<ReplyRow> = sqlx::query_as(
            "SELECT discussion_id, id, author_id, content, created_at FROM discussion_replies \
             WHERE discussion_id = ANY($1) ORDER BY created_at, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let likes: Vec<LikeRow> = sqlx::query_as(
            "SELECT discussion_id, user_id FROM discussion_likes \
             WHERE discussion_id = ANY($1) ORDER BY user_id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut replies_by: HashMap<Uuid, Vec<Reply>> = HashMap::new();
        for r in replies {
            replies_by.entry(r.discussion_id).or_default().push(r.reply);
        }
        let mut likes_by: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for l in likes {
            likes_by.entry(l.discussion_id).or_default().push(l.user_id);
        }

        Ok(rows
            .into_iter()
            .map(|d| Discussion {
                replies: replies_by.remove(&d.id).unwrap_or_default(),
                likes: likes_by.remove(&d.id).unwrap_or_default(),
                id: d.id,
                course_id: d.course_id,
                author_id: d.author_id,
                title: d.title,
                content: d.content,
                created_at: d.created_at,
            })
            .collect())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, name, email, role, created_at) VALUES ($1,$2,$3,$4,$5)")
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.role.as_str())
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, name, email, role, created_at FROM users WHERE id=$1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn insert_course(&self, course: &Course) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, title, description, instructor_id, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.instructor_id)
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        let sql = format!("{COURSE_SELECT} WHERE c.id = $1");
        let row: Option<CourseRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Course::from))
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let sql = format!("{COURSE_SELECT} ORDER BY c.created_at, c.id");
        let rows: Vec<CourseRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Course::from).collect())
    }

    async fn update_course(
        &self,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE courses
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_course(id).await
    }

    async fn delete_course(&self, id: Uuid) -> Result<bool, StoreError> {
        // enrollments, assessments and discussions reference courses ON DELETE RESTRICT
        let res = sqlx::query("DELETE FROM courses WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn enroll(&self, course_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO enrollments (course_id, user_id, enrolled_at) VALUES ($1,$2,$3) \
             ON CONFLICT (course_id, user_id) DO NOTHING",
        )
        .bind(course_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        sqlx::query(
            "INSERT INTO progress (user_id, course_id, progress_percentage, last_updated) \
             VALUES ($1,$2,0,$3) ON CONFLICT (user_id, course_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn unenroll(&self, course_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM enrollments WHERE course_id=$1 AND user_id=$2")
            .bind(course_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn enrolled_course_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT course_id FROM enrollments WHERE user_id=$1 ORDER BY enrolled_at, course_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_assessment(&self, assessment: &Assessment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO assessments (id, course_id, title, questions, created_at) VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(assessment.id)
        .bind(assessment.course_id)
        .bind(&assessment.title)
        .bind(Json(&assessment.questions))
        .bind(assessment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_assessment(&self, id: Uuid) -> Result<Option<Assessment>, StoreError> {
        let row: Option<AssessmentRow> = sqlx::query_as(
            "SELECT id, course_id, title, questions, created_at FROM assessments WHERE id=$1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let results: Vec<ResultRow> = sqlx::query_as(
            "SELECT assessment_id, user_id, score, submitted_at FROM assessment_results \
             WHERE assessment_id=$1 ORDER BY submitted_at, user_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(assemble_assessments(vec![row], results).pop())
    }

    async fn course_assessments(&self, course_id: Uuid) -> Result<Vec<Assessment>, StoreError> {
        let rows: Vec<AssessmentRow> = sqlx::query_as(
            "SELECT id, course_id, title, questions, created_at FROM assessments \
             WHERE course_id=$1 ORDER BY created_at, id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        let results: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT r.assessment_id, r.user_id, r.score, r.submitted_at
            FROM assessment_results r JOIN assessments a ON a.id = r.assessment_id
            WHERE a.course_id = $1
            ORDER BY r.submitted_at, r.user_id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(assemble_assessments(rows, results))
    }

    async fn count_assessments(&self, course_id: Uuid) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assessments WHERE course_id=$1")
            .bind(course_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as usize)
    }

    async fn results_for_user(&self, user_id: Uuid) -> Result<Vec<AssessmentResult>, StoreError> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            "SELECT assessment_id, user_id, score, submitted_at FROM assessment_results \
             WHERE user_id=$1 ORDER BY submitted_at, assessment_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AssessmentResult::from).collect())
    }

    async fn results_for_course(&self, course_id: Uuid) -> Result<Vec<AssessmentResult>, StoreError> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT r.assessment_id, r.user_id, r.score, r.submitted_at
            FROM assessment_results r JOIN assessments a ON a.id = r.assessment_id
            WHERE a.course_id = $1
            ORDER BY r.assessment_id, r.user_id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AssessmentResult::from).collect())
    }

    async fn commit_submission(
        &self,
        course_id: Uuid,
        result: &AssessmentResult,
        increment: Option<f64>,
    ) -> Result<Option<Progress>, StoreError> {
        let score = i32::try_from(result.score)
            .map_err(|_| StoreError::Backend(format!("score {} out of range", result.score)))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO assessment_results (assessment_id, user_id, score, submitted_at) \
             VALUES ($1,$2,$3,$4)",
        )
        .bind(result.assessment_id)
        .bind(result.user_id)
        .bind(score)
        .bind(result.submitted_at)
        .execute(&mut *tx)
        .await?;

        let progress = match increment {
            Some(delta) => Some(
                sqlx::query_as::<_, Progress>(INCREMENT_PROGRESS)
                    .bind(result.user_id)
                    .bind(course_id)
                    .bind(delta)
                    .bind(result.submitted_at)
                    .bind(COMPLETION_TOLERANCE)
                    .fetch_one(&mut *tx)
                    .await?,
            ),
            None => None,
        };
        tx.commit().await?;
        Ok(progress)
    }

    async fn find_progress(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Progress>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT user_id, course_id, progress_percentage, last_updated FROM progress \
             WHERE user_id=$1 AND course_id=$2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        percentage: f64,
        now: DateTime<Utc>,
    ) -> Result<Progress, StoreError> {
        Ok(sqlx::query_as(
            r#"
            INSERT INTO progress (user_id, course_id, progress_percentage, last_updated)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (user_id, course_id)
            DO UPDATE SET progress_percentage = EXCLUDED.progress_percentage,
                          last_updated = EXCLUDED.last_updated
            RETURNING user_id, course_id, progress_percentage, last_updated
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(percentage)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn increment_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        delta: f64,
        now: DateTime<Utc>,
    ) -> Result<Progress, StoreError> {
        Ok(sqlx::query_as(INCREMENT_PROGRESS)
            .bind(user_id)
            .bind(course_id)
            .bind(delta)
            .bind(now)
            .bind(COMPLETION_TOLERANCE)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn course_progress(&self, course_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT user_id, course_id, progress_percentage, last_updated FROM progress \
             WHERE course_id=$1 ORDER BY user_id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn user_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT user_id, course_id, progress_percentage, last_updated FROM progress \
             WHERE user_id=$1 ORDER BY course_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn all_progress(&self) -> Result<Vec<Progress>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT user_id, course_id, progress_percentage, last_updated FROM progress \
             ORDER BY user_id, course_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_discussion(&self, discussion: &Discussion) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO discussions (id, course_id, author_id, title, content, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(discussion.id)
        .bind(discussion.course_id)
        .bind(discussion.author_id)
        .bind(&discussion.title)
        .bind(&discussion.content)
        .bind(discussion.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_discussion(&self, id: Uuid) -> Result<Option<Discussion>, StoreError> {
        Ok(self.discussions_where("id", id).await?.pop())
    }

    async fn course_discussions(&self, course_id: Uuid) -> Result<Vec<Discussion>, StoreError> {
        self.discussions_where("course_id", course_id).await
    }

    async fn add_reply(&self, discussion_id: Uuid, reply: &Reply) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            INSERT INTO discussion_replies (id, discussion_id, author_id, content, created_at)
            SELECT $1, d.id, $3, $4, $5 FROM discussions d WHERE d.id = $2
            "#,
        )
        .bind(reply.id)
        .bind(discussion_id)
        .bind(reply.author_id)
        .bind(&reply.content)
        .bind(reply.created_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn toggle_like(&self, discussion_id: Uuid, user_id: Uuid) -> Result<Option<LikeOutcome>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM discussions WHERE id=$1 FOR UPDATE")
                .bind(discussion_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let removed = sqlx::query("DELETE FROM discussion_likes WHERE discussion_id=$1 AND user_id=$2")
            .bind(discussion_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if !removed {
            sqlx::query("INSERT INTO discussion_likes (discussion_id, user_id) VALUES ($1,$2)")
                .bind(discussion_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discussion_likes WHERE discussion_id=$1")
            .bind(discussion_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(LikeOutcome {
            liked: !removed,
            likes: likes.max(0) as usize,
        }))
    }
}
