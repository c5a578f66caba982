use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    /// Case-insensitive; surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "instructor" => Some(Role::Instructor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }

    pub fn can_teach(&self) -> bool {
        matches!(self, Role::Instructor | Role::Admin)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub course_id: Uuid,
    pub progress_percentage: f64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub enrollments: Vec<Enrollment>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub instructor_id: Uuid,
    pub students: Vec<Uuid>,
    pub assessment_ids: Vec<Uuid>,
    pub discussion_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_option: usize,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

pub const TRUE_FALSE_OPTIONS: [&str; 2] = ["True", "False"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub score: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
    pub results: Vec<AssessmentResult>,
    pub created_at: DateTime<Utc>,
}

impl Assessment {
    pub fn total_points(&self) -> u32 {
        self.questions
            .iter()
            .fold(0u32, |acc, q| acc.saturating_add(q.points))
    }
}

/// What a learner sees: the answer key and other learners' results are withheld.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentView {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub questions: Vec<QuestionView>,
    pub total_points: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub points: u32,
}

impl From<&Assessment> for AssessmentView {
    fn from(a: &Assessment) -> Self {
        Self {
            id: a.id,
            course_id: a.course_id,
            title: a.title.clone(),
            questions: a
                .questions
                .iter()
                .map(|q| QuestionView {
                    prompt: q.prompt.clone(),
                    kind: q.kind,
                    options: q.options.clone(),
                    points: q.points,
                })
                .collect(),
            total_points: a.total_points(),
            created_at: a.created_at,
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub progress_percentage: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Discussion {
    pub id: Uuid,
    pub course_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub replies: Vec<Reply>,
    pub likes: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

// --- requests ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserReq {
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseReq {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub instructor_id: Uuid,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCourseReq {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EnrollReq {
    pub user_id: Uuid,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssessmentReq {
    pub title: String,
    pub questions: Vec<Question>,
}

/// `answers` stays untyped so that shape errors surface as `InvalidInput`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReq {
    pub user_id: Uuid,
    pub answers: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgressReq {
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiscussionReq {
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReplyReq {
    pub author_id: Uuid,
    pub content: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LikeReq {
    pub user_id: Uuid,
}

// --- responses ---

#[skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOutcome {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub progress_percentage: f64,
    pub last_updated: Option<DateTime<Utc>>,
    /// false when the increment policy had nothing to apply
    pub applied: bool,
}

impl ProgressOutcome {
    pub fn applied(p: Progress) -> Self {
        Self {
            user_id: p.user_id,
            course_id: p.course_id,
            progress_percentage: p.progress_percentage,
            last_updated: Some(p.last_updated),
            applied: true,
        }
    }

    pub fn unchanged(user_id: Uuid, course_id: Uuid, existing: Option<Progress>) -> Self {
        Self {
            user_id,
            course_id,
            progress_percentage: existing.as_ref().map_or(0.0, |p| p.progress_percentage),
            last_updated: existing.map(|p| p.last_updated),
            applied: false,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub score: u32,
    pub total_points: u32,
    pub progress: ProgressOutcome,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub user_id: Uuid,
    pub progress_percentage: f64,
    pub average_score: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAverages {
    pub user_id: Uuid,
    pub average_completion: f64,
    pub average_quiz_score: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressStats {
    pub course_id: Uuid,
    pub course_title: String,
    pub total_users: usize,
    pub average_progress: f64,
    pub min_progress: f64,
    pub max_progress: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveParticipants {
    pub course_id: Uuid,
    pub course_title: String,
    pub active_participants: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_case_normalized() {
        assert_eq!(Role::parse("Student"), Some(Role::Student));
        assert_eq!(Role::parse(" INSTRUCTOR "), Some(Role::Instructor));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("teacher"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn question_points_default_to_one() {
        let q: Question = serde_json::from_value(serde_json::json!({
            "prompt": "2 + 2?",
            "kind": "multiple_choice",
            "options": ["3", "4"],
            "correctOption": 1
        }))
        .unwrap();
        assert_eq!(q.points, 1);
    }

    #[test]
    fn student_view_hides_answer_key() {
        let a = Assessment {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            title: "Quiz".into(),
            questions: vec![Question {
                prompt: "Sky is blue".into(),
                kind: QuestionKind::TrueFalse,
                options: vec!["True".into(), "False".into()],
                correct_option: 0,
                points: 2,
            }],
            results: vec![],
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(AssessmentView::from(&a)).unwrap();
        assert_eq!(v["totalPoints"], 2);
        assert!(v["questions"][0].get("correctOption").is_none());
        assert!(v.get("results").is_none());
    }

    #[test]
    fn unchanged_progress_omits_missing_timestamp() {
        let out = ProgressOutcome::unchanged(Uuid::nil(), Uuid::nil(), None);
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["progressPercentage"], 0.0);
        assert_eq!(v["applied"], false);
        assert!(v.get("lastUpdated").is_none());
    }
}
