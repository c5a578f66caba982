//! Users, courses, enrollment and assessment authoring.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    grading,
    models::{
        Assessment, AssessmentResult, AssessmentView, Course, CreateAssessmentReq, CreateCourseReq,
        CreateUserReq, Enrollment, Role, UpdateCourseReq, User, UserProfile,
    },
    store::RecordStore,
};

pub(crate) fn required(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) async fn require_user(store: &dyn RecordStore, user_id: Uuid) -> AppResult<User> {
    store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {user_id}")))
}

pub(crate) async fn require_course(store: &dyn RecordStore, course_id: Uuid) -> AppResult<Course> {
    store
        .find_course(course_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("course {course_id}")))
}

pub async fn create_user(store: &dyn RecordStore, req: CreateUserReq) -> AppResult<User> {
    let role = Role::parse(&req.role)
        .ok_or_else(|| AppError::invalid(format!("unknown role '{}'", req.role)))?;
    let email = required("email", &req.email)?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(AppError::invalid("email must contain '@'"));
    }
    let user = User {
        id: Uuid::new_v4(),
        name: required("name", &req.name)?,
        email,
        role,
        created_at: Utc::now(),
    };
    store.insert_user(&user).await?;
    info!(user_id = %user.id, role = user.role.as_str(), "user created");
    Ok(user)
}

pub async fn get_user(store: &dyn RecordStore, user_id: Uuid) -> AppResult<UserProfile> {
    let user = require_user(store, user_id).await?;
    let enrolled = store.enrolled_course_ids(user_id).await?;
    let progress = store.user_progress(user_id).await?;
    let enrollments = enrolled
        .into_iter()
        .map(|course_id| Enrollment {
            course_id,
            progress_percentage: progress
                .iter()
                .find(|p| p.course_id == course_id)
                .map_or(0.0, |p| p.progress_percentage),
        })
        .collect();
    Ok(UserProfile { user, enrollments })
}

pub async fn create_course(store: &dyn RecordStore, req: CreateCourseReq) -> AppResult<Course> {
    let title = required("title", &req.title)?;
    let instructor = store
        .find_user(req.instructor_id)
        .await?
        .ok_or_else(|| AppError::invalid(format!("instructor {} does not exist", req.instructor_id)))?;
    if !instructor.role.can_teach() {
        return Err(AppError::invalid(format!(
            "user {} is a {} and cannot own a course",
            instructor.id,
            instructor.role.as_str()
        )));
    }

    let now = Utc::now();
    let course = Course {
        id: Uuid::new_v4(),
        title,
        description: req.description.unwrap_or_default().trim().to_string(),
        instructor_id: instructor.id,
        students: vec![],
        assessment_ids: vec![],
        discussion_ids: vec![],
        created_at: now,
        updated_at: now,
    };
    store.insert_course(&course).await?;
    info!(course_id = %course.id, instructor_id = %course.instructor_id, "course created");
    Ok(course)
}

pub async fn list_courses(store: &dyn RecordStore) -> AppResult<Vec<Course>> {
    Ok(store.list_courses().await?)
}

pub async fn get_course(store: &dyn RecordStore, course_id: Uuid) -> AppResult<Course> {
    require_course(store, course_id).await
}

pub async fn update_course(store: &dyn RecordStore, course_id: Uuid, req: UpdateCourseReq) -> AppResult<Course> {
    let title = req.title.as_deref().map(|t| required("title", t)).transpose()?;
    let description = req.description.as_deref().map(str::trim);
    store
        .update_course(course_id, title.as_deref(), description, Utc::now())
        .await?
        .ok_or_else(|| AppError::not_found(format!("course {course_id}")))
}

/// Only a course nothing refers to any more can be deleted.
pub async fn delete_course(store: &dyn RecordStore, course_id: Uuid) -> AppResult<()> {
    let course = require_course(store, course_id).await?;
    let blockers: Vec<String> = [
        ("enrolled students", course.students.len()),
        ("assessments", course.assessment_ids.len()),
        ("discussions", course.discussion_ids.len()),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(what, n)| format!("{n} {what}"))
    .collect();
    if !blockers.is_empty() {
        return Err(AppError::Conflict(format!(
            "course {course_id} still has {}",
            blockers.join(", ")
        )));
    }
    if !store.delete_course(course_id).await? {
        return Err(AppError::not_found(format!("course {course_id}")));
    }
    info!(%course_id, "course deleted");
    Ok(())
}

pub async fn enroll(store: &dyn RecordStore, course_id: Uuid, user_id: Uuid) -> AppResult<Course> {
    require_course(store, course_id).await?;
    require_user(store, user_id).await?;
    if store.enroll(course_id, user_id, Utc::now()).await? {
        info!(%course_id, %user_id, "enrolled");
    }
    require_course(store, course_id).await
}

pub async fn unenroll(store: &dyn RecordStore, course_id: Uuid, user_id: Uuid) -> AppResult<Course> {
    require_course(store, course_id).await?;
    if !store.unenroll(course_id, user_id).await? {
        return Err(AppError::not_found(format!(
            "enrollment of user {user_id} in course {course_id}"
        )));
    }
    info!(%course_id, %user_id, "unenrolled");
    require_course(store, course_id).await
}

pub async fn create_assessment(
    store: &dyn RecordStore,
    course_id: Uuid,
    req: CreateAssessmentReq,
) -> AppResult<AssessmentView> {
    require_course(store, course_id).await?;
    let assessment = Assessment {
        id: Uuid::new_v4(),
        course_id,
        title: required("title", &req.title)?,
        questions: grading::validate_questions(req.questions)?,
        results: vec![],
        created_at: Utc::now(),
    };
    store.insert_assessment(&assessment).await?;
    info!(assessment_id = %assessment.id, %course_id, questions = assessment.questions.len(), "assessment created");
    Ok(AssessmentView::from(&assessment))
}

pub async fn get_assessment(store: &dyn RecordStore, assessment_id: Uuid) -> AppResult<AssessmentView> {
    store
        .find_assessment(assessment_id)
        .await?
        .map(|a| AssessmentView::from(&a))
        .ok_or_else(|| AppError::not_found(format!("assessment {assessment_id}")))
}

pub async fn list_course_assessments(store: &dyn RecordStore, course_id: Uuid) -> AppResult<Vec<AssessmentView>> {
    require_course(store, course_id).await?;
    Ok(store
        .course_assessments(course_id)
        .await?
        .iter()
        .map(AssessmentView::from)
        .collect())
}

pub async fn list_results(store: &dyn RecordStore, assessment_id: Uuid) -> AppResult<Vec<AssessmentResult>> {
    store
        .find_assessment(assessment_id)
        .await?
        .map(|a| a.results)
        .ok_or_else(|| AppError::not_found(format!("assessment {assessment_id}")))
}
