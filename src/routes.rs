use axum::{
    extract::{FromRequest, Path, State},
    routing::{get, post, put},
    Json, Router,
};
use http::StatusCode;
use uuid::Uuid;

use crate::{
    catalog, discussions,
    error::{AppError, AppResult},
    grading,
    models::*,
    progress, stats,
    store::Store,
};

/// `Json` whose rejections (malformed body, missing field, wrong type) are
/// reported as `InvalidInput`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
struct AppJson<T>(T);

pub fn router(store: Store) -> Router {
    Router::new()
        // users
        .route("/api/users", post(create_user))
        .route("/api/users/:id", get(get_user))
        .route("/api/users/:id/average-score", get(user_average_score))
        // catalog + enrollment
        .route("/api/courses", post(create_course).get(list_courses))
        .route(
            "/api/courses/:id",
            get(get_course).patch(update_course).delete(delete_course),
        )
        .route("/api/courses/:id/enroll", post(enroll))
        .route("/api/courses/:id/unenroll", post(unenroll))
        // analytics
        .route("/api/courses/:id/ranking", get(course_ranking))
        .route("/api/courses/:id/stats/progress", get(course_progress_stats))
        .route("/api/courses/:id/stats/active", get(course_active_participants))
        .route("/api/stats/progress", get(all_progress_stats))
        .route("/api/stats/active", get(all_active_participants))
        // assessments
        .route(
            "/api/courses/:id/assessments",
            post(create_assessment).get(list_assessments),
        )
        .route("/api/assessments/:id", get(get_assessment))
        .route("/api/assessments/:id/results", get(list_results))
        .route("/api/assessments/:id/submit", post(submit_assessment))
        .route("/api/progress/:user_id/:course_id", put(update_progress))
        // discussions
        .route(
            "/api/courses/:id/discussions",
            post(create_discussion).get(list_discussions),
        )
        .route("/api/discussions/:id", get(get_discussion))
        .route("/api/discussions/:id/replies", post(add_reply))
        .route("/api/discussions/:id/like", post(toggle_like))
        .with_state(store)
}

// --- users ---

async fn create_user(
    State(store): State<Store>,
    AppJson(req): AppJson<CreateUserReq>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = catalog::create_user(store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(store): State<Store>, Path(id): Path<Uuid>) -> AppResult<Json<UserProfile>> {
    Ok(Json(catalog::get_user(store.as_ref(), id).await?))
}

async fn user_average_score(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserAverages>> {
    Ok(Json(stats::get_user_averages(store.as_ref(), id).await?))
}

// --- courses ---

async fn create_course(
    State(store): State<Store>,
    AppJson(req): AppJson<CreateCourseReq>,
) -> AppResult<(StatusCode, Json<Course>)> {
    let course = catalog::create_course(store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn list_courses(State(store): State<Store>) -> AppResult<Json<Vec<Course>>> {
    Ok(Json(catalog::list_courses(store.as_ref()).await?))
}

async fn get_course(State(store): State<Store>, Path(id): Path<Uuid>) -> AppResult<Json<Course>> {
    Ok(Json(catalog::get_course(store.as_ref(), id).await?))
}

async fn update_course(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<UpdateCourseReq>,
) -> AppResult<Json<Course>> {
    Ok(Json(catalog::update_course(store.as_ref(), id, req).await?))
}

async fn delete_course(State(store): State<Store>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    catalog::delete_course(store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enroll(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<EnrollReq>,
) -> AppResult<Json<Course>> {
    Ok(Json(catalog::enroll(store.as_ref(), id, req.user_id).await?))
}

async fn unenroll(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<EnrollReq>,
) -> AppResult<Json<Course>> {
    Ok(Json(catalog::unenroll(store.as_ref(), id, req.user_id).await?))
}

// --- analytics ---

async fn course_ranking(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<RankingEntry>>> {
    Ok(Json(stats::get_course_ranking(store.as_ref(), id).await?))
}

async fn course_progress_stats(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CourseProgressStats>> {
    stats::get_progress_statistics(store.as_ref(), Some(id))
        .await?
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("course {id}")))
}

async fn all_progress_stats(State(store): State<Store>) -> AppResult<Json<Vec<CourseProgressStats>>> {
    Ok(Json(stats::get_progress_statistics(store.as_ref(), None).await?))
}

async fn course_active_participants(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ActiveParticipants>> {
    stats::get_active_participants(store.as_ref(), Some(id))
        .await?
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("course {id}")))
}

async fn all_active_participants(State(store): State<Store>) -> AppResult<Json<Vec<ActiveParticipants>>> {
    Ok(Json(stats::get_active_participants(store.as_ref(), None).await?))
}

// --- assessments + progress ---

async fn create_assessment(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<CreateAssessmentReq>,
) -> AppResult<(StatusCode, Json<AssessmentView>)> {
    let view = catalog::create_assessment(store.as_ref(), id, req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_assessments(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<AssessmentView>>> {
    Ok(Json(catalog::list_course_assessments(store.as_ref(), id).await?))
}

async fn get_assessment(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AssessmentView>> {
    Ok(Json(catalog::get_assessment(store.as_ref(), id).await?))
}

async fn list_results(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<AssessmentResult>>> {
    Ok(Json(catalog::list_results(store.as_ref(), id).await?))
}

async fn submit_assessment(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<SubmitReq>,
) -> AppResult<Json<SubmissionOutcome>> {
    Ok(Json(
        grading::submit_assessment(store.as_ref(), id, req.user_id, &req.answers).await?,
    ))
}

async fn update_progress(
    State(store): State<Store>,
    Path((user_id, course_id)): Path<(Uuid, Uuid)>,
    AppJson(req): AppJson<UpdateProgressReq>,
) -> AppResult<Json<ProgressOutcome>> {
    Ok(Json(
        progress::update_progress(store.as_ref(), user_id, course_id, req.percentage).await?,
    ))
}

// --- discussions ---

async fn create_discussion(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<CreateDiscussionReq>,
) -> AppResult<(StatusCode, Json<Discussion>)> {
    let discussion = discussions::create_discussion(store.as_ref(), id, req).await?;
    Ok((StatusCode::CREATED, Json(discussion)))
}

async fn list_discussions(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Discussion>>> {
    Ok(Json(discussions::list_course_discussions(store.as_ref(), id).await?))
}

async fn get_discussion(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Discussion>> {
    Ok(Json(discussions::get_discussion(store.as_ref(), id).await?))
}

async fn add_reply(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<ReplyReq>,
) -> AppResult<(StatusCode, Json<Discussion>)> {
    let discussion = discussions::add_reply(store.as_ref(), id, req).await?;
    Ok((StatusCode::CREATED, Json(discussion)))
}

async fn toggle_like(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<LikeReq>,
) -> AppResult<Json<LikeOutcome>> {
    Ok(Json(discussions::toggle_like(store.as_ref(), id, req.user_id).await?))
}
