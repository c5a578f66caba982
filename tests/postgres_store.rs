//! Runs against a live PostgreSQL instance:
//! `DATABASE_URL=postgres://... cargo test --test postgres_store -- --ignored`

use std::time::Duration;

use chrono::Utc;
use courseight_runtime::{
    catalog,
    config::{Config, StoreBackend},
    db,
    error::{AppError, StoreError},
    grading,
    models::{
        AssessmentResult, CreateAssessmentReq, CreateCourseReq, CreateUserReq, Question,
        QuestionKind, User,
    },
    progress,
    store::{PgStore, RecordStore},
};
use serde_json::json;
use uuid::Uuid;

async fn pg_store() -> PgStore {
    let config = Config {
        port: 0,
        store_backend: StoreBackend::Postgres,
        database_url: std::env::var("DATABASE_URL").ok(),
        max_connections: 4,
        request_timeout: Duration::from_secs(5),
        body_limit: 64 * 1024,
    };
    PgStore::new(db::connect(&config).await.expect("postgres"))
}

async fn user(store: &dyn RecordStore, role: &str) -> User {
    let tag = Uuid::new_v4().simple().to_string();
    catalog::create_user(
        store,
        CreateUserReq {
            name: format!("user-{tag}"),
            email: format!("{tag}@example.org"),
            role: role.into(),
        },
    )
    .await
    .expect("create user")
}

fn tf() -> Question {
    Question {
        prompt: "true?".into(),
        kind: QuestionKind::TrueFalse,
        options: vec![],
        correct_option: 0,
        points: 1,
    }
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn increment_upsert_clamps_and_snaps() {
    let store = pg_store().await;
    let teacher = user(&store, "instructor").await;
    let learner = user(&store, "student").await;
    let course = catalog::create_course(
        &store,
        CreateCourseReq {
            title: "Pg".into(),
            description: None,
            instructor_id: teacher.id,
        },
    )
    .await
    .unwrap();

    let now = Utc::now();
    let third = 100.0 / 3.0;
    let mut last = 0.0;
    for _ in 0..3 {
        last = store
            .increment_progress(learner.id, course.id, third, now)
            .await
            .unwrap()
            .progress_percentage;
    }
    assert_eq!(last, 100.0);

    let over = store
        .increment_progress(learner.id, course.id, third, now)
        .await
        .unwrap();
    assert_eq!(over.progress_percentage, 100.0);

    let under = store
        .increment_progress(learner.id, course.id, -500.0, now)
        .await
        .unwrap();
    assert_eq!(under.progress_percentage, 0.0);

    let set = progress::update_progress(&store, learner.id, course.id, Some(1e9))
        .await
        .unwrap();
    assert_eq!(set.progress_percentage, 100.0);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn second_result_row_is_a_unique_violation() {
    let store = pg_store().await;
    let teacher = user(&store, "admin").await;
    let learner = user(&store, "student").await;
    let course = catalog::create_course(
        &store,
        CreateCourseReq {
            title: "Pg".into(),
            description: None,
            instructor_id: teacher.id,
        },
    )
    .await
    .unwrap();
    let quiz = catalog::create_assessment(
        &store,
        course.id,
        CreateAssessmentReq {
            title: "Q".into(),
            questions: vec![tf(), tf()],
        },
    )
    .await
    .unwrap();

    let out = grading::submit_assessment(&store, quiz.id, learner.id, &json!([true, 1]))
        .await
        .unwrap();
    assert_eq!(out.score, 1);
    assert_eq!(out.progress.progress_percentage, 100.0);

    let again = grading::submit_assessment(&store, quiz.id, learner.id, &json!([true, true])).await;
    assert!(matches!(again, Err(AppError::DuplicateSubmission)));

    let raw = store
        .commit_submission(
            course.id,
            &AssessmentResult {
                assessment_id: quiz.id,
                user_id: learner.id,
                score: 2,
                submitted_at: Utc::now(),
            },
            Some(50.0),
        )
        .await;
    assert!(matches!(raw, Err(StoreError::UniqueViolation(_))));

    let results = store.results_for_user(learner.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].score, 1);
}
