use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use courseight_runtime::{
    app,
    config::{Config, StoreBackend},
    store::MemoryStore,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_app() -> Router {
    let config = Config {
        port: 0,
        store_backend: StoreBackend::Memory,
        database_url: None,
        max_connections: 1,
        request_timeout: Duration::from_secs(5),
        body_limit: 64 * 1024,
    };
    app(Arc::new(MemoryStore::new()), &config)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string())),
        None => req.body(Body::empty()),
    }
    .expect("request");
    let res = app.clone().oneshot(req).await.expect("response");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn create_user(app: &Router, name: &str, role: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/users",
        Some(json!({"name": name, "email": format!("{name}@example.org"), "role": role})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().expect("user id").to_string()
}

#[tokio::test]
async fn health() {
    let app = test_app();
    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn quiz_lifecycle_over_http() {
    let app = test_app();
    let teacher = create_user(&app, "ada", "Instructor").await;
    let learner = create_user(&app, "bo", "student").await;

    let (status, course) = send(
        &app,
        "POST",
        "/api/courses",
        Some(json!({"title": "Rust", "description": "ownership", "instructorId": teacher})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let course_id = course["id"].as_str().unwrap().to_string();

    let (status, enrolled) = send(
        &app,
        "POST",
        &format!("/api/courses/{course_id}/enroll"),
        Some(json!({"userId": learner})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(enrolled["students"], json!([learner]));

    let (status, quiz) = send(
        &app,
        "POST",
        &format!("/api/courses/{course_id}/assessments"),
        Some(json!({
            "title": "Borrowing",
            "questions": [
                {"prompt": "q1", "kind": "multiple_choice", "options": ["a", "b"], "correctOption": 0},
                {"prompt": "q2", "kind": "multiple_choice", "options": ["a", "b"], "correctOption": 1},
                {"prompt": "q3", "kind": "true_false", "correctOption": 0}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{quiz}");
    assert_eq!(quiz["totalPoints"], 3);
    assert!(quiz["questions"][0].get("correctOption").is_none());
    assert_eq!(quiz["questions"][2]["options"], json!(["True", "False"]));
    let quiz_id = quiz["id"].as_str().unwrap().to_string();

    let submit_uri = format!("/api/assessments/{quiz_id}/submit");
    let (status, outcome) = send(
        &app,
        "POST",
        &submit_uri,
        Some(json!({"userId": learner, "answers": [0, 1, false]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["score"], 2);
    assert_eq!(outcome["totalPoints"], 3);
    assert_eq!(outcome["progress"]["progressPercentage"], 100.0);

    let (status, err) = send(
        &app,
        "POST",
        &submit_uri,
        Some(json!({"userId": learner, "answers": [0, 1, true]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(err["error"].as_str().unwrap().contains("already submitted"));

    let (status, ranking) = send(&app, "GET", &format!("/api/courses/{course_id}/ranking"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        ranking,
        json!([{"userId": learner, "progressPercentage": 100.0, "averageScore": 2.0}])
    );

    let (status, stats) =
        send(&app, "GET", &format!("/api/courses/{course_id}/stats/progress"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalUsers"], 1);
    assert_eq!(stats["courseTitle"], "Rust");

    let (status, active) = send(&app, "GET", "/api/stats/active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active[0]["activeParticipants"], 1);

    let (status, avg) = send(&app, "GET", &format!("/api/users/{learner}/average-score"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(avg["averageCompletion"], 100.0);
    assert_eq!(avg["averageQuizScore"], 2.0);
}

#[tokio::test]
async fn progress_endpoint_clamps() {
    let app = test_app();
    let teacher = create_user(&app, "ada", "admin").await;
    let learner = create_user(&app, "bo", "student").await;
    let (_, course) = send(
        &app,
        "POST",
        "/api/courses",
        Some(json!({"title": "Go", "instructorId": teacher})),
    )
    .await;
    let course_id = course["id"].as_str().unwrap();

    let uri = format!("/api/progress/{learner}/{course_id}");
    let (status, out) = send(&app, "PUT", &uri, Some(json!({"percentage": 1e9}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["progressPercentage"], 100.0);
    assert_eq!(out["applied"], true);

    // no assessments: increment is reported as not applied
    let (status, out) = send(&app, "PUT", &uri, Some(json!({"percentage": null}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["progressPercentage"], 100.0);
    assert_eq!(out["applied"], false);
}

#[tokio::test]
async fn errors_map_to_statuses() {
    let app = test_app();
    let missing = uuid::Uuid::new_v4();

    let (status, body) = send(&app, "GET", &format!("/api/courses/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/users",
        Some(json!({"name": "x", "email": "x@example.org", "role": "wizard"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/assessments/{missing}/submit"),
        Some(json!({"userId": missing, "answers": []})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // empty system: aggregates are empty lists, not errors
    let (status, body) = send(&app, "GET", "/api/stats/progress", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn malformed_bodies_are_json_bad_requests() {
    let app = test_app();
    let teacher = create_user(&app, "ada", "instructor").await;
    let (_, course) = send(
        &app,
        "POST",
        "/api/courses",
        Some(json!({"title": "Rust", "instructorId": teacher})),
    )
    .await;
    let course_id = course["id"].as_str().unwrap();

    let cases = [
        (format!("/api/courses/{course_id}/enroll"), json!({})),
        (
            format!("/api/courses/{course_id}/assessments"),
            json!({"title": "Q", "questions": [{"prompt": "p", "kind": "essay", "correctOption": 0}]}),
        ),
        (
            format!("/api/courses/{course_id}/assessments"),
            json!({"title": "Q", "questions": [{"prompt": "p", "kind": "true_false", "correctOption": 0, "points": -1}]}),
        ),
        ("/api/users".to_string(), json!({"name": "x", "role": "student"})),
    ];
    for (uri, body) in cases {
        let (status, err) = send(&app, "POST", &uri, Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} {body}");
        assert!(err["error"].is_string(), "{uri} {err}");
    }

    let req = Request::builder()
        .method("POST")
        .uri("/api/users")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let (status, err) = send(
        &app,
        "POST",
        &format!("/api/courses/{course_id}/assessments"),
        Some(json!({
            "title": "Heavy",
            "questions": [
                {"prompt": "a", "kind": "true_false", "correctOption": 0, "points": u32::MAX},
                {"prompt": "b", "kind": "true_false", "correctOption": 0, "points": 2}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("total points"));
    let (_, listed) = send(&app, "GET", &format!("/api/courses/{course_id}/assessments"), None).await;
    assert_eq!(listed, json!([]));
}
