//! Course catalog, enrollment, auto-graded assessments, progress tracking,
//! discussion forums and course analytics behind a JSON API.
//!
//! Request flow for a graded quiz: [`grading::submit_assessment`] scores the
//! answers, then records the result and the learner's progress increment in
//! one store call. [`stats`] derives rankings and course statistics from the
//! stored records on read.

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub mod catalog;
pub mod config;
pub mod db;
pub mod discussions;
pub mod error;
pub mod grading;
pub mod models;
pub mod progress;
pub mod routes;
pub mod stats;
pub mod store;

use config::Config;
use store::Store;

pub fn app(store: Store, config: &Config) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(store))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(TimeoutLayer::new(config.request_timeout))
                .layer(DefaultBodyLimit::max(config.body_limit)),
        )
}
