// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{exam, history},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * Question listing is public; everything touching a session or history needs a bearer token.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let public_routes = Router::new()
        .route("/questions", get(exam::list_questions))
        .route("/categories", get(exam::list_categories));

    let session_routes = Router::new()
        .route("/sessions", post(exam::begin_session))
        .route("/sessions/current", get(exam::current_session))
        .route(
            "/sessions/{id}",
            get(exam::get_session).delete(exam::reset_session),
        )
        .route(
            "/sessions/{id}/answers/{question_id}",
            put(exam::set_answer),
        )
        .route(
            "/sessions/{id}/review/{question_id}",
            post(exam::toggle_review),
        )
        .route("/sessions/{id}/position", put(exam::navigate))
        .route("/sessions/{id}/submit", post(exam::submit_session))
        .route("/sessions/{id}/suspend", post(exam::suspend_session))
        .route("/sessions/{id}/countdown", get(exam::countdown_stream))
        .route("/submit", post(exam::submit_exam))
        .route("/history", get(history::get_history))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/exam", public_routes.merge(session_routes))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn allowed_origins(configured: &[String]) -> AllowOrigin {
    if configured.iter().any(|origin| origin == "*") {
        return AllowOrigin::any();
    }

    let origins: Vec<HeaderValue> = configured
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    AllowOrigin::list(origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        exam::{countdown::SystemClock, source::FixedQuestionSource},
    };
    use axum::{body::Body, http::Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app() -> Router {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "routes_test_secret".to_string(),
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            exam_duration_seconds: 1800,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        };
        let state = AppState::new(
            pool,
            config,
            FixedQuestionSource::builtin().unwrap(),
            Arc::new(SystemClock),
        );
        create_router(state)
    }

    #[tokio::test]
    async fn test_session_routes_need_bearer_token() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/exam/sessions/current")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_bank_serves_practice_set_with_warning() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/exam/questions?count=4")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["questions"].as_array().unwrap().len(), 4);
        assert!(body["warning"].as_str().is_some());
    }
}
