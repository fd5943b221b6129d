pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::cv::{self, MAX_CV_BYTES};
use crate::preparation::handlers as preparation;
use crate::scoring::handlers as scoring;
use crate::state::AppState;
use crate::usage::handlers as usage;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Scoring API
        .route("/api/ats/score", post(scoring::handle_ats_score))
        // Preparation API
        .route(
            "/api/applications/:id/prepare",
            post(preparation::handle_prepare),
        )
        .route(
            "/api/applications/:id/preparation",
            get(preparation::handle_get_preparation),
        )
        .route(
            "/api/applications/:id/cv",
            post(cv::handlers::handle_upload_cv)
                .layer(DefaultBodyLimit::max(MAX_CV_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        // Usage API
        .route("/api/usage/stats", get(usage::handle_usage_stats))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::test_support::{harness, StubGenerator};

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn ats_request(user_id: Uuid) -> Request<Body> {
        Request::post("/api/ats/score")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "user_id": user_id,
                    "resume_text": "Go developer, Docker, Kubernetes",
                    "job_description": "Kubernetes and Docker experience"
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(StubGenerator::failing());
        let response = build_router(h.state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["service"], "prep-api");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_ats_score_then_usage_stats() {
        let h = harness(StubGenerator::new().answer(
            "match_result",
            json!({"score": 64.6, "matched_factors": ["Docker"], "missing_factors": []}),
        ));
        let user = Uuid::new_v4();
        let router = build_router(h.state.clone());

        let response = router.clone().oneshot(ats_request(user)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["score"], 65);
        assert_eq!(body["method"], "ai");
        assert!(body["recommendations"].is_array());

        let response = router
            .oneshot(
                Request::get(format!("/api/usage/stats?user_id={user}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["api_calls_today"], 1);
        assert_eq!(stats["credits_remaining"], 2);
        assert_eq!(stats["usage_by_endpoint"]["ats_score"], 1);
        assert_eq!(stats["recent_events"][0]["success"], true);
    }

    #[tokio::test]
    async fn test_ats_score_validation_error_shape() {
        let h = harness(StubGenerator::failing());
        let response = build_router(h.state)
            .oneshot(
                Request::post("/api/ats/score")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "user_id": Uuid::new_v4(),
                            "resume_text": "",
                            "job_description": "Rust"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
    }
}
