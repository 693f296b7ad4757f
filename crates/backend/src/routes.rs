use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::kpi;

/// Конфигурация всех роутов приложения
pub fn configure_routes() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // ========================================
        // KPI EVALUATION
        // ========================================
        .route(
            "/api/kpi/definitions/:id/evaluate",
            post(kpi::evaluate_definition),
        )
        .route(
            "/api/kpi/definitions/:id/validate",
            get(kpi::validate_definition),
        )
        .route("/api/kpi/metrics/:id/evaluate", post(kpi::evaluate_metric))
        // ========================================
        // KPI CONFIGURATION
        // ========================================
        .route("/api/kpi/sources", post(kpi::upsert_source))
        .route("/api/kpi/sources/:id", get(kpi::get_source))
        .route("/api/kpi/metrics", post(kpi::upsert_metric))
        .route("/api/kpi/metrics/:id", get(kpi::get_metric))
        .route("/api/kpi/definitions", post(kpi::upsert_definition))
        .route("/api/kpi/definitions/:id", get(kpi::get_definition))
        .route("/api/kpi/dashboards", post(kpi::upsert_dashboard))
        .route("/api/kpi/dashboards/:id", get(kpi::get_dashboard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_responds() {
        let response = configure_routes()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_evaluation_routes_reject_malformed_ids() {
        let owner = uuid::Uuid::new_v4();
        let request = Request::builder()
            .method("POST")
            .uri("/api/kpi/definitions/not-a-uuid/evaluate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(format!("{{\"owner_id\": \"{}\"}}", owner)))
            .unwrap();
        let response = configure_routes().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .uri(format!("/api/kpi/metrics/not-a-uuid?owner_id={}", owner))
            .body(Body::empty())
            .unwrap();
        let response = configure_routes().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
