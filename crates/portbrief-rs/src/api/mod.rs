use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    models::{ScanOutcome, ScanRequest},
    pipeline::PipelineError,
    security::{in_scope, is_valid_domain, is_valid_email},
    AppState,
};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "portbrief"}))
}

#[derive(Debug, Deserialize)]
pub struct ScanPayload {
    domain: String,
    email: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("target out of scope: {0}")]
    OutOfScope(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::OutOfScope(_) => StatusCode::FORBIDDEN,
            Self::Pipeline(PipelineError::Scan(_) | PipelineError::Analysis(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Pipeline(PipelineError::Email(_)) => StatusCode::BAD_GATEWAY,
            Self::Pipeline(PipelineError::Report(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::OutOfScope(_) => "out_of_scope",
            Self::Pipeline(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({"error": self.kind(), "detail": self.to_string()});
        (self.status(), Json(body)).into_response()
    }
}

fn validate(payload: ScanPayload) -> Result<ScanRequest, ApiError> {
    let domain = payload.domain.trim();
    let domain = domain.strip_suffix('.').unwrap_or(domain).to_ascii_lowercase();
    let email = payload.email.trim().to_string();
    if !is_valid_domain(&domain) {
        return Err(ApiError::InvalidInput(format!("invalid domain: {domain:?}")));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::InvalidInput(format!("invalid email: {email:?}")));
    }
    Ok(ScanRequest {
        domain,
        contact_email: email,
    })
}

pub async fn create_scan(
    State(state): State<AppState>,
    Json(payload): Json<ScanPayload>,
) -> Result<Json<ScanOutcome>, ApiError> {
    let request = validate(payload)?;

    if !in_scope(&request.domain, &state.config.scope_allowlist) {
        warn!(domain = %request.domain, "rejected out-of-scope scan request");
        return Err(ApiError::OutOfScope(request.domain));
    }

    info!(domain = %request.domain, "scan requested");
    let outcome = state.pipeline.perform_scan(&request).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        Router,
    };
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::AppConfig,
        pipeline::testing::{
            one_open_port, FakeAnalyzer, FakeScanner, Harness, RecordingMailer, ScanBehavior,
        },
        store::StoreAvailability,
    };

    const REPORT: &str = r#"{"summary":"ok","objective":"check","requirements":"authorization"}"#;

    fn app_with(harness: &Harness, allowlist: &[&str]) -> Router {
        let config = AppConfig {
            scope_allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
            ..AppConfig::default()
        };
        crate::build_router(AppState {
            config: Arc::new(config),
            pipeline: Arc::new(harness.pipeline(StoreAvailability::AVAILABLE)),
        })
    }

    fn healthy() -> Harness {
        Harness::new(
            FakeScanner::new(ScanBehavior::Succeed(one_open_port())),
            FakeAnalyzer::replying(REPORT),
        )
    }

    async fn post_scan(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                Request::post("/api/scan")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let h = healthy();
        let resp = app_with(&h, &[])
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "service": "portbrief"}));
    }

    #[tokio::test]
    async fn successful_scan_returns_outcome() {
        let h = healthy();
        let (status, json) = post_scan(
            app_with(&h, &[]),
            serde_json::json!({"domain": " Example.COM ", "email": "admin@example.com"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["domain"], "example.com");
        assert_eq!(json["reused"], false);
        assert_eq!(
            json["security_report"]["requirements"],
            serde_json::json!(["authorization"])
        );
        assert_eq!(json["scan_result"]["hosts"]["93.184.216.34"][0]["port"], 443);
        assert_eq!(h.sent().len(), 1);
    }

    #[tokio::test]
    async fn malformed_input_is_unprocessable() {
        let h = healthy();
        for body in [
            serde_json::json!({"domain": "not a domain", "email": "a@b.com"}),
            serde_json::json!({"domain": "example", "email": "a@b.com"}),
            serde_json::json!({"domain": "example.com", "email": "nobody"}),
            serde_json::json!({"domain": "example.com..", "email": "a@b.com"}),
        ] {
            let (status, json) = post_scan(app_with(&h, &[]), body).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(json["error"], "invalid_input");
        }
        assert_eq!(h.scans(), 0);
    }

    #[test]
    fn single_trailing_dot_is_dropped() {
        let request = validate(ScanPayload {
            domain: "Example.com.".into(),
            email: "admin@example.com".into(),
        })
        .unwrap();
        assert_eq!(request.domain, "example.com");
    }

    #[tokio::test]
    async fn out_of_scope_target_is_forbidden() {
        let h = healthy();
        let (status, json) = post_scan(
            app_with(&h, &["*.corp.example"]),
            serde_json::json!({"domain": "example.com", "email": "admin@example.com"}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "out_of_scope");
        assert_eq!(h.scans(), 0);
    }

    #[tokio::test]
    async fn scan_failure_maps_to_bad_request() {
        let h = Harness::new(
            FakeScanner::new(ScanBehavior::Fail("nmap exited with status 1".into())),
            FakeAnalyzer::replying(REPORT),
        );
        let (status, json) = post_scan(
            app_with(&h, &[]),
            serde_json::json!({"domain": "example.com", "email": "admin@example.com"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "scan_error");
    }

    #[tokio::test]
    async fn delivery_failure_maps_to_bad_gateway() {
        let h = Harness {
            mailer: Arc::new(RecordingMailer {
                fail: true,
                ..Default::default()
            }),
            ..healthy()
        };
        let (status, json) = post_scan(
            app_with(&h, &[]),
            serde_json::json!({"domain": "example.com", "email": "admin@example.com"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"], "email_error");
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn report_errors_are_server_errors() {
        let err = ApiError::from(PipelineError::Report("boom".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = ApiError::from(PipelineError::Analysis("timeout".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
