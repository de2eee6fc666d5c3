use crate::AppState;
use crate::services::pipeline::ENGINE_NAME;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
    pub engine: String,
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub engine: String,
    pub staging: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "system"
)]
pub async fn service_info() -> impl IntoResponse {
    let endpoints = [
        ("remove_password", "/api/remove-password"),
        ("add_password", "/api/add-password"),
        ("check_protected", "/api/check-protected"),
        ("pdf_to_images", "/api/pdf-to-images"),
        ("images_to_pdf", "/api/images-to-pdf"),
        ("health", "/api/health"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Json(ServiceInfo {
        message: "PDF Unlocker API is running!".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: ENGINE_NAME.to_string(),
        endpoints,
    })
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let staging_status = if state.staging.root().is_dir() {
        "ready"
    } else {
        "missing"
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "pdf-unlocker".to_string(),
        engine: ENGINE_NAME.to_string(),
        staging: staging_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
