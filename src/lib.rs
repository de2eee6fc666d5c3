pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::config::AppConfig;
use crate::services::pipeline::Pipeline;
use crate::services::rasterizer::PageRenderer;
use crate::services::staging::StagingService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Multipart framing and text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 10 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::service_info,
        handlers::health::health_check,
        handlers::documents::check_protected,
        handlers::documents::remove_password,
        handlers::documents::add_password,
        handlers::documents::pdf_to_images,
        handlers::images::images_to_pdf,
    ),
    components(
        schemas(
            handlers::health::ServiceInfo,
            handlers::health::HealthResponse,
            handlers::documents::PdfUploadForm,
            handlers::documents::RemovePasswordForm,
            handlers::documents::AddPasswordForm,
            handlers::documents::PdfToImagesForm,
            handlers::images::ImagesToPdfForm,
            services::pipeline::ProtectionStatus,
        )
    ),
    tags(
        (name = "system", description = "Service information and health"),
        (name = "documents", description = "PDF password and rasterization endpoints"),
        (name = "images", description = "Image composition endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub staging: Arc<StagingService>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(config: AppConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        let staging = Arc::new(StagingService::new(
            config.staging_dir.clone(),
            config.cleanup_delay,
        ));
        let pipeline = Arc::new(Pipeline::new(staging.clone(), renderer));

        Self {
            config,
            staging,
            pipeline,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = state.config.max_file_size + MULTIPART_OVERHEAD;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(handlers::health::service_info))
        .route("/api/health", get(handlers::health::health_check))
        .route(
            "/api/check-protected",
            post(handlers::documents::check_protected),
        )
        .route(
            "/api/remove-password",
            post(handlers::documents::remove_password),
        )
        .route("/api/add-password", post(handlers::documents::add_password))
        .route(
            "/api/pdf-to-images",
            post(handlers::documents::pdf_to_images),
        )
        .route("/api/images-to-pdf", post(handlers::images::images_to_pdf))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([axum::http::header::CONTENT_DISPOSITION]);

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(origins)
}
