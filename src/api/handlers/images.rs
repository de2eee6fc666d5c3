use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::form::read_submission;
use crate::api::handlers::response::stream_artifact;
use axum::{
    extract::{Multipart, State},
    response::Response,
};
use utoipa::ToSchema;

/// Multipart form: up to 50 images plus layout options.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ImagesToPdfForm {
    #[schema(value_type = Vec<String>)]
    files: Vec<Vec<u8>>,
    /// A4 (default), LETTER or LEGAL
    page_size: Option<String>,
    /// portrait (default) or landscape
    orientation: Option<String>,
    /// JPEG quality, 50 to 100, default 85
    quality: Option<u8>,
}

#[utoipa::path(
    post,
    path = "/api/images-to-pdf",
    request_body(content = ImagesToPdfForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "PDF with one page per image"),
        (status = 400, description = "No images, too many images, unsupported format or nothing convertible"),
        (status = 500, description = "PDF generation failed")
    ),
    tag = "images"
)]
pub async fn images_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let submission = read_submission(multipart).await?;
    let artifact = state.pipeline.images_to_pdf(submission).await?;
    stream_artifact(artifact, state.staging.clone()).await
}
