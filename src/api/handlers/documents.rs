use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::form::read_submission;
use crate::api::handlers::response::stream_artifact;
use crate::services::pipeline::ProtectionStatus;
use axum::{
    Json,
    extract::{Multipart, State},
    response::Response,
};
use utoipa::ToSchema;

/// Multipart form: a single PDF.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct PdfUploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// Multipart form: a PDF and the password that opens it.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct RemovePasswordForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    password: String,
}

/// Multipart form: a PDF, the new user password and an optional owner password.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct AddPasswordForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// At least 4 characters
    password: String,
    /// Defaults to the user password
    owner_password: Option<String>,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct PdfToImagesForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// PNG (default), JPEG or JPG
    format: Option<String>,
    /// 72 to 300, default 200
    dpi: Option<u16>,
    /// Needed for protected documents
    password: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/check-protected",
    request_body(content = PdfUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Protection status", body = ProtectionStatus),
        (status = 400, description = "Not a PDF"),
        (status = 500, description = "Unable to analyze PDF file")
    ),
    tag = "documents"
)]
pub async fn check_protected(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProtectionStatus>, AppError> {
    let submission = read_submission(multipart).await?;
    let status = state.pipeline.check_protected(submission).await?;
    Ok(Json(status))
}

#[utoipa::path(
    post,
    path = "/api/remove-password",
    request_body(content = RemovePasswordForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Unlocked PDF"),
        (status = 400, description = "Invalid input or wrong password"),
        (status = 500, description = "Failed to remove password protection")
    ),
    tag = "documents"
)]
pub async fn remove_password(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let submission = read_submission(multipart).await?;
    let artifact = state.pipeline.remove_password(submission).await?;
    stream_artifact(artifact, state.staging.clone()).await
}

#[utoipa::path(
    post,
    path = "/api/add-password",
    request_body(content = AddPasswordForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Protected PDF"),
        (status = 400, description = "Invalid input, weak password or already protected"),
        (status = 500, description = "Failed to add password protection")
    ),
    tag = "documents"
)]
pub async fn add_password(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let submission = read_submission(multipart).await?;
    let artifact = state.pipeline.add_password(submission).await?;
    stream_artifact(artifact, state.staging.clone()).await
}

#[utoipa::path(
    post,
    path = "/api/pdf-to-images",
    request_body(content = PdfToImagesForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Zip archive with one image per page"),
        (status = 400, description = "Invalid input or missing/wrong password"),
        (status = 500, description = "Conversion failed")
    ),
    tag = "documents"
)]
pub async fn pdf_to_images(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let submission = read_submission(multipart).await?;
    let artifact = state.pipeline.pdf_to_images(submission).await?;
    stream_artifact(artifact, state.staging.clone()).await
}
