use crate::services::composer::ComposeError;
use crate::services::document_crypto::{DecryptError, EncryptError};
use crate::services::pipeline::PipelineError;
use crate::services::rasterizer::RasterError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    /// Server-side failure whose message is safe to show.
    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Processing(msg) => {
                tracing::error!("Processing error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::BadRequest(e.body_text())
        }
    }
}

impl From<DecryptError> for AppError {
    fn from(e: DecryptError) -> Self {
        match e {
            DecryptError::InvalidPassword => AppError::BadRequest(e.to_string()),
            DecryptError::VerificationFailed | DecryptError::Pdf(_) => {
                AppError::Processing(e.to_string())
            }
            DecryptError::Io(io) => AppError::Internal(io.to_string()),
        }
    }
}

impl From<EncryptError> for AppError {
    fn from(e: EncryptError) -> Self {
        match e {
            EncryptError::WeakPassword | EncryptError::AlreadyProtected => {
                AppError::BadRequest(e.to_string())
            }
            EncryptError::VerificationFailed | EncryptError::Pdf(_) => {
                AppError::Processing(e.to_string())
            }
            EncryptError::Io(io) => AppError::Internal(io.to_string()),
        }
    }
}

impl From<RasterError> for AppError {
    fn from(e: RasterError) -> Self {
        match e {
            RasterError::InvalidPassword | RasterError::PasswordRequired => {
                AppError::BadRequest(e.to_string())
            }
            RasterError::ConversionFailed(_) => AppError::Processing(e.to_string()),
            RasterError::Decrypt(inner) => inner.into(),
            RasterError::Io(io) => AppError::Internal(io.to_string()),
        }
    }
}

impl From<ComposeError> for AppError {
    fn from(e: ComposeError) -> Self {
        match e {
            ComposeError::NoImages
            | ComposeError::TooManyImages(_)
            | ComposeError::UnsupportedFormat(_)
            | ComposeError::AllImagesFailed => AppError::BadRequest(e.to_string()),
            ComposeError::Pdf(_) => AppError::Processing(e.to_string()),
            ComposeError::Io(io) => AppError::Internal(io.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(v) => AppError::BadRequest(v.message),
            PipelineError::Staging(s) => AppError::Internal(s.to_string()),
            PipelineError::Decrypt(d) => d.into(),
            PipelineError::Encrypt(enc) => enc.into(),
            PipelineError::Raster(r) => r.into(),
            PipelineError::Compose(c) => c.into(),
            PipelineError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
