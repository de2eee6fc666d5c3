use crate::api::error::AppError;
use crate::services::pipeline::Artifact;
use crate::services::staging::StagingService;
use crate::utils::validation::sanitize_filename;
use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Schedules deferred release of its paths when dropped, i.e. once the body is done.
struct ReleaseGuard {
    staging: Arc<StagingService>,
    paths: Vec<PathBuf>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let paths = std::mem::take(&mut self.paths);
        tracing::debug!(count = paths.len(), "Response finished, scheduling cleanup");
        self.staging.schedule_release(paths);
    }
}

/// Streams the artifact to the client; its release obligations ride along with the body.
pub async fn stream_artifact(
    artifact: Artifact,
    staging: Arc<StagingService>,
) -> Result<Response, AppError> {
    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) => {
            staging.release_now(&artifact.release);
            return Err(AppError::Internal(format!(
                "cannot open result {}: {}",
                artifact.path.display(),
                e
            )));
        }
    };

    let guard = ReleaseGuard {
        staging,
        paths: artifact.release,
    };
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _ = &guard;
        chunk
    });
    let body = Body::from_stream(stream);

    let headers = [
        (header::CONTENT_TYPE, artifact.media_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&artifact.download_name),
        ),
    ];

    Ok((headers, body).into_response())
}

pub fn content_disposition(filename: &str) -> String {
    let filename = sanitize_filename(filename);
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() {
        "download"
    } else {
        &ascii_filename
    };

    let encoded_filename = utf8_percent_encode(&filename, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}
