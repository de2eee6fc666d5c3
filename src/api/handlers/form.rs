use crate::api::error::AppError;
use crate::services::pipeline::{Submission, Upload};
use axum::extract::Multipart;

/// Collects every file part (any part carrying a filename) and text field, in arrival order.
pub async fn read_submission(mut multipart: Multipart) -> Result<Submission, AppError> {
    let mut submission = Submission::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field.bytes().await?;
            tracing::debug!(field = %name, file = %file_name, size = bytes.len(), "Received file part");
            submission.files.push(Upload { file_name, bytes });
        } else if !name.is_empty() {
            let value = field.text().await?;
            submission.fields.insert(name, value);
        }
    }

    Ok(submission)
}
