use crate::services::composer::{ComposeError, CompositionOptions, ImageComposer, LayoutSpec, validate_batch};
use crate::services::document_crypto::{DecryptError, DocumentCrypto, EncryptError};
use crate::services::rasterizer::{PageRenderer, RasterError, Rasterizer};
use crate::services::staging::{StagedFile, StagingError, StagingService};
use crate::utils::validation::{self, ValidationError};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

pub const ENGINE_NAME: &str = "lopdf";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Encrypt(#[from] EncryptError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A file part received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Every file part and text field of one request, in arrival order.
#[derive(Debug, Default)]
pub struct Submission {
    pub files: Vec<Upload>,
    pub fields: HashMap<String, String>,
}

impl Submission {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn single_file(&mut self) -> Result<Upload, ValidationError> {
        match self.files.len() {
            0 => Err(ValidationError::new("MISSING_FILE", "No file uploaded")),
            1 => Ok(self.files.remove(0)),
            n => Err(ValidationError::new(
                "TOO_MANY_FILES",
                format!("Expected a single file, got {}", n),
            )),
        }
    }

    fn single_pdf(&mut self) -> Result<Upload, ValidationError> {
        let file = self.single_file()?;
        validation::require_pdf_name(&file.file_name)?;
        Ok(file)
    }
}

/// A finished result ready for download, plus every path to release once it has been sent.
#[derive(Debug)]
pub struct Artifact {
    pub path: PathBuf,
    pub download_name: String,
    pub media_type: &'static str,
    pub release: Vec<PathBuf>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProtectionStatus {
    pub is_protected: bool,
    pub method_used: String,
    pub message: String,
}

pub struct Pipeline {
    staging: Arc<StagingService>,
    crypto: Arc<DocumentCrypto>,
    rasterizer: Arc<Rasterizer>,
    composer: Arc<ImageComposer>,
}

impl Pipeline {
    pub fn new(staging: Arc<StagingService>, renderer: Arc<dyn PageRenderer>) -> Self {
        let crypto = Arc::new(DocumentCrypto::new(staging.clone()));
        let rasterizer = Arc::new(Rasterizer::new(staging.clone(), crypto.clone(), renderer));
        let composer = Arc::new(ImageComposer::new(staging.clone()));
        Self {
            staging,
            crypto,
            rasterizer,
            composer,
        }
    }

    pub fn staging(&self) -> &Arc<StagingService> {
        &self.staging
    }

    pub async fn check_protected(
        &self,
        mut submission: Submission,
    ) -> Result<ProtectionStatus, PipelineError> {
        let file = submission.single_pdf()?;
        let staged = self.stage(&file).await?;
        info!("Checking protection status for: {}", file.file_name);

        let crypto = self.crypto.clone();
        let path = staged.path.clone();
        let outcome = self
            .run_blocking(&[], move || crypto.is_protected(&path))
            .await;
        self.staging.release_now(&[staged.path]);

        let is_protected = outcome?;
        let message = if is_protected {
            "PDF is password protected"
        } else {
            "PDF is not password protected"
        };
        info!("{}", message);

        Ok(ProtectionStatus {
            is_protected,
            method_used: ENGINE_NAME.to_string(),
            message: message.to_string(),
        })
    }

    pub async fn remove_password(&self, mut submission: Submission) -> Result<Artifact, PipelineError> {
        let file = submission.single_pdf()?;
        let password = validation::require_password(submission.field("password"))?.to_string();

        let staged = self.stage(&file).await?;
        info!(
            request_id = %staged.request_id,
            "Processing file: {}, Size: {} bytes",
            file.file_name,
            file.bytes.len()
        );

        let crypto = self.crypto.clone();
        let input = staged.clone();
        let unlocked = self
            .run_blocking(&[staged.path.clone()], move || crypto.decrypt(&input, &password))
            .await?;

        Ok(Artifact {
            path: unlocked.path.clone(),
            download_name: format!("{}_unlocked.pdf", validation::base_name(&file.file_name)),
            media_type: "application/pdf",
            release: vec![staged.path, unlocked.path],
        })
    }

    pub async fn add_password(&self, mut submission: Submission) -> Result<Artifact, PipelineError> {
        let file = submission.single_pdf()?;
        let password = validation::require_new_password(submission.field("password"))?.to_string();
        let owner_password = validation::optional_password(submission.field("owner_password")).map(str::to_string);

        let staged = self.stage(&file).await?;
        info!(
            request_id = %staged.request_id,
            owner_password = owner_password.is_some(),
            "Adding password to: {}",
            file.file_name
        );

        let crypto = self.crypto.clone();
        let input = staged.clone();
        let protected = self
            .run_blocking(&[staged.path.clone()], move || {
                crypto.encrypt(&input, &password, owner_password.as_deref())
            })
            .await?;

        Ok(Artifact {
            path: protected.path.clone(),
            download_name: format!("{}_protected.pdf", validation::base_name(&file.file_name)),
            media_type: "application/pdf",
            release: vec![staged.path, protected.path],
        })
    }

    pub async fn pdf_to_images(&self, mut submission: Submission) -> Result<Artifact, PipelineError> {
        let file = submission.single_pdf()?;
        let format = validation::parse_format(submission.field("format"))?;
        let dpi = validation::parse_dpi(submission.field("dpi"))?;
        let password = validation::optional_password(submission.field("password")).map(str::to_string);

        let staged = self.stage(&file).await?;
        info!(
            request_id = %staged.request_id,
            dpi,
            format = format.extension(),
            "Converting PDF to images: {}",
            file.file_name
        );

        let rasterizer = self.rasterizer.clone();
        let input = staged.clone();
        let output = self
            .run_blocking(&[staged.path.clone()], move || {
                rasterizer.rasterize(&input, dpi, format, password.as_deref())
            })
            .await?;

        let mut release = vec![staged.path];
        release.extend(output.intermediates);
        release.push(output.archive.clone());

        Ok(Artifact {
            path: output.archive,
            download_name: format!("{}_images.zip", validation::base_name(&file.file_name)),
            media_type: "application/zip",
            release,
        })
    }

    pub async fn images_to_pdf(&self, submission: Submission) -> Result<Artifact, PipelineError> {
        let names: Vec<&str> = submission.files.iter().map(|f| f.file_name.as_str()).collect();
        validate_batch(&names[..])?;

        let page_size = validation::parse_page_size(submission.field("page_size"))?;
        let orientation = validation::parse_orientation(submission.field("orientation"))?;
        let quality = validation::parse_quality(submission.field("quality"))?;
        let options = CompositionOptions {
            layout: LayoutSpec::new(page_size, orientation),
            quality,
        };

        let request_id = Uuid::new_v4();
        let mut staged = Vec::with_capacity(submission.files.len());
        for file in &submission.files {
            match self.staging.stage(&file.bytes, &file.file_name, request_id).await {
                Ok(s) => staged.push(s),
                Err(e) => {
                    let paths: Vec<PathBuf> = staged.iter().map(|s: &StagedFile| s.path.clone()).collect();
                    self.staging.release_now(&paths);
                    return Err(e.into());
                }
            }
        }
        let inputs: Vec<PathBuf> = staged.iter().map(|s| s.path.clone()).collect();
        info!(
            %request_id,
            images = staged.len(),
            ?page_size,
            ?orientation,
            quality,
            "Converting images to PDF"
        );

        let composer = self.composer.clone();
        let result = self
            .run_blocking(&inputs, move || composer.compose(&staged, &options))
            .await?;

        let mut release = inputs;
        release.push(result.path.clone());

        Ok(Artifact {
            path: result.path,
            download_name: "converted_images.pdf".to_string(),
            media_type: "application/pdf",
            release,
        })
    }

    async fn stage(&self, file: &Upload) -> Result<StagedFile, PipelineError> {
        let staged = self
            .staging
            .stage(&file.bytes, &file.file_name, Uuid::new_v4())
            .await?;
        Ok(staged)
    }

    /// Runs engine work on the blocking pool; on failure, `inputs` are released immediately.
    async fn run_blocking<T, E, F>(&self, inputs: &[PathBuf], work: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<PipelineError> + Send + 'static,
    {
        let outcome = match tokio::task::spawn_blocking(work).await {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(PipelineError::Internal(format!("worker task failed: {}", e))),
        };

        if outcome.is_err() {
            self.staging.release_now(inputs);
        }
        outcome
    }
}
