use crate::services::document_crypto::{DecryptError, DocumentCrypto};
use crate::services::staging::{StagedFile, StagingService};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MIN_DPI: u16 = 72;
pub const MAX_DPI: u16 = 300;
pub const DEFAULT_DPI: u16 = 200;

const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Invalid password for protected PDF")]
    InvalidPassword,

    #[error("PDF is password protected. Please provide the password.")]
    PasswordRequired,

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Failed to unlock PDF before conversion: {0}")]
    Decrypt(#[source] DecryptError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DecryptError> for RasterError {
    fn from(e: DecryptError) -> Self {
        match e {
            DecryptError::InvalidPassword => RasterError::InvalidPassword,
            other => RasterError::Decrypt(other),
        }
    }
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct RenderFailure(pub String);

impl RenderFailure {
    fn mentions_credentials(&self) -> bool {
        let message = self.0.to_lowercase();
        message.contains("password") || message.contains("encrypt")
    }
}

/// Renders every page of a document, in page order.
pub trait PageRenderer: Send + Sync {
    fn render(&self, pdf: &Path, dpi: u16) -> Result<Vec<DynamicImage>, RenderFailure>;
}

/// Page renderer backed by the pdfium shared library.
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// `library_path` may name the library file or the directory holding it.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn bind(&self) -> Result<Pdfium, RenderFailure> {
        let bindings = match &self.library_path {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        };

        bindings
            .map(Pdfium::new)
            .map_err(|e| RenderFailure(format!("pdfium library unavailable: {:?}", e)))
    }

    /// Checks that the library can be loaded.
    pub fn probe(&self) -> Result<(), RenderFailure> {
        self.bind().map(|_| ())
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render(&self, pdf: &Path, dpi: u16) -> Result<Vec<DynamicImage>, RenderFailure> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| RenderFailure(format!("{:?}", e)))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (index, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| RenderFailure(format!("page {}: {:?}", index + 1, e)))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                index + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }
        Ok(images)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Jpeg,
}

impl RasterFormat {
    /// Accepts `PNG`, `JPEG` or `JPG` in any case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PNG" => Some(RasterFormat::Png),
            "JPEG" | "JPG" => Some(RasterFormat::Jpeg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpg",
        }
    }
}

/// Archive entry name for a 1-based page index.
pub fn page_file_name(page: usize, format: RasterFormat) -> String {
    format!("page_{:03}.{}", page, format.extension())
}

#[derive(Debug)]
pub struct RasterOutput {
    pub archive: PathBuf,
    pub page_count: usize,
    /// Decrypted copy and per-page image directory, released together with the archive.
    pub intermediates: Vec<PathBuf>,
}

pub struct Rasterizer {
    staging: Arc<StagingService>,
    crypto: Arc<DocumentCrypto>,
    renderer: Arc<dyn PageRenderer>,
}

impl Rasterizer {
    pub fn new(
        staging: Arc<StagingService>,
        crypto: Arc<DocumentCrypto>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        Self {
            staging,
            crypto,
            renderer,
        }
    }

    /// Renders `source` page by page and bundles the images into a zip archive. Blocks.
    pub fn rasterize(
        &self,
        source: &StagedFile,
        dpi: u16,
        format: RasterFormat,
        password: Option<&str>,
    ) -> Result<RasterOutput, RasterError> {
        let mut intermediates = Vec::new();

        let result = self.rasterize_into(source, dpi, format, password, &mut intermediates);
        match result {
            Ok((archive, page_count)) => Ok(RasterOutput {
                archive,
                page_count,
                intermediates,
            }),
            Err(e) => {
                self.staging.release_now(&intermediates);
                Err(e)
            }
        }
    }

    fn rasterize_into(
        &self,
        source: &StagedFile,
        dpi: u16,
        format: RasterFormat,
        password: Option<&str>,
        intermediates: &mut Vec<PathBuf>,
    ) -> Result<(PathBuf, usize), RasterError> {
        let render_path = match password.filter(|p| !p.is_empty()) {
            Some(password) => {
                let unlocked = self.crypto.decrypt(source, password)?;
                intermediates.push(unlocked.path.clone());
                unlocked.path
            }
            None => source.path.clone(),
        };

        let images = self.renderer.render(&render_path, dpi).map_err(|e| {
            warn!(error = %e, "Renderer failed");
            if e.mentions_credentials() {
                RasterError::PasswordRequired
            } else {
                RasterError::ConversionFailed(e.0)
            }
        })?;

        let pages_dir = self.staging.allocate("pages", "");
        std::fs::create_dir_all(&pages_dir)?;
        intermediates.push(pages_dir.clone());

        let mut page_files = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let name = page_file_name(index + 1, format);
            let path = pages_dir.join(&name);
            write_page(image, &path, format)?;
            page_files.push((name, path));
        }

        let archive = self.staging.allocate("images", "zip");
        intermediates.push(archive.clone());
        write_archive(&archive, &page_files)?;
        intermediates.pop();

        info!(
            pages = page_files.len(),
            dpi,
            format = format.extension(),
            "Converted PDF to images"
        );
        Ok((archive, page_files.len()))
    }
}

fn write_page(image: &DynamicImage, path: &Path, format: RasterFormat) -> Result<(), RasterError> {
    let mut writer = BufWriter::new(File::create(path)?);

    let encoded = match format {
        RasterFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut writer, CompressionType::Best, FilterType::Adaptive);
            image.write_with_encoder(encoder)
        }
        RasterFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)
        }
    };
    encoded.map_err(|e| RasterError::ConversionFailed(format!("{}: {}", path.display(), e)))?;

    writer.flush()?;
    Ok(())
}

fn write_archive(archive: &Path, entries: &[(String, PathBuf)]) -> Result<(), RasterError> {
    let zip_error = |e: zip::result::ZipError| RasterError::ConversionFailed(format!("zip: {}", e));

    let mut zip = zip::ZipWriter::new(BufWriter::new(File::create(archive)?));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, path) in entries {
        zip.start_file(name.as_str(), options).map_err(zip_error)?;
        let bytes = std::fs::read(path)?;
        zip.write_all(&bytes)?;
    }

    let mut writer = zip.finish().map_err(zip_error)?;
    writer.flush()?;
    Ok(())
}
