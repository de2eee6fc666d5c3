//! Lays images out one per page, scaled to fit inside a fixed margin and centered.

use crate::services::staging::{StagedFile, StagingService, extension_of};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_IMAGES: usize = 50;
pub const MARGIN: f64 = 50.0;

pub const MIN_QUALITY: u8 = 50;
pub const MAX_QUALITY: u8 = 100;
pub const DEFAULT_QUALITY: u8 = 85;

pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp"];

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("No images provided")]
    NoImages,

    #[error("Maximum 50 images allowed, got {0}")]
    TooManyImages(usize),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("None of the provided images could be converted")]
    AllImagesFailed,

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    A4,
    Letter,
    Legal,
}

impl PageSize {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "A4" => Some(PageSize::A4),
            "LETTER" => Some(PageSize::Letter),
            "LEGAL" => Some(PageSize::Legal),
            _ => None,
        }
    }

    /// Portrait width and height in points.
    pub fn dimensions(self) -> (f64, f64) {
        match self {
            PageSize::A4 => (595.2756, 841.8898),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "portrait" => Some(Orientation::Portrait),
            "landscape" => Some(Orientation::Landscape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutSpec {
    pub width: f64,
    pub height: f64,
}

impl LayoutSpec {
    pub fn new(size: PageSize, orientation: Orientation) -> Self {
        let (width, height) = size.dimensions();
        match orientation {
            Orientation::Portrait => Self { width, height },
            Orientation::Landscape => Self {
                width: height,
                height: width,
            },
        }
    }

    pub fn usable_area(&self) -> (f64, f64) {
        (self.width - 2.0 * MARGIN, self.height - 2.0 * MARGIN)
    }
}

/// Where and how large an image is drawn on its page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub scale: f64,
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    /// Pixel size to resample to; only set when shrinking.
    pub resample_to: Option<(u32, u32)>,
}

pub fn place(layout: &LayoutSpec, image_width: u32, image_height: u32) -> Placement {
    let (usable_width, usable_height) = layout.usable_area();
    let (w, h) = (image_width as f64, image_height as f64);

    let scale = (usable_width / w).min(usable_height / h);
    let (width, height) = (w * scale, h * scale);

    let resample_to = (scale < 1.0).then(|| {
        (
            (width.floor() as u32).max(1),
            (height.floor() as u32).max(1),
        )
    });

    Placement {
        scale,
        width,
        height,
        x: (layout.width - width) / 2.0,
        y: (layout.height - height) / 2.0,
        resample_to,
    }
}

/// Checks the batch size and every file extension before anything is staged.
pub fn validate_batch<S: AsRef<str>>(names: &[S]) -> Result<(), ComposeError> {
    match names.len() {
        0 => return Err(ComposeError::NoImages),
        n if n > MAX_IMAGES => return Err(ComposeError::TooManyImages(n)),
        _ => {}
    }

    for name in names {
        let name = name.as_ref();
        if !ALLOWED_IMAGE_EXTENSIONS.contains(&extension_of(name).as_str()) {
            return Err(ComposeError::UnsupportedFormat(name.to_string()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct CompositionOptions {
    pub layout: LayoutSpec,
    pub quality: u8,
}

#[derive(Debug)]
pub struct ImageFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct CompositionResult {
    pub path: PathBuf,
    pub pages_emitted: usize,
    pub skipped: Vec<ImageFailure>,
}

struct PreparedImage {
    stream: Stream,
    placement: Placement,
}

pub struct ImageComposer {
    staging: Arc<StagingService>,
}

impl ImageComposer {
    pub fn new(staging: Arc<StagingService>) -> Self {
        Self { staging }
    }

    /// Builds one page per image, in input order. Images that fail are skipped. Blocks.
    pub fn compose(
        &self,
        images: &[StagedFile],
        options: &CompositionOptions,
    ) -> Result<CompositionResult, ComposeError> {
        let names: Vec<&str> = images.iter().map(|i| i.original_name.as_str()).collect();
        validate_batch(&names[..])?;

        let outcomes: Vec<Result<PreparedImage, String>> = images
            .iter()
            .map(|image| prepare_image(&image.path, options))
            .collect();

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        let mut skipped = Vec::new();

        for (image, outcome) in images.iter().zip(outcomes) {
            let prepared = match outcome {
                Ok(prepared) => prepared,
                Err(reason) => {
                    warn!(image = %image.original_name, %reason, "Failed to process image, skipping");
                    skipped.push(ImageFailure {
                        name: image.original_name.clone(),
                        reason,
                    });
                    continue;
                }
            };

            match add_page(&mut doc, pages_id, &options.layout, prepared) {
                Ok(page_id) => kids.push(Object::Reference(page_id)),
                Err(reason) => {
                    warn!(image = %image.original_name, %reason, "Failed to emit page, skipping");
                    skipped.push(ImageFailure {
                        name: image.original_name.clone(),
                        reason,
                    });
                }
            }
        }

        if kids.is_empty() {
            return Err(ComposeError::AllImagesFailed);
        }

        let pages_emitted = kids.len();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages_emitted as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let path = self.staging.allocate("composed", "pdf");
        let mut file = std::fs::File::create(&path)?;
        if let Err(e) = doc.save_to(&mut file) {
            self.staging.release_now(std::slice::from_ref(&path));
            return Err(ComposeError::Pdf(e.to_string()));
        }

        info!(
            pages = pages_emitted,
            skipped = skipped.len(),
            quality = options.quality,
            "Converted images to PDF"
        );
        Ok(CompositionResult {
            path,
            pages_emitted,
            skipped,
        })
    }
}

fn prepare_image(path: &Path, options: &CompositionOptions) -> Result<PreparedImage, String> {
    let decoded = ImageReader::open(path)
        .map_err(|e| e.to_string())?
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| e.to_string())?;

    let image = match decoded {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => decoded,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let placement = place(&options.layout, image.width(), image.height());
    let image = match placement.resample_to {
        Some((w, h)) => {
            debug!(
                from = ?(image.width(), image.height()),
                to = ?(w, h),
                "Resampling image"
            );
            image.resize_exact(w, h, FilterType::Lanczos3)
        }
        None => image,
    };

    let stream = encode_as_jpeg_stream(&image, options.quality)?;
    Ok(PreparedImage { stream, placement })
}

fn encode_as_jpeg_stream(image: &DynamicImage, quality: u8) -> Result<Stream, String> {
    let mut jpeg_bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| format!("Failed to encode JPEG: {}", e))?;

    let color_space = match image {
        DynamicImage::ImageLuma8(_) => "DeviceGray",
        _ => "DeviceRGB",
    };

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width() as i64,
        "Height" => image.height() as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8_i64,
        "Filter" => "DCTDecode",
    };
    Ok(Stream::new(dict, jpeg_bytes))
}

fn add_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    layout: &LayoutSpec,
    prepared: PreparedImage,
) -> Result<lopdf::ObjectId, String> {
    let PreparedImage { stream, placement } = prepared;
    let real = |v: f64| Object::Real(v as f32);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(placement.width),
                    0_i64.into(),
                    0_i64.into(),
                    real(placement.height),
                    real(placement.x),
                    real(placement.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content.encode().map_err(|e| e.to_string())?;

    let image_id = doc.add_object(stream);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0_i64.into(), 0_i64.into(), real(layout.width), real(layout.height)],
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
        "Contents" => content_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a4_portrait() -> LayoutSpec {
        LayoutSpec::new(PageSize::A4, Orientation::Portrait)
    }

    #[test]
    fn test_landscape_swaps_dimensions() {
        let portrait = a4_portrait();
        let landscape = LayoutSpec::new(PageSize::A4, Orientation::Landscape);
        assert_eq!(landscape.width, portrait.height);
        assert_eq!(landscape.height, portrait.width);
    }

    #[test]
    fn test_exact_fit_is_centered_without_resampling() {
        let layout = LayoutSpec::new(PageSize::Letter, Orientation::Portrait);
        let (uw, uh) = layout.usable_area();
        let placement = place(&layout, uw as u32, uh as u32);

        assert_eq!(placement.scale, 1.0);
        assert!(placement.resample_to.is_none());
        let right = layout.width - placement.x - placement.width;
        let top = layout.height - placement.y - placement.height;
        assert!((placement.x - right).abs() <= 1.0);
        assert!((placement.y - top).abs() <= 1.0);
        assert_eq!(placement.x, MARGIN);
    }

    #[test]
    fn test_oversized_image_is_resampled() {
        let layout = LayoutSpec::new(PageSize::Letter, Orientation::Portrait);
        let (uw, _) = layout.usable_area();
        let placement = place(&layout, (uw * 2.0) as u32, 100);

        assert!(placement.scale < 1.0);
        assert!((placement.scale - 0.5).abs() < 1e-9);
        assert_eq!(placement.resample_to, Some((uw as u32, 50)));
    }

    #[test]
    fn test_small_image_keeps_pixels_but_scales_box() {
        let layout = LayoutSpec::new(PageSize::Letter, Orientation::Portrait);
        let (uw, _) = layout.usable_area();
        let placement = place(&layout, (uw / 2.0) as u32, 10);

        assert!((placement.scale - 2.0).abs() < 1e-9);
        assert!(placement.resample_to.is_none());
        assert!((placement.width - uw).abs() < 1e-9);
        assert!((placement.height - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_batch_size_limits() {
        let one = vec!["a.png".to_string()];
        let fifty: Vec<String> = (0..50).map(|i| format!("{}.jpg", i)).collect();
        let fifty_one: Vec<String> = (0..51).map(|i| format!("{}.jpg", i)).collect();
        let none: Vec<String> = Vec::new();

        assert!(validate_batch(&one[..]).is_ok());
        assert!(validate_batch(&fifty[..]).is_ok());
        assert!(matches!(validate_batch(&fifty_one[..]), Err(ComposeError::TooManyImages(51))));
        assert!(matches!(validate_batch(&none[..]), Err(ComposeError::NoImages)));
    }

    #[test]
    fn test_batch_rejects_unsupported_extension() {
        let names = ["ok.PNG", "notes.txt"];
        match validate_batch(&names[..]) {
            Err(ComposeError::UnsupportedFormat(name)) => assert_eq!(name, "notes.txt"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_page_options() {
        assert_eq!(PageSize::parse("letter"), Some(PageSize::Letter));
        assert_eq!(PageSize::parse("A5"), None);
        assert_eq!(Orientation::parse("Landscape"), Some(Orientation::Landscape));
        assert_eq!(Orientation::parse("sideways"), None);
    }
}
