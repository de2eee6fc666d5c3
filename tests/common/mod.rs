#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use pdf_unlocker_backend::config::AppConfig;
use pdf_unlocker_backend::services::rasterizer::{PageRenderer, RenderFailure};
use pdf_unlocker_backend::services::staging::{StagedFile, StagingService};
use pdf_unlocker_backend::{AppState, create_app};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const BOUNDARY: &str = "----PdfUnlockerTestBoundary";

/// A small document with `pages` pages; each page shows "Page N" and the MediaBox lives on
/// the page tree root so pages inherit it.
pub fn sample_pdf(pages: usize) -> Vec<u8> {
    sample_pdf_titled(pages, "Quarterly Report")
}

pub fn sample_pdf_titled(pages: usize, title: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {}", n))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Author" => Object::string_literal("Finance"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// `sample_pdf(pages)` protected with an empty user password, so it opens without
/// one, and the given owner password.
pub fn owner_only_pdf(pages: usize, owner_password: &str) -> Vec<u8> {
    let mut doc = Document::load_mem(&sample_pdf(pages)).unwrap();
    pdf_unlocker_backend::services::pdf_security::protect(&mut doc, "", owner_password).unwrap();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Text drawn on each page, in page order.
pub fn page_texts(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let content = Content::decode(&doc.get_page_content(*id).unwrap()).unwrap();
            content
                .operations
                .iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| op.operands.first())
                .filter_map(|o| o.as_str().ok())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect::<Vec<_>>()
                .join("")
        })
        .collect()
}

pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, format).unwrap();
    cursor.into_inner()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode_image(width, height, ImageFormat::Png)
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode_image(width, height, ImageFormat::Jpeg)
}

pub enum Part<'a> {
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

pub fn pdf_part<'a>(file_name: &'a str, bytes: &'a [u8]) -> Part<'a> {
    Part::File {
        name: "file",
        file_name,
        content_type: "application/pdf",
        bytes,
    }
}

pub fn text_part<'a>(name: &'a str, value: &'a str) -> Part<'a> {
    Part::Text { name, value }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
                body.extend_from_slice(bytes);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// Renders one small solid image per page, like pdfium would for a readable document.
pub struct CountingRenderer;

impl PageRenderer for CountingRenderer {
    fn render(&self, pdf: &Path, dpi: u16) -> Result<Vec<DynamicImage>, RenderFailure> {
        let bytes = std::fs::read(pdf).map_err(|e| RenderFailure(e.to_string()))?;
        if pdf_unlocker_backend::services::document_crypto::is_protected_bytes(&bytes)
            .map_err(|e| RenderFailure(e.to_string()))?
        {
            return Err(RenderFailure("PdfiumLibraryInternalError(PasswordError)".to_string()));
        }
        let doc = Document::load_mem(&bytes).map_err(|e| RenderFailure(e.to_string()))?;
        let side = (dpi / 10) as u32;
        Ok((0..doc.get_pages().len())
            .map(|_| DynamicImage::ImageRgb8(RgbImage::from_pixel(side, side, Rgb([255, 255, 255]))))
            .collect())
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

pub fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::development();
    config.staging_dir = dir.path().to_path_buf();
    config.cleanup_delay = Duration::from_millis(50);

    let state = AppState::new(config, Arc::new(CountingRenderer));
    state.staging.ensure_root().unwrap();
    let app = create_app(state.clone());

    TestApp { dir, state, app }
}

pub fn staging(dir: &Path) -> Arc<StagingService> {
    Arc::new(StagingService::new(dir, Duration::from_millis(50)))
}

pub async fn stage(staging: &StagingService, bytes: &[u8], name: &str) -> StagedFile {
    staging
        .stage(bytes, name, uuid::Uuid::new_v4())
        .await
        .unwrap()
}

pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Polls until the staging directory is empty or the timeout elapses.
pub async fn wait_until_empty(dir: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if entry_count(dir) == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    entry_count(dir) == 0
}
