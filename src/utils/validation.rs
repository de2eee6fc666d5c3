use crate::services::composer::{
    DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY, Orientation, PageSize,
};
use crate::services::document_crypto::MIN_PASSWORD_LEN;
use crate::services::rasterizer::{DEFAULT_DPI, MAX_DPI, MIN_DPI, RasterFormat};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Requires a `.pdf` extension (case-insensitive).
pub fn require_pdf_name(filename: &str) -> Result<(), ValidationError> {
    if filename.to_lowercase().ends_with(".pdf") {
        return Ok(());
    }
    Err(ValidationError::new("INVALID_EXTENSION", "File must be a PDF"))
}

pub fn require_password(password: Option<&str>) -> Result<&str, ValidationError> {
    match password {
        Some(p) if !p.is_empty() => Ok(p),
        _ => Err(ValidationError::new("MISSING_PASSWORD", "Password is required")),
    }
}

/// Required, non-empty and at least the minimum length.
pub fn require_new_password(password: Option<&str>) -> Result<&str, ValidationError> {
    let password = require_password(password)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            "WEAK_PASSWORD",
            format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            ),
        ));
    }
    Ok(password)
}

/// Blank values count as absent. The value itself is returned untrimmed.
pub fn optional(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Only an empty value counts as absent; whitespace is a valid password.
pub fn optional_password(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub fn parse_format(value: Option<&str>) -> Result<RasterFormat, ValidationError> {
    match optional(value) {
        None => Ok(RasterFormat::Png),
        Some(v) => RasterFormat::parse(v.trim()).ok_or_else(|| {
            ValidationError::new("INVALID_FORMAT", "Format must be PNG, JPEG, or JPG")
        }),
    }
}

pub fn parse_dpi(value: Option<&str>) -> Result<u16, ValidationError> {
    let Some(raw) = optional(value) else {
        return Ok(DEFAULT_DPI);
    };
    let out_of_range = || {
        ValidationError::new(
            "INVALID_DPI",
            format!("DPI must be between {} and {}", MIN_DPI, MAX_DPI),
        )
    };

    let dpi: u16 = raw.trim().parse().map_err(|_| out_of_range())?;
    if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
        return Err(out_of_range());
    }
    Ok(dpi)
}

pub fn parse_page_size(value: Option<&str>) -> Result<PageSize, ValidationError> {
    match optional(value) {
        None => Ok(PageSize::A4),
        Some(v) => PageSize::parse(v.trim()).ok_or_else(|| {
            ValidationError::new("INVALID_PAGE_SIZE", "Page size must be A4, LETTER, or LEGAL")
        }),
    }
}

pub fn parse_orientation(value: Option<&str>) -> Result<Orientation, ValidationError> {
    match optional(value) {
        None => Ok(Orientation::Portrait),
        Some(v) => Orientation::parse(v.trim()).ok_or_else(|| {
            ValidationError::new(
                "INVALID_ORIENTATION",
                "Orientation must be portrait or landscape",
            )
        }),
    }
}

pub fn parse_quality(value: Option<&str>) -> Result<u8, ValidationError> {
    let Some(raw) = optional(value) else {
        return Ok(DEFAULT_QUALITY);
    };
    let out_of_range = || {
        ValidationError::new(
            "INVALID_QUALITY",
            format!("Quality must be between {} and {}", MIN_QUALITY, MAX_QUALITY),
        )
    };

    let quality: u8 = raw.trim().parse().map_err(|_| out_of_range())?;
    if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        return Err(out_of_range());
    }
    Ok(quality)
}

/// Client file name without directories and without its final extension.
pub fn base_name(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// Makes a client-supplied name safe to echo back in a Content-Disposition header.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}
