use crate::services::pdf_security::{self, SecurityError, SecurityHandler};
use crate::services::staging::{StagedFile, StagingService};
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Shortest user password accepted when protecting a document.
pub const MIN_PASSWORD_LEN: usize = 4;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("Invalid password or unsupported encryption method")]
    InvalidPassword,

    #[error("Failed to remove password protection")]
    VerificationFailed,

    #[error("Unable to analyze PDF file: {0}")]
    Pdf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum EncryptError {
    #[error("Password must be at least 4 characters long")]
    WeakPassword,

    #[error("PDF is already password protected. Remove existing protection first.")]
    AlreadyProtected,

    #[error("Failed to add password protection")]
    VerificationFailed,

    #[error("Unable to analyze PDF file: {0}")]
    Pdf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SecurityError> for DecryptError {
    fn from(e: SecurityError) -> Self {
        match e {
            SecurityError::Unsupported(handler) => {
                warn!(%handler, "Unsupported security handler");
                DecryptError::InvalidPassword
            }
            SecurityError::Malformed(_) => DecryptError::Pdf(e.to_string()),
        }
    }
}

/// Result of copying the page sequence and metadata into a fresh document.
#[derive(Debug, Default)]
pub struct CopyReport {
    pub copied: usize,
    pub skipped: Vec<PageCopyFailure>,
    pub metadata_copied: bool,
}

#[derive(Debug)]
pub struct PageCopyFailure {
    pub page: u32,
    pub reason: String,
}

/// Decrypts and encrypts staged documents. Methods block; run them off the async runtime.
pub struct DocumentCrypto {
    staging: Arc<StagingService>,
}

impl DocumentCrypto {
    pub fn new(staging: Arc<StagingService>) -> Self {
        Self { staging }
    }

    pub fn is_protected(&self, path: &Path) -> Result<bool, DecryptError> {
        let bytes = std::fs::read(path)?;
        is_protected_bytes(&bytes)
    }

    /// Produces an unprotected copy of `source`. Plaintext input is copied byte for byte.
    pub fn decrypt(&self, source: &StagedFile, password: &str) -> Result<StagedFile, DecryptError> {
        let bytes = std::fs::read(&source.path)?;

        if !is_protected_bytes(&bytes)? {
            let output = self.staging.allocate("unlocked", "pdf");
            std::fs::copy(&source.path, &output)?;
            debug!(source = %source.path.display(), "Document is not protected, copied as-is");
            return Ok(self.staging.adopt(output, source, &source.original_name));
        }

        let probe = Document::load_mem(&bytes).map_err(|e| DecryptError::Pdf(e.to_string()))?;
        let handler = SecurityHandler::from_document(&probe)?
            .ok_or_else(|| DecryptError::Pdf("encryption dictionary not found".to_string()))?;

        // lopdf opens documents with an empty user password on its own, so the
        // candidate is checked against the handler either way.
        let check = handler.check_password(password);
        if !check.is_accepted() {
            info!(request_id = %source.request_id, "Password rejected");
            return Err(DecryptError::InvalidPassword);
        }
        info!(
            request_id = %source.request_id,
            accepted_as = check.as_str(),
            revision = handler.revision(),
            "Password accepted"
        );

        let doc = if probe.is_encrypted() {
            let credential = handler
                .content_credential(password, check)
                .ok_or(DecryptError::InvalidPassword)?;
            Document::load_mem_with_password(&bytes, &credential)
                .map_err(|e| DecryptError::Pdf(format!("decryption failed: {}", e)))?
        } else {
            probe
        };

        let (mut output_doc, report) = rebuild_document(&doc);
        log_report(&report);

        let output = self.staging.allocate("unlocked", "pdf");
        save_document(&mut output_doc, &output).map_err(DecryptError::Io)?;

        if is_protected_bytes(&std::fs::read(&output)?)? {
            warn!("Output PDF is still encrypted");
            self.staging.release_now(&[output]);
            return Err(DecryptError::VerificationFailed);
        }

        info!(pages = report.copied, "Verification successful: PDF is unlocked");
        Ok(self.staging.adopt(output, source, &source.original_name))
    }

    /// Produces a protected copy of `source`; the owner password defaults to the user password.
    pub fn encrypt(
        &self,
        source: &StagedFile,
        user_password: &str,
        owner_password: Option<&str>,
    ) -> Result<StagedFile, EncryptError> {
        if user_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(EncryptError::WeakPassword);
        }

        let bytes = std::fs::read(&source.path)?;
        let protected = is_protected_bytes(&bytes).map_err(|e| match e {
            DecryptError::Io(io) => EncryptError::Io(io),
            other => EncryptError::Pdf(other.to_string()),
        })?;
        if protected {
            return Err(EncryptError::AlreadyProtected);
        }

        let doc = Document::load_mem(&bytes).map_err(|e| EncryptError::Pdf(e.to_string()))?;
        let (mut output_doc, report) = rebuild_document(&doc);
        log_report(&report);

        let owner_password = owner_password
            .filter(|p| !p.is_empty())
            .unwrap_or(user_password);
        pdf_security::protect(&mut output_doc, user_password, owner_password)
            .map_err(|e| EncryptError::Pdf(e.to_string()))?;

        let output = self.staging.allocate("protected", "pdf");
        save_document(&mut output_doc, &output)?;

        let verified = match is_protected_bytes(&std::fs::read(&output)?) {
            Ok(protected) => protected,
            Err(e) => {
                warn!(error = %e, "Unable to re-read protected output");
                false
            }
        };
        if !verified {
            warn!("Output PDF does not report protection");
            self.staging.release_now(&[output]);
            return Err(EncryptError::VerificationFailed);
        }

        info!(pages = report.copied, "Verification successful: PDF is protected");
        Ok(self.staging.adopt(output, source, &source.original_name))
    }
}

/// Whether the document is protected by a security handler, judged from its structure
/// as lopdf loads it: still locked, or opened with an empty user password.
pub fn is_protected_bytes(bytes: &[u8]) -> Result<bool, DecryptError> {
    match Document::load_mem(bytes) {
        Ok(doc) => Ok(doc.is_encrypted() || doc.was_encrypted()),
        Err(e) => {
            let message = e.to_string().to_lowercase();
            if message.contains("password")
                || message.contains("encrypt")
                || message.contains("decrypt")
            {
                Ok(true)
            } else {
                Err(DecryptError::Pdf(e.to_string()))
            }
        }
    }
}

fn log_report(report: &CopyReport) {
    for failure in &report.skipped {
        warn!(page = failure.page, reason = %failure.reason, "Failed to copy page, skipping");
    }
    if !report.skipped.is_empty() {
        warn!(
            copied = report.copied,
            skipped = report.skipped.len(),
            "Output has fewer pages than the source"
        );
    }
}

fn save_document(doc: &mut Document, path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    doc.save_to(&mut file)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(())
}

/// Copies every page in order, then the `/Info` dictionary, into a fresh document.
pub fn rebuild_document(source: &Document) -> (Document, CopyReport) {
    let mut target = Document::with_version("1.5");
    let mut report = CopyReport::default();
    let pages_id = target.new_object_id();

    let mut copier = ObjectCopier {
        source,
        memo: HashMap::new(),
        inserted: Vec::new(),
    };

    // Allocate every page id first so cross-page references (links, annotations) resolve.
    let source_pages = source.get_pages();
    for page_id in source_pages.values() {
        let new_id = target.new_object_id();
        copier.memo.insert(*page_id, new_id);
    }

    let mut kids = Vec::with_capacity(source_pages.len());
    for (&number, &page_id) in &source_pages {
        copier.inserted.clear();
        match copier.copy_page(&mut target, page_id, pages_id) {
            Ok(new_id) => {
                kids.push(Object::Reference(new_id));
                report.copied += 1;
            }
            Err(reason) => {
                copier.rollback(&mut target);
                report.skipped.push(PageCopyFailure {
                    page: number,
                    reason,
                });
            }
        }
    }

    target.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => report.copied as i64,
        }),
    );
    let catalog_id = target.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    target.trailer.set("Root", catalog_id);

    copier.inserted.clear();
    match copier.copy_info(&mut target) {
        Ok(Some(info_id)) => {
            target.trailer.set("Info", info_id);
            report.metadata_copied = true;
        }
        Ok(None) => {}
        Err(reason) => {
            copier.rollback(&mut target);
            warn!(%reason, "Could not copy metadata");
        }
    }

    (target, report)
}

struct ObjectCopier<'a> {
    source: &'a Document,
    memo: HashMap<ObjectId, ObjectId>,
    /// Ids added for the unit of work in progress, removed again if it fails.
    inserted: Vec<(ObjectId, ObjectId)>,
}

impl<'a> ObjectCopier<'a> {
    fn copy_page(
        &mut self,
        target: &mut Document,
        page_id: ObjectId,
        parent: ObjectId,
    ) -> Result<ObjectId, String> {
        let new_id = *self
            .memo
            .get(&page_id)
            .ok_or_else(|| format!("page {:?} was not allocated", page_id))?;

        let source = self.source;
        let page = source
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| format!("cannot read page object {:?}: {}", page_id, e))?;

        let mut dict = self.copy_dictionary(target, page)?;
        for key in INHERITABLE_KEYS {
            if dict.has(key) {
                continue;
            }
            if let Some(value) = self.inherited(page, key) {
                let copied = self.copy_object(target, value)?;
                dict.set(key.to_vec(), copied);
            }
        }
        if !dict.has(b"MediaBox") {
            return Err("page has no MediaBox".to_string());
        }
        dict.set("Parent", parent);

        target.objects.insert(new_id, Object::Dictionary(dict));
        Ok(new_id)
    }

    fn copy_info(&mut self, target: &mut Document) -> Result<Option<ObjectId>, String> {
        let source = self.source;
        let Ok(info) = source.trailer.get(b"Info") else {
            return Ok(None);
        };
        let info = match info {
            Object::Reference(id) => source
                .get_object(*id)
                .map_err(|e| format!("cannot read /Info: {}", e))?,
            other => other,
        };
        let dict = info
            .as_dict()
            .map_err(|e| format!("/Info is not a dictionary: {}", e))?;

        let copied = self.copy_dictionary(target, dict)?;
        Ok(Some(target.add_object(copied)))
    }

    /// Walks `/Parent` links looking for an inherited attribute.
    fn inherited(&self, page: &Dictionary, key: &[u8]) -> Option<&'a Object> {
        let source = self.source;
        let mut current = page.get(b"Parent").and_then(|p| p.as_reference()).ok();
        let mut depth = 0;
        while let Some(id) = current {
            depth += 1;
            if depth > 64 {
                return None;
            }
            let node = source.get_object(id).and_then(|o| o.as_dict()).ok()?;
            if let Ok(value) = node.get(key) {
                return Some(value);
            }
            current = node.get(b"Parent").and_then(|p| p.as_reference()).ok();
        }
        None
    }

    fn copy_dictionary(
        &mut self,
        target: &mut Document,
        dict: &Dictionary,
    ) -> Result<Dictionary, String> {
        let is_tree_node = matches!(
            dict.get(b"Type").and_then(|t| t.as_name()),
            Ok(b"Page") | Ok(b"Pages")
        );

        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            if is_tree_node && key == b"Parent" {
                continue;
            }
            let value = self.copy_object(target, value)?;
            copy.set(key.clone(), value);
        }
        Ok(copy)
    }

    fn copy_object(&mut self, target: &mut Document, object: &Object) -> Result<Object, String> {
        match object {
            Object::Reference(id) => Ok(self.copy_reference(target, *id)),
            Object::Array(items) => items
                .iter()
                .map(|item| self.copy_object(target, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Object::Array),
            Object::Dictionary(dict) => self.copy_dictionary(target, dict).map(Object::Dictionary),
            Object::Stream(stream) => {
                let dict = self.copy_dictionary(target, &stream.dict)?;
                Ok(Object::Stream(lopdf::Stream::new(dict, stream.content.clone())))
            }
            other => Ok(other.clone()),
        }
    }

    fn copy_reference(&mut self, target: &mut Document, id: ObjectId) -> Object {
        if let Some(mapped) = self.memo.get(&id) {
            return Object::Reference(*mapped);
        }

        let source = self.source;
        let Ok(referenced) = source.get_object(id) else {
            warn!(?id, "Cannot resolve reference, using Null");
            return Object::Null;
        };

        let new_id = target.new_object_id();
        self.memo.insert(id, new_id);
        self.inserted.push((id, new_id));

        match self.copy_object(target, referenced) {
            Ok(copy) => {
                target.objects.insert(new_id, copy);
                Object::Reference(new_id)
            }
            Err(reason) => {
                warn!(?id, %reason, "Cannot copy referenced object, using Null");
                target.objects.insert(new_id, Object::Null);
                Object::Reference(new_id)
            }
        }
    }

    fn rollback(&mut self, target: &mut Document) {
        for (source_id, new_id) in self.inserted.drain(..) {
            target.objects.remove(&new_id);
            self.memo.remove(&source_id);
        }
    }
}
