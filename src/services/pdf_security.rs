//! Standard security handler support on top of lopdf: password checks against an
//! existing `/Encrypt` dictionary and RC4 128-bit protection of freshly built documents.
//!
//! lopdf derives revision 2 to 4 file keys from the user password only, so an
//! accepted owner password is first turned back into the user password.

use lopdf::encryption::crypt_filters::{CryptFilter, Rc4CryptFilter};
use lopdf::{Dictionary, Document, EncryptionState, EncryptionVersion, Object, Permissions, StringFormat};
use rand::RngCore;
use thiserror::Error;

const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Key length, in bits, of protected output.
const PROTECT_KEY_BITS: usize = 128;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Unsupported security handler: {0}")]
    Unsupported(String),

    #[error("Malformed encryption dictionary: {0}")]
    Malformed(String),
}

/// Outcome of presenting a password to the security handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Rejected,
    User,
    Owner,
}

impl PasswordCheck {
    pub fn is_accepted(self) -> bool {
        !matches!(self, PasswordCheck::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PasswordCheck::Rejected => "rejected",
            PasswordCheck::User => "user",
            PasswordCheck::Owner => "owner",
        }
    }
}

/// A document's standard security handler, held in a content-free document so
/// lopdf can authenticate against it.
#[derive(Debug, Clone)]
pub struct SecurityHandler {
    shell: Document,
    revision: i64,
}

impl SecurityHandler {
    /// Reads the handler of a document as lopdf loaded it: still locked, with the
    /// trailer's `/Encrypt` in place, or already opened with an empty user password.
    /// `None` when the document was never protected.
    pub fn from_document(doc: &Document) -> Result<Option<Self>, SecurityError> {
        let dict = if let Ok(dict) = doc.get_encrypted() {
            dict.clone()
        } else if let Some(state) = &doc.encryption_state {
            state
                .encode()
                .map_err(|e| SecurityError::Malformed(e.to_string()))?
        } else {
            return Ok(None);
        };

        let filter = dict
            .get(b"Filter")
            .and_then(Object::as_name)
            .map_err(|_| SecurityError::Malformed("missing /Filter".to_string()))?;
        if filter != b"Standard" {
            return Err(SecurityError::Unsupported(
                String::from_utf8_lossy(filter).into_owned(),
            ));
        }

        let revision = dict
            .get(b"R")
            .and_then(Object::as_i64)
            .map_err(|_| SecurityError::Malformed("missing /R".to_string()))?;

        let mut shell = Document::new();
        if let Ok(id) = doc.trailer.get(b"ID") {
            shell.trailer.set("ID", id.clone());
        }
        let encrypt_id = shell.add_object(dict);
        shell.trailer.set("Encrypt", Object::Reference(encrypt_id));

        Ok(Some(Self { shell, revision }))
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Tries the password as the user password first, then as the owner password.
    pub fn check_password(&self, password: &str) -> PasswordCheck {
        if self.shell.authenticate_user_password(password).is_ok() {
            PasswordCheck::User
        } else if self.shell.authenticate_owner_password(password).is_ok() {
            PasswordCheck::Owner
        } else {
            PasswordCheck::Rejected
        }
    }

    /// The password lopdf needs to derive the content key, given an accepted `password`.
    pub fn content_credential(&self, password: &str, check: PasswordCheck) -> Option<String> {
        match check {
            PasswordCheck::Rejected => None,
            PasswordCheck::User => Some(password.to_string()),
            PasswordCheck::Owner if self.revision >= 5 => Some(password.to_string()),
            PasswordCheck::Owner => self.recover_user_password(password.as_bytes()),
        }
    }

    fn encrypt_dictionary(&self) -> Option<&Dictionary> {
        self.shell.get_encrypted().ok()
    }

    /// Decrypts `/O` with the owner key to get the padded user password back.
    fn recover_user_password(&self, owner: &[u8]) -> Option<String> {
        let dict = self.encrypt_dictionary()?;
        let owner_entry = dict.get(b"O").and_then(Object::as_str).ok()?;
        let key_bytes = dict
            .get(b"Length")
            .and_then(Object::as_i64)
            .map(|bits| (bits / 8) as usize)
            .unwrap_or(5);

        let key = owner_key(owner, self.revision, key_bytes);
        let mut value = owner_entry.to_vec();
        if self.revision == 2 {
            value = rc4(&key, &value)?;
        } else {
            for round in (0..=19u8).rev() {
                let round_key: Vec<u8> = key.iter().map(|b| b ^ round).collect();
                value = rc4(&round_key, &value)?;
            }
        }

        // PDFDocEncoding agrees with Latin-1 for the characters passwords use.
        let candidate: String = unpad(&value).iter().map(|&b| char::from(b)).collect();
        self.shell
            .authenticate_user_password(&candidate)
            .ok()
            .map(|_| candidate)
    }
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PASSWORD_PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Strips the standard padding suffix from a recovered password.
fn unpad(padded: &[u8]) -> &[u8] {
    (0..=padded.len())
        .find(|&i| PASSWORD_PADDING.starts_with(&padded[i..]))
        .map(|i| &padded[..i])
        .unwrap_or(padded)
}

fn owner_key(owner: &[u8], revision: i64, key_bytes: usize) -> Vec<u8> {
    let mut digest = md5::compute(pad_password(owner)).0;
    if revision >= 3 {
        for _ in 0..50 {
            digest = md5::compute(digest).0;
        }
    }
    let len = if revision == 2 { 5 } else { key_bytes.clamp(5, 16) };
    digest[..len].to_vec()
}

fn rc4(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    Rc4CryptFilter.decrypt(key, data).ok()
}

/// Encrypts every string and stream of `doc` in place (RC4, 128-bit key, revision 3)
/// with all permissions granted, and installs a fresh file identifier.
pub fn protect(
    doc: &mut Document,
    user_password: &str,
    owner_password: &str,
) -> Result<(), lopdf::Error> {
    let mut first_id = vec![0u8; 16];
    let mut second_id = vec![0u8; 16];
    rand::thread_rng().fill_bytes(&mut first_id);
    rand::thread_rng().fill_bytes(&mut second_id);
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(first_id, StringFormat::Hexadecimal),
            Object::String(second_id, StringFormat::Hexadecimal),
        ]),
    );

    let state = EncryptionState::try_from(EncryptionVersion::V2 {
        document: &*doc,
        owner_password,
        user_password,
        key_length: PROTECT_KEY_BITS,
        permissions: Permissions::all(),
    })?;
    doc.encrypt(&state)
}
