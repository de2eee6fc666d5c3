use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to prepare staging directory {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Bytes persisted to the staging directory on behalf of one request.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Name the client supplied; never used to build paths.
    pub original_name: String,
}

impl StagedFile {
    /// Lowercased extension of the client-supplied name.
    pub fn extension(&self) -> String {
        extension_of(&self.original_name)
    }
}

pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Flat, token-keyed staging area plus the deferred release timer.
pub struct StagingService {
    root: PathBuf,
    release_delay: Duration,
}

impl StagingService {
    pub fn new(root: impl Into<PathBuf>, release_delay: Duration) -> Self {
        Self {
            root: root.into(),
            release_delay,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn release_delay(&self) -> Duration {
        self.release_delay
    }

    pub fn ensure_root(&self) -> Result<(), StagingError> {
        std::fs::create_dir_all(&self.root).map_err(|source| StagingError::Root {
            path: self.root.clone(),
            source,
        })
    }

    /// Fresh path `<token>-<role>.<ext>`; the token is unique per call.
    pub fn allocate(&self, role: &str, extension: &str) -> PathBuf {
        let token = Uuid::new_v4().simple();
        if extension.is_empty() {
            self.root.join(format!("{}-{}", token, role))
        } else {
            self.root.join(format!("{}-{}.{}", token, role, extension))
        }
    }

    /// Writes an upload to a freshly allocated path.
    pub async fn stage(
        &self,
        bytes: &[u8],
        suggested_name: &str,
        request_id: Uuid,
    ) -> Result<StagedFile, StagingError> {
        let path = self.allocate("input", &extension_of(suggested_name));

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StagingError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(
            path = %path.display(),
            size = bytes.len(),
            original = suggested_name,
            "Staged upload"
        );

        Ok(StagedFile {
            path,
            request_id,
            created_at: Utc::now(),
            original_name: suggested_name.to_string(),
        })
    }

    /// Wraps a path produced by an engine as a staged artifact of the same request.
    pub fn adopt(&self, path: PathBuf, origin: &StagedFile, name: impl Into<String>) -> StagedFile {
        StagedFile {
            path,
            request_id: origin.request_id,
            created_at: Utc::now(),
            original_name: name.into(),
        }
    }

    /// Fire-and-forget removal of `paths` once the configured delay has elapsed.
    pub fn schedule_release(&self, paths: Vec<PathBuf>) {
        self.schedule_release_after(paths, self.release_delay);
    }

    pub fn schedule_release_after(&self, paths: Vec<PathBuf>, delay: Duration) {
        if paths.is_empty() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for deferred release, removing immediately");
            release_paths(&paths);
            return;
        };

        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(move || release_paths(&paths)).await {
                warn!("Deferred release task failed: {}", e);
            }
        });
    }

    /// Immediate removal, used on failure paths.
    pub fn release_now(&self, paths: &[PathBuf]) {
        release_paths(paths);
    }

    /// Removes entries in the staging root whose modification time is older than `max_age`.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan staging directory {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            let modified = entry.metadata().and_then(|m| m.modified());
            let age = match modified {
                Ok(t) => now.duration_since(t).unwrap_or_default(),
                Err(_) => continue,
            };

            if age >= max_age {
                let path = entry.path();
                match remove_path(&path) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Cleanup failed for {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Purged {} stale staged entries", removed);
        }
        removed
    }
}

fn release_paths(paths: &[PathBuf]) {
    for path in paths {
        match remove_path(path) {
            Ok(true) => info!("Cleaned up: {}", path.display()),
            Ok(false) => {}
            Err(e) => warn!("Cleanup failed for {}: {}", path.display(), e),
        }
    }
}

/// Removes a file or directory tree. An absent path is not an error; returns whether anything was removed.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
