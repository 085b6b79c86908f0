//! Per-user storage namespace: directory layout, uploads, listing, deletion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;

use crate::error::EngineError;
use crate::mapper::list_files;
use crate::registrar;
use crate::schema::StoredFile;

/// Non-empty, ASCII alphanumerics plus `-` and `_`.
pub fn validate_user_id(id: &str) -> Result<(), EngineError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidUser(id.to_string()))
    }
}

/// Strip separators and `..`, then allow only `[A-Za-z0-9_.-]`.
pub fn sanitize_filename(name: &str) -> Result<String, EngineError> {
    let cleaned = name.replace(['/', '\\'], "").replace("..", "");
    let ok = !cleaned.is_empty()
        && cleaned
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if ok {
        Ok(cleaned)
    } else {
        Err(EngineError::InvalidFilename(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub stored_name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub download_path: String,
}

#[derive(Debug, Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    /// Entries nobody holds or waits on are dropped here, so the map only
    /// tracks owners with requests in flight.
    fn handle(&self, owner: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(owner.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug)]
pub struct UserStore {
    root: PathBuf,
    locks: UserLocks,
}

impl UserStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        UserStore {
            root: root.into(),
            locks: UserLocks::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{owner}`, created on demand.
    pub fn user_dir(&self, owner: &str) -> Result<PathBuf, EngineError> {
        validate_user_id(owner)?;
        let dir = self.root.join(owner);
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::io(format!("create {}", dir.display()), e))?;
        Ok(dir)
    }

    /// Serialises requests that touch one user's directory.
    pub async fn lock(&self, owner: &str) -> OwnedMutexGuard<()> {
        self.locks.handle(owner).lock_owned().await
    }

    /// Store `bytes` under a generated name; the client name is only recorded.
    pub async fn upload(
        &self,
        owner: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, EngineError> {
        let dir = self.user_dir(owner)?;
        let _guard = self.lock(owner).await;

        let (id, stored_name) = StoredFile::allocate_name(original_name);
        let dest = dir.join(&stored_name);
        fs::write(&dest, bytes)
            .map_err(|e| EngineError::io(format!("write {}", dest.display()), e))?;
        info!(owner, stored = %stored_name, size = bytes.len(), "file uploaded");

        registrar::describe(&dest, id, original_name, &stored_name, owner)
    }

    pub fn list(&self, owner: &str) -> Result<Vec<FileEntry>, EngineError> {
        let dir = self.user_dir(owner)?;
        let mut entries = Vec::new();
        for name in list_files(&dir) {
            let path = dir.join(&name);
            let meta = fs::metadata(&path)
                .map_err(|e| EngineError::io(format!("stat {}", path.display()), e))?;
            entries.push(FileEntry {
                download_path: format!("{owner}/{name}"),
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                stored_name: name,
            });
        }
        Ok(entries)
    }

    /// Delete every file whose stem is `file_id` or that starts with `{file_id}.`.
    pub async fn delete(&self, owner: &str, file_id: &str) -> Result<Vec<String>, EngineError> {
        let dir = self.user_dir(owner)?;
        let file_id = sanitize_filename(file_id)?;
        let _guard = self.lock(owner).await;

        let prefix = format!("{file_id}.");
        let mut deleted = Vec::new();
        for name in list_files(&dir) {
            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if stem == file_id || name.starts_with(&prefix) {
                let path = dir.join(&name);
                fs::remove_file(&path)
                    .map_err(|e| EngineError::io(format!("delete {}", path.display()), e))?;
                deleted.push(name);
            }
        }
        if deleted.is_empty() {
            return Err(EngineError::NotFound(format!("file with ID '{file_id}'")));
        }
        info!(owner, file_id = %file_id, count = deleted.len(), "files deleted");
        Ok(deleted)
    }

    /// Path of a stored file, guaranteed to be inside the owner's directory.
    pub fn download_path(&self, owner: &str, name: &str) -> Result<PathBuf, EngineError> {
        let dir = self.user_dir(owner)?;
        let name = sanitize_filename(name)?;
        let path = dir.join(&name);
        if !path.is_file() {
            return Err(EngineError::NotFound(name));
        }
        let resolved = path
            .canonicalize()
            .map_err(|e| EngineError::io(format!("resolve {}", path.display()), e))?;
        let base = dir
            .canonicalize()
            .map_err(|e| EngineError::io(format!("resolve {}", dir.display()), e))?;
        if !resolved.starts_with(&base) {
            return Err(EngineError::AccessDenied(name));
        }
        Ok(resolved)
    }
}
