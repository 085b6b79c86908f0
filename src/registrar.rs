//! Before/after snapshots of a user directory and registration of new files.

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::mapper::list_files;
use crate::schema::{FileEvent, StoredFile};

pub type Snapshot = BTreeSet<String>;

/// Names of the regular files directly inside `dir`.
pub fn snapshot(dir: &Path) -> Snapshot {
    list_files(dir).into_iter().collect()
}

/// `Created` for names only in `after`, `Removed` for names only in `before`.
/// Files rewritten in place appear in both and produce no event.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<FileEvent> {
    let created = after
        .difference(before)
        .map(|n| FileEvent::Created(n.clone()));
    let removed = before
        .difference(after)
        .map(|n| FileEvent::Removed(n.clone()));
    created.chain(removed).collect()
}

/// Files that were registered although registration as a whole failed, and
/// the first error met.
#[derive(Debug)]
pub struct RegistrationFailure {
    pub registered: Vec<StoredFile>,
    pub error: EngineError,
}

/// Rename every created file to `{id}{ext}` and describe it. A file that
/// cannot be registered does not stop the others.
pub fn register(
    dir: &Path,
    owner: &str,
    events: &[FileEvent],
) -> Result<Vec<StoredFile>, RegistrationFailure> {
    let mut registered = Vec::new();
    let mut first_error = None;
    for event in events {
        let FileEvent::Created(raw) = event else {
            continue;
        };
        let source = dir.join(raw);
        if !source.is_file() {
            warn!(file = %raw, "new file vanished before registration");
            continue;
        }
        match register_one(dir, owner, raw) {
            Ok(file) => registered.push(file),
            Err(error) => {
                warn!(file = %raw, error = %error, "could not register output file");
                first_error.get_or_insert(error);
            }
        }
    }
    match first_error {
        None => Ok(registered),
        Some(error) => Err(RegistrationFailure { registered, error }),
    }
}

fn register_one(dir: &Path, owner: &str, raw: &str) -> Result<StoredFile, EngineError> {
    let (id, stored_name) = StoredFile::allocate_name(raw);
    let dest = dir.join(&stored_name);
    // Same directory, so the rename is atomic for readers of `dir`.
    fs::rename(dir.join(raw), &dest)
        .map_err(|e| EngineError::io(format!("rename {raw} to {stored_name}"), e))?;
    debug!(raw = %raw, stored = %stored_name, "registered output file");
    describe(&dest, id, raw, &stored_name, owner)
}

/// Metadata for a file already stored under `stored_name`.
pub fn describe(
    path: &Path,
    id: String,
    original_name: &str,
    stored_name: &str,
    owner: &str,
) -> Result<StoredFile, EngineError> {
    let (size, sha256) = digest_file(path)?;
    Ok(StoredFile {
        id,
        original_name: original_name.to_string(),
        stored_name: stored_name.to_string(),
        content_type: content_type_for(stored_name),
        owner: owner.to_string(),
        path: format!("{owner}/{stored_name}"),
        size,
        sha256,
    })
}

pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn digest_file(path: &Path) -> Result<(u64, String), EngineError> {
    let context = || format!("read {}", path.display());
    let mut file = fs::File::open(path).map_err(|e| EngineError::io(context(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| EngineError::io(context(), e))?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}
