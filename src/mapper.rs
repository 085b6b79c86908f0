//! Resolves untrusted file references to stored names inside one user directory.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::schema::{file_extension, ID_TEXT_LEN};

/// Resolve each reference to the stored filename it denotes. References that
/// cannot be resolved to an existing file are dropped with a warning.
///
/// Per reference, in order:
/// 1. pre-extension segment is identifier-length: already a stored name;
/// 2. identifier-length with separators: first file whose name starts with it;
/// 3. otherwise the first file sharing the reference's extension (imprecise).
pub fn resolve(dir: &Path, references: &[String]) -> Vec<String> {
    let listing = list_files(dir);
    let mut resolved = Vec::with_capacity(references.len());

    for reference in references {
        match resolve_one(dir, &listing, reference) {
            Some(name) => {
                debug!(reference = %reference, stored = %name, "resolved file reference");
                resolved.push(name);
            }
            None => {
                warn!(reference = %reference, "could not map file reference to a stored file");
            }
        }
    }
    resolved
}

fn resolve_one(dir: &Path, listing: &[String], reference: &str) -> Option<String> {
    if reference.is_empty() {
        return None;
    }

    // Rules 1 and 2 use the reference itself as an on-disk name.
    if is_plain_name(reference) {
        let head = reference.split('.').next().unwrap_or_default();
        if head.chars().count() == ID_TEXT_LEN {
            return Some(reference.to_string()).filter(|name| dir.join(name).is_file());
        }
        if reference.chars().count() == ID_TEXT_LEN && reference.contains('-') {
            if let Some(name) = listing.iter().find(|name| name.starts_with(reference)) {
                return Some(name.clone());
            }
        }
    }

    // Rule 3 only ever returns a listed entry, so any path shape is acceptable.
    let wanted = file_extension(reference).to_lowercase();
    listing
        .iter()
        .find(|name| file_extension(name).to_lowercase() == wanted)
        .cloned()
}

/// A single path component with no traversal.
fn is_plain_name(reference: &str) -> bool {
    !reference.is_empty()
        && reference != "."
        && reference != ".."
        && !reference.contains(['/', '\\', '\0'])
}

/// Regular files directly inside `dir`, sorted for a stable "first match".
pub(crate) fn list_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}
