use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Textual length of a hyphenated v4 identifier.
pub const ID_TEXT_LEN: usize = 36;

/// A file registered in one user's storage directory under `{id}{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub original_name: String,
    pub stored_name: String,
    pub content_type: String,
    pub owner: String,
    /// Path relative to the upload root.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

impl StoredFile {
    /// Fresh identifier and the stored name it implies for `original_name`.
    pub fn allocate_name(original_name: &str) -> (String, String) {
        let id = Uuid::new_v4().to_string();
        let stored = format!("{id}{}", file_extension(original_name));
        (id, stored)
    }

    /// Whether `name` has the `{identifier}{extension}` form.
    pub fn is_stored_name(name: &str) -> bool {
        match name.get(..ID_TEXT_LEN) {
            Some(head) => {
                let rest = &name[ID_TEXT_LEN..];
                Uuid::try_parse(head).is_ok()
                    && (rest.is_empty() || (rest.starts_with('.') && file_extension(name) == rest))
            }
            None => false,
        }
    }
}

/// Extension including the leading dot, or an empty string. Mirrors the usual
/// "suffix" notion: `a.tar.gz` -> `.gz`, `.profile` -> ``, `a.` -> ``.
pub fn file_extension(name: &str) -> String {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{ext}"),
        _ => String::new(),
    }
}

/// A command suggestion from the proposal collaborator. Every field is untrusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProposal {
    #[serde(alias = "linux_command")]
    pub raw_command: String,
    #[serde(default)]
    pub command_template: Option<String>,
    #[serde(default, alias = "input_files")]
    pub declared_inputs: Vec<String>,
    #[serde(default, alias = "output_files")]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Pre-split atomic commands. When non-empty these are run as given and
    /// `raw_command` is not re-split.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

impl CommandProposal {
    pub fn new(raw_command: impl Into<String>, declared_inputs: Vec<String>) -> Self {
        Self {
            raw_command: raw_command.into(),
            declared_inputs,
            ..Default::default()
        }
    }
}

/// Change observed in the mounted directory between the two snapshots.
/// In-place modification is not represented.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "event", content = "name", rename_all = "snake_case")]
pub enum FileEvent {
    Created(String),
    Removed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: String,
    pub owner: String,
    /// Stored names the declared inputs resolved to.
    pub inputs: Vec<String>,
    pub steps: Vec<StepReport>,
    pub events: Vec<FileEvent>,
    pub new_files: Vec<StoredFile>,
}
