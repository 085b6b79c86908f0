//! Reusable command templates with `{variable}` placeholders.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn default_output_var() -> String {
    "output_file".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPattern {
    #[serde(default = "default_output_var")]
    pub name: String,
    /// May use `{input_basename}`, `{input_ext}` and `{timestamp}`.
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command_template: String,
    #[serde(default)]
    pub output_patterns: Vec<OutputPattern>,
}

/// Fill `template` with the mapped input names and derived output names.
/// Returns the command and the output names it is expected to produce.
pub fn render_preset_command(
    template: &str,
    input_mappings: &BTreeMap<String, String>,
    output_patterns: &[OutputPattern],
    now: DateTime<Utc>,
) -> (String, Vec<String>) {
    let mut command = template.to_string();
    for (var, filename) in input_mappings {
        command = command.replace(&format!("{{{var}}}"), filename);
    }

    let first_input = input_mappings
        .values()
        .next()
        .map(String::as_str)
        .unwrap_or("output");
    let first = Path::new(first_input);
    let basename = first
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let ext = crate::schema::file_extension(first_input);
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

    let mut outputs = Vec::with_capacity(output_patterns.len());
    for pattern in output_patterns {
        let output = pattern
            .template
            .replace("{input_basename}", basename)
            .replace("{input_ext}", &ext)
            .replace("{timestamp}", &timestamp);
        command = command.replace(&format!("{{{}}}", pattern.name), &output);
        outputs.push(output);
    }
    (command, outputs)
}
