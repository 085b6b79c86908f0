use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::EngineError;

/// Output format flags recognised for `pdftocairo`.
pub const PDFTOCAIRO_FORMATS: &[&str] = &["-png", "-jpeg", "-pdf", "-svg", "-tiff", "-ps", "-eps"];

/// Tools that print usage text instead of failing when run without arguments.
pub const TOOLS_NEEDING_ARGS: &[&str] = &[
    "pdftocairo",
    "pdftotext",
    "pdfimages",
    "pdfinfo",
    "ffmpeg",
    "convert",
    "mogrify",
    "tesseract",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

impl Verdict {
    fn pass() -> Self {
        Verdict {
            passed: true,
            reason: String::new(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Verdict {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Check one atomic command for the structure its tool needs. Unknown tools pass.
pub fn validate(command: &str) -> Verdict {
    let command = command.trim();
    if command.is_empty() {
        return Verdict::fail("Command is empty");
    }

    let parts = tokenize(command);
    let Some(first) = parts.first() else {
        return Verdict::fail("Command has no parts");
    };
    let tool = Path::new(first)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(first.as_str());

    if !TOOLS_NEEDING_ARGS.contains(&tool) {
        return Verdict::pass();
    }
    let args = &parts[1..];

    match tool {
        "pdftocairo" => {
            if !args.iter().any(|a| PDFTOCAIRO_FORMATS.contains(&a.as_str())) {
                return Verdict::fail(
                    "pdftocairo command missing output format flag (-png, -jpeg, -pdf, etc.)",
                );
            }
            let files = args.iter().filter(|a| !a.starts_with('-')).count();
            if files < 2 {
                return Verdict::fail(
                    "pdftocairo command missing input PDF and/or output file arguments",
                );
            }
        }
        "ffmpeg" => {
            if !args.iter().any(|a| a == "-i") {
                return Verdict::fail("ffmpeg command missing -i input file flag");
            }
        }
        _ => {
            if args.is_empty() {
                return Verdict::fail(format!(
                    "{tool} command appears to be missing required arguments"
                ));
            }
        }
    }
    Verdict::pass()
}

/// Validate every step before any of them runs; the first failure wins.
pub fn validate_all(steps: &[String]) -> Result<(), EngineError> {
    for step in steps {
        let verdict = validate(step);
        if !verdict.passed {
            return Err(EngineError::Rejected {
                command: step.clone(),
                reason: verdict.reason,
            });
        }
    }
    Ok(())
}

/// Shell-style words; falls back to whitespace splitting on unbalanced quotes.
fn tokenize(command: &str) -> Vec<String> {
    shlex::split(command)
        .unwrap_or_else(|| command.split_whitespace().map(str::to_string).collect())
}
