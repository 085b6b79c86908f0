//! Splits a proposed command string into atomic commands run one after another.
//!
//! The split is purely textual: newlines first, then the `&&` operator. A
//! `&&` or newline inside a quoted argument or a loop body is split as well.
//! When the split produces a single command the trimmed input is used
//! verbatim, which keeps constructs like `for f in *.png; do ...; done` intact.
//! Proposals that carry a structured `steps` list skip splitting entirely.

use crate::error::EngineError;
use crate::schema::CommandProposal;

pub const AND_OPERATOR: &str = "&&";

pub fn sequence(raw: &str) -> Vec<String> {
    let mut commands = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains(AND_OPERATOR) {
            commands.extend(
                line.split(AND_OPERATOR)
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string),
            );
        } else {
            commands.push(line.to_string());
        }
    }

    if commands.len() == 1 {
        return vec![raw.trim().to_string()];
    }
    commands
}

/// Ordered, non-empty list of atomic commands for a proposal.
pub fn plan(proposal: &CommandProposal) -> Result<Vec<String>, EngineError> {
    let steps: Vec<String> = if proposal.steps.is_empty() {
        sequence(&proposal.raw_command)
    } else {
        proposal
            .steps
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };
    if steps.is_empty() {
        return Err(EngineError::NoCommand);
    }
    Ok(steps)
}
