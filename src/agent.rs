//! Boundary to the language-model collaborator that turns a prompt into a
//! [`CommandProposal`]. The model itself lives outside this crate.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::schema::CommandProposal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Per-request conversation state, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub owner: String,
    /// Stored names the model may refer to.
    pub files: Vec<String>,
    pub history: VecDeque<Turn>,
    /// Most recent turns kept after each exchange.
    pub window: usize,
}

impl ConversationContext {
    pub fn new(owner: impl Into<String>, window: usize) -> Self {
        ConversationContext {
            owner: owner.into(),
            files: Vec::new(),
            history: VecDeque::new(),
            window,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.history.push_back(Turn {
            role: Role::User,
            content: user.into(),
        });
        self.history.push_back(Turn {
            role: Role::Assistant,
            content: assistant.into(),
        });
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }
}

#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(
        &self,
        prompt: &str,
        ctx: &ConversationContext,
    ) -> Result<CommandProposal, EngineError>;
}

/// Always proposes the same command.
#[derive(Debug, Clone)]
pub struct StaticProposer {
    pub proposal: CommandProposal,
}

#[async_trait]
impl Proposer for StaticProposer {
    async fn propose(
        &self,
        _prompt: &str,
        _ctx: &ConversationContext,
    ) -> Result<CommandProposal, EngineError> {
        Ok(self.proposal.clone())
    }
}

/// Request text for a model: the prompt, the available files and the reply shape.
pub fn render_user_message(prompt: &str, files: &[String]) -> String {
    let files = serde_json::to_string(files).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Prompt: {prompt}\n\
         Uploaded Files: {files}\n\n\
         Return JSON with these fields:\n\
         - linux_command: the complete command with actual filenames\n\
         - command_template: the same command using {{input_file}}, {{input_basename}}, {{input_ext}}, {{timestamp}}, {{output_file}}\n\
         - input_files: input file names\n\
         - output_files: output file names that will be created\n\
         - description: brief explanation of what the command does\n"
    )
}

/// Read a model reply. The outermost `{...}` is parsed as JSON; without a
/// usable object the whole reply is taken as the command.
pub fn parse_reply(text: &str, fallback_inputs: &[String]) -> CommandProposal {
    let object = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<Value>(&text[start..=end]).ok()
        }
        _ => None,
    };

    match object {
        Some(Value::Object(map)) => {
            let string = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
            let list = |key: &str| -> Vec<String> {
                map.get(key)
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            };
            let raw_command = string("linux_command").unwrap_or_default();
            CommandProposal {
                command_template: Some(
                    string("command_template").unwrap_or_else(|| raw_command.clone()),
                ),
                raw_command,
                declared_inputs: list("input_files"),
                expected_outputs: list("output_files"),
                description: string("description").unwrap_or_default(),
                steps: list("steps"),
            }
        }
        _ => CommandProposal {
            raw_command: text.to_string(),
            command_template: Some(text.to_string()),
            declared_inputs: fallback_inputs.to_vec(),
            expected_outputs: Vec::new(),
            description: "Command generated from model reply".to_string(),
            steps: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn history_is_bounded_by_window() {
        let mut ctx = ConversationContext::new("alice", 4);
        for i in 0..5 {
            ctx.record_exchange(format!("q{i}"), format!("a{i}"));
        }
        let contents: Vec<&str> = ctx.history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "a3", "q4", "a4"]);
        assert_eq!(ctx.history[0].role, Role::User);
    }

    #[test]
    fn json_embedded_in_prose_is_extracted() {
        let reply = r#"Sure! Here you go:
        {"linux_command": "ffmpeg -i video.mp4 -vn -acodec libmp3lame audio.mp3",
         "input_files": ["video.mp4"], "output_files": ["audio.mp3"],
         "description": "Extracts audio"}
        Let me know if you need anything else."#;
        let p = parse_reply(reply, &[]);
        assert_eq!(p.raw_command, "ffmpeg -i video.mp4 -vn -acodec libmp3lame audio.mp3");
        assert_eq!(p.command_template.as_deref(), Some(p.raw_command.as_str()));
        assert_eq!(p.declared_inputs, vec!["video.mp4".to_string()]);
        assert_eq!(p.expected_outputs, vec!["audio.mp3".to_string()]);
        assert_eq!(p.description, "Extracts audio");
    }

    #[test]
    fn plain_text_reply_becomes_the_command() {
        let files = vec!["a.mp4".to_string()];
        let p = parse_reply("ffmpeg -i a.mp4 out.wav", &files);
        assert_eq!(p.raw_command, "ffmpeg -i a.mp4 out.wav");
        assert_eq!(p.declared_inputs, files);
    }

    #[test]
    fn broken_json_falls_back_to_text() {
        let p = parse_reply("{\"linux_command\": ", &[]);
        assert_eq!(p.raw_command, "{\"linux_command\": ");
    }

    #[test]
    fn user_message_lists_files() {
        let msg = render_user_message("make it grey", &["x.png".to_string()]);
        assert!(msg.contains("Prompt: make it grey"));
        assert!(msg.contains(r#"Uploaded Files: ["x.png"]"#));
        assert!(msg.contains("{input_file}"));
    }

    #[tokio::test]
    async fn static_proposer_returns_its_proposal() {
        let proposal = CommandProposal::new("ls", vec![]);
        let proposer = StaticProposer { proposal: proposal.clone() };
        let ctx = ConversationContext::new("alice", 10);
        assert_eq!(proposer.propose("anything", &ctx).await.unwrap(), proposal);
    }
}
