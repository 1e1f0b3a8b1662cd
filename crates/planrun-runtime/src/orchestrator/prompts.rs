//! Plain-text prompt templates.

use std::fmt::Write as _;

use planrun_core::ApiError;
use planrun_llm::ChatMessage;

use super::iteration::MissingFileChoice;
use crate::collaborators::{ContextPart, ImageContext, PromptBuilder, PromptInput, SystemPromptInput};

const CONTEXT_INSTRUCTIONS: &str = "Identify the files needed for the task. \
List each one on its own line as `- path`, then stop.";

const PLANNING_INSTRUCTIONS: &str = "Break the task into subtasks. \
Number them, give each a short title, and describe the files each one changes.";

const CHAT_INSTRUCTIONS: &str = "Answer the user's question about the project. \
Do not write or change files.";

const IMPLEMENTATION_INSTRUCTIONS: &str = "Implement the next unfinished subtask. \
Start every file with a `- path:` line followed by a fenced code block holding the full content.";

const EXEC_NOTE: &str = "Commands needed to apply and verify the changes may be \
listed in a `_apply.sh` block.";

const CONTINUE_PROMPT: &str = "Continue with the next step.";

/// Templates with no external dependencies.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicPromptBuilder;

impl PromptBuilder for BasicPromptBuilder {
    fn model_context(&self, contexts: &[ContextPart], include_maps: bool) -> Result<String, ApiError> {
        let mut out = String::new();
        for part in contexts.iter().filter(|p| include_maps || !p.is_map) {
            let label = if part.is_map { "map" } else { "file" };
            let _ = writeln!(out, "### {label}: {}\n{}\n", part.name, part.body.trim_end());
        }
        Ok(out)
    }

    fn system_prompt(&self, input: &SystemPromptInput<'_>) -> Result<String, ApiError> {
        let stage = input.stage;
        let instructions = if stage.is_context_stage() {
            CONTEXT_INSTRUCTIONS
        } else if input.is_chat_only {
            CHAT_INSTRUCTIONS
        } else if stage.is_planning_stage() {
            PLANNING_INSTRUCTIONS
        } else {
            IMPLEMENTATION_INSTRUCTIONS
        };

        let mut out = String::from("You are a coding assistant working on a plan.\n\n");
        out.push_str(instructions);
        out.push('\n');
        if input.exec_enabled && !input.is_chat_only {
            out.push_str(EXEC_NOTE);
            out.push('\n');
        }
        if !input.model_context.is_empty() {
            out.push_str("\n## Context\n\n");
            out.push_str(input.model_context);
        }
        Ok(out)
    }

    fn prompt_message(&self, input: &PromptInput<'_>) -> Result<ChatMessage, ApiError> {
        let stage = input.stage;
        if !stage.is_user_prompt && !stage.is_follow_up {
            return Ok(ChatMessage::user(CONTINUE_PROMPT));
        }
        if input.prompt.trim().is_empty() {
            return Err(ApiError::other("Prompt is empty"));
        }
        let mut text = String::new();
        if stage.is_follow_up {
            text.push_str("Follow-up on the current plan.\n\n");
        }
        text.push_str(input.prompt);
        if input.did_load_chat_only_context {
            text.push_str("\n\nThe requested context is now loaded.");
        }
        if input.exec_enabled && stage.is_implementation_stage() {
            text.push_str("\n\n");
            text.push_str(EXEC_NOTE);
        }
        Ok(ChatMessage::user(text))
    }

    fn missing_file_messages(
        &self,
        choice: MissingFileChoice,
        _input: &PromptInput<'_>,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let text = match choice {
            MissingFileChoice::Load => {
                "The missing file is now loaded in context. Continue the reply where it stopped."
            }
            MissingFileChoice::Skip => "Skip the missing file and continue with the remaining changes.",
            MissingFileChoice::Overwrite => {
                "Write the missing file from scratch with its full content, then continue."
            }
        };
        Ok(vec![ChatMessage::user(text)])
    }

    fn image_messages(&self, images: &[ImageContext]) -> Result<(Vec<ChatMessage>, usize), ApiError> {
        let tokens = images.iter().map(|img| img.tokens).sum();
        let messages = images
            .iter()
            .map(|img| {
                ChatMessage::user(format!(
                    "[image {} ({})]\n{}",
                    img.name, img.media_type, img.data
                ))
            })
            .collect();
        Ok((messages, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::stage::{LastMessage, StageInputs, classify};

    fn part(name: &str, is_map: bool) -> ContextPart {
        ContextPart {
            name: name.into(),
            body: format!("body of {name}\n"),
            is_map,
        }
    }

    #[test]
    fn maps_omitted_unless_requested() {
        let parts = [part("src/lib.rs", false), part("project", true)];
        let without = BasicPromptBuilder.model_context(&parts, false).unwrap();
        assert!(without.contains("### file: src/lib.rs"));
        assert!(!without.contains("project"));

        let with = BasicPromptBuilder.model_context(&parts, true).unwrap();
        assert!(with.contains("### map: project"));
    }

    #[test]
    fn system_prompt_follows_stage() {
        let context_stage = classify(&StageInputs {
            auto_context: true,
            has_context_map: true,
            ..StageInputs::default()
        });
        let sys = BasicPromptBuilder
            .system_prompt(&SystemPromptInput {
                stage: &context_stage,
                model_context: "### map: x\n",
                is_chat_only: false,
                exec_enabled: true,
            })
            .unwrap();
        assert!(sys.contains("Identify the files"));
        assert!(sys.contains("_apply.sh"));
        assert!(sys.contains("## Context"));

        let implementation = classify(&StageInputs {
            iteration: 1,
            last_message: Some(LastMessage {
                is_assistant: true,
                did_make_plan: true,
                ..LastMessage::default()
            }),
            ..StageInputs::default()
        });
        let sys = BasicPromptBuilder
            .system_prompt(&SystemPromptInput {
                stage: &implementation,
                model_context: "",
                is_chat_only: false,
                exec_enabled: false,
            })
            .unwrap();
        assert!(sys.contains("next unfinished subtask"));
        assert!(!sys.contains("## Context"));
    }

    #[test]
    fn later_iterations_use_continue_prompt() {
        let stage = classify(&StageInputs {
            iteration: 3,
            ..StageInputs::default()
        });
        let msg = BasicPromptBuilder
            .prompt_message(&PromptInput {
                prompt: "ignored",
                stage: &stage,
                did_load_chat_only_context: false,
                exec_enabled: false,
            })
            .unwrap();
        assert_eq!(msg, ChatMessage::user(CONTINUE_PROMPT));
    }

    #[test]
    fn empty_user_prompt_is_rejected() {
        let stage = classify(&StageInputs::default());
        let err = BasicPromptBuilder
            .prompt_message(&PromptInput {
                prompt: "  ",
                stage: &stage,
                did_load_chat_only_context: false,
                exec_enabled: false,
            })
            .unwrap_err();
        assert!(err.message.contains("empty"));
    }

    #[test]
    fn image_tokens_are_summed() {
        let images = [
            ImageContext {
                name: "a.png".into(),
                media_type: "image/png".into(),
                data: "ref:a".into(),
                tokens: 85,
            },
            ImageContext {
                name: "b.png".into(),
                media_type: "image/png".into(),
                data: "ref:b".into(),
                tokens: 170,
            },
        ];
        let (msgs, tokens) = BasicPromptBuilder.image_messages(&images).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(tokens, 255);
    }

    #[test]
    fn missing_file_choices_differ() {
        let stage = classify(&StageInputs::default());
        let input = PromptInput {
            prompt: "p",
            stage: &stage,
            did_load_chat_only_context: false,
            exec_enabled: false,
        };
        let load = BasicPromptBuilder
            .missing_file_messages(MissingFileChoice::Load, &input)
            .unwrap();
        let skip = BasicPromptBuilder
            .missing_file_messages(MissingFileChoice::Skip, &input)
            .unwrap();
        assert_ne!(load, skip);
    }
}
