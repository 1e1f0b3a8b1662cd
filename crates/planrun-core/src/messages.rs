//! Conversation and subtask snapshots loaded for each iteration.

use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The model.
    Assistant,
}

/// Stage markers recorded on a stored message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvoMessageFlags {
    /// The reply produced a plan (subtasks).
    pub did_make_plan: bool,
    /// The reply was produced during context gathering.
    pub is_context_stage: bool,
    /// The reply was produced during implementation.
    pub is_implementation_stage: bool,
}

/// One stored conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoMessage {
    /// Message identifier.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Stored token count.
    pub tokens: usize,
    /// Stage markers.
    #[serde(default)]
    pub flags: ConvoMessageFlags,
}

impl ConvoMessage {
    /// Whether the model authored this message.
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// One planned subtask.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    /// Short title.
    pub title: String,
    /// Whether the subtask is done.
    pub is_finished: bool,
}

/// Split subtask titles into `(finished, unfinished)`.
pub fn partition_subtasks(subtasks: &[Subtask]) -> (Vec<&str>, Vec<&str>) {
    let mut finished = Vec::new();
    let mut unfinished = Vec::new();
    for task in subtasks {
        if task.is_finished {
            finished.push(task.title.as_str());
        } else {
            unfinished.push(task.title.as_str());
        }
    }
    (finished, unfinished)
}
