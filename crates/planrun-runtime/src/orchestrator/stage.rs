//! Stage classification for one iteration.
//!
//! [`classify`] is pure: the same [`StageInputs`] always produce the same
//! [`StageDecision`]. The context stage is reachable only from planning, so a
//! decision is never both context and implementation.

use planrun_core::messages::ConvoMessage;
use planrun_llm::ModelRole;
use serde::{Deserialize, Serialize};

/// Processing stage of an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Planning, gathering context first.
    Context,
    /// Planning or chat.
    Planning,
    /// Implementing planned subtasks.
    Implementation,
}

impl Stage {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Planning => "planning",
            Self::Implementation => "implementation",
        }
    }

    /// Model role serving this stage.
    pub fn model_role(self) -> ModelRole {
        match self {
            Self::Context => ModelRole::Architect,
            Self::Planning => ModelRole::Planner,
            Self::Implementation => ModelRole::Coder,
        }
    }
}

/// State of the most recent conversation message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LastMessage {
    /// Authored by the model.
    pub is_assistant: bool,
    /// Produced a plan.
    pub did_make_plan: bool,
    /// Produced during context gathering.
    pub is_context_stage: bool,
    /// Produced during implementation.
    pub is_implementation_stage: bool,
}

impl From<&ConvoMessage> for LastMessage {
    fn from(msg: &ConvoMessage) -> Self {
        Self {
            is_assistant: msg.is_assistant(),
            did_make_plan: msg.flags.did_make_plan,
            is_context_stage: msg.flags.is_context_stage,
            is_implementation_stage: msg.flags.is_implementation_stage,
        }
    }
}

/// Everything stage classification depends on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageInputs {
    /// Iteration number, 0 for the activation's first.
    pub iteration: u32,
    /// Chat-only run.
    pub is_chat_only: bool,
    /// The user asked to continue the previous reply.
    pub is_user_continue: bool,
    /// Context is loaded automatically.
    pub auto_context: bool,
    /// A project map is loaded.
    pub has_context_map: bool,
    /// The project map has no entries.
    pub context_map_empty: bool,
    /// The conversation holds at least one model reply.
    pub has_assistant_reply: bool,
    /// The plan has subtasks.
    pub has_subtasks: bool,
    /// Last conversation message, if any.
    pub last_message: Option<LastMessage>,
    /// The previous iteration asked to load follow-up context.
    pub should_load_follow_up_context: bool,
}

/// Classification result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageDecision {
    /// Selected stage.
    pub stage: Stage,
    /// First iteration continuing existing work rather than a fresh prompt.
    pub is_follow_up: bool,
    /// First iteration carrying a new user prompt.
    pub is_user_prompt: bool,
    /// The user continued a reply the model authored.
    pub is_true_user_continue: bool,
    /// Auto-context is on and a project map exists.
    pub auto_context_enabled: bool,
    /// Context selection is left to the model.
    pub smart_context_enabled: bool,
}

impl StageDecision {
    /// Planning (including context gathering).
    pub fn is_planning_stage(&self) -> bool {
        matches!(self.stage, Stage::Planning | Stage::Context)
    }

    /// Context gathering.
    pub fn is_context_stage(&self) -> bool {
        self.stage == Stage::Context
    }

    /// Implementation.
    pub fn is_implementation_stage(&self) -> bool {
        self.stage == Stage::Implementation
    }
}

/// Classify an iteration.
pub fn classify(inputs: &StageInputs) -> StageDecision {
    let first = inputs.iteration == 0;
    let last = inputs.last_message;

    let was_context_stage = last.is_some_and(|m| m.is_context_stage);
    let did_make_plan = last.is_some_and(|m| m.did_make_plan);
    let was_implementation_stage = last.is_some_and(|m| m.is_implementation_stage);

    let is_true_user_continue =
        first && inputs.is_user_continue && last.is_some_and(|m| m.is_assistant);
    let is_user_prompt = first && (!inputs.is_chat_only || !is_true_user_continue);

    let auto_context_enabled = inputs.auto_context && inputs.has_context_map;

    let is_follow_up = first
        && !is_true_user_continue
        && (inputs.has_subtasks || (inputs.is_chat_only && inputs.has_assistant_reply));

    let is_planning = inputs.is_chat_only
        || last.is_none()
        || is_user_prompt
        || (!did_make_plan && !was_implementation_stage);

    let is_context = auto_context_enabled
        && is_planning
        && (inputs.is_chat_only || !is_follow_up)
        && !inputs.context_map_empty
        && !was_context_stage
        && (is_user_prompt || inputs.should_load_follow_up_context);

    let stage = if is_context {
        Stage::Context
    } else if is_planning {
        Stage::Planning
    } else {
        Stage::Implementation
    };

    StageDecision {
        stage,
        is_follow_up,
        is_user_prompt,
        is_true_user_continue,
        auto_context_enabled,
        smart_context_enabled: inputs.auto_context,
    }
}
