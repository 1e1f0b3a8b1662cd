//! Token budget checks and conversation fitting.

use planrun_core::messages::{ConvoMessage, Role};
use planrun_llm::ChatMessage;
use planrun_llm::tokens::{TOKENS_PER_MESSAGE, estimate_text_tokens};

use crate::collaborators::ConvoSummary;

/// Tokens committed before the conversation is added.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenBudget {
    /// Preamble, prompt, summary, images, and request overhead.
    pub before_convo: usize,
    /// Largest input the selected role accepts.
    pub max_tokens: usize,
}

impl TokenBudget {
    /// Whether the fixed part alone is over the limit.
    pub fn exceeded(&self) -> bool {
        self.before_convo > self.max_tokens
    }

    /// Tokens left for conversation history.
    pub fn remaining(&self) -> usize {
        self.max_tokens.saturating_sub(self.before_convo)
    }
}

/// History selected to fit a budget.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationFit {
    /// Messages in chronological order, led by the summary when one was used.
    pub messages: Vec<ChatMessage>,
    /// Conversation messages left out.
    pub dropped: usize,
    /// Estimated tokens of the kept conversation messages.
    pub tokens: usize,
}

fn message_tokens(msg: &ConvoMessage) -> usize {
    let content = if msg.tokens > 0 {
        msg.tokens
    } else {
        estimate_text_tokens(&msg.content)
    };
    content + TOKENS_PER_MESSAGE
}

/// Keep the newest conversation messages that fit in `available` tokens.
///
/// Selection walks backwards and stops at the first message that does not
/// fit, so the kept history is always a contiguous suffix. When anything is
/// dropped and a summary exists, the summary leads the result as a system
/// message; its tokens are already part of the fixed budget.
pub fn fit_conversation(
    convo: &[ConvoMessage],
    summary: Option<&ConvoSummary>,
    available: usize,
) -> ConversationFit {
    let mut used = 0usize;
    let mut start = convo.len();
    for (idx, msg) in convo.iter().enumerate().rev() {
        let cost = message_tokens(msg);
        if used + cost > available {
            break;
        }
        used += cost;
        start = idx;
    }

    let dropped = start;
    let mut messages = Vec::with_capacity(convo.len() - start + 1);
    if dropped > 0
        && let Some(summary) = summary
    {
        messages.push(ChatMessage::system(summary.content.clone()));
    }
    messages.extend(convo[start..].iter().map(|m| match m.role {
        Role::User => ChatMessage::user(m.content.clone()),
        Role::Assistant => ChatMessage::assistant(m.content.clone()),
    }));

    ConversationFit {
        messages,
        dropped,
        tokens: used,
    }
}
