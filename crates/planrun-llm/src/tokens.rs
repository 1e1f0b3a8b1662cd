//! Request size estimates.
//!
//! Estimates use roughly four characters per token plus fixed framing
//! overhead per message and per request, which errs on the high side for
//! English and code.

use crate::types::ChatMessage;

/// Framing overhead per message.
pub const TOKENS_PER_MESSAGE: usize = 4;
/// Fixed overhead per request (reply priming).
pub const TOKENS_PER_REQUEST: usize = 3;
/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens in a text fragment.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a set of messages, including framing overhead.
pub fn estimate_messages_tokens<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> usize {
    messages
        .into_iter()
        .map(|m| TOKENS_PER_MESSAGE + estimate_text_tokens(&m.content))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_estimate_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("a"), 1);
        assert_eq!(estimate_text_tokens("abcd"), 1);
        assert_eq!(estimate_text_tokens("abcde"), 2);
    }

    #[test]
    fn messages_include_framing() {
        let msgs = [ChatMessage::system("abcd"), ChatMessage::user("abcdefgh")];
        assert_eq!(estimate_messages_tokens(&msgs), 4 + 1 + 4 + 2);
    }

    #[test]
    fn empty_message_set_is_zero() {
        let msgs: [ChatMessage; 0] = [];
        assert_eq!(estimate_messages_tokens(&msgs), 0);
    }
}
