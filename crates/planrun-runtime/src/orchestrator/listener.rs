//! Reply stream consumption.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use planrun_core::{ApiError, ReplyId, StreamMessage};
use planrun_llm::tokens::estimate_text_tokens;
use planrun_llm::{CompletionStream, ProviderError, StreamChunk, Usage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::iteration::FollowUp;
use super::stage::StageDecision;
use crate::collaborators::StreamListener;
use crate::session::session::Session;

/// How a reply stream ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenOutcome {
    /// The run is complete.
    Finished,
    /// Run another iteration with these follow-up flags.
    Continue(FollowUp),
    /// The reply failed; reported on the terminal channel.
    Failed(ApiError),
    /// The stream scope was cancelled.
    Cancelled,
}

/// Everything a listener needs for one reply.
#[derive(Debug)]
pub struct ListenContext {
    /// Session the reply belongs to.
    pub session: Arc<Session>,
    /// Reply being streamed.
    pub reply_id: ReplyId,
    /// Iteration that produced the request.
    pub iteration: u32,
    /// Stage of that iteration.
    pub stage: StageDecision,
    /// Estimated request tokens.
    pub request_tokens: usize,
    /// Model serving the request.
    pub model_name: String,
    /// Stream scope of the model call.
    pub cancel: CancellationToken,
    /// Reply accumulator.
    pub parser: ReplyParser,
}

/// Accumulates reply text and notes the files it writes.
///
/// A file block is a `- path:` line directly followed by a code fence.
#[derive(Clone, Debug, Default)]
pub struct ReplyParser {
    content: String,
    line: String,
    prev_line: Option<String>,
    in_block: bool,
    files: Vec<String>,
    usage: Option<Usage>,
}

impl ReplyParser {
    /// Empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a reply fragment.
    pub fn add_chunk(&mut self, chunk: &str) {
        self.content.push_str(chunk);
        for ch in chunk.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line);
                self.process_line(&line);
            } else {
                self.line.push(ch);
            }
        }
    }

    /// Record usage reported by the backend.
    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    /// Reply text so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Files the reply opened a block for, in order of first appearance.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Usage reported by the backend, if any.
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Reply tokens: reported usage, or an estimate.
    pub fn output_tokens(&self) -> u64 {
        self.usage
            .map_or_else(|| estimate_text_tokens(&self.content) as u64, |u| u.output_tokens)
    }

    fn process_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if self.in_block {
                self.in_block = false;
            } else {
                self.in_block = true;
                if let Some(path) = self.prev_line.as_deref().and_then(file_label)
                    && !self.files.iter().any(|f| f == path)
                {
                    self.files.push(path.to_string());
                }
            }
        }
        if !trimmed.is_empty() {
            self.prev_line = Some(trimmed.to_string());
        }
    }
}

fn file_label(line: &str) -> Option<&str> {
    let path = line.strip_prefix("- ")?.strip_suffix(':')?.trim().trim_matches('`');
    (!path.is_empty() && !path.contains(char::is_whitespace)).then_some(path)
}

/// Listener that relays the reply to subscribers and finishes the run when
/// the stream ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplyStreamListener;

enum Next {
    Chunk(Result<StreamChunk, ProviderError>),
    End,
    Cancelled,
}

#[async_trait]
impl StreamListener for ReplyStreamListener {
    async fn listen(&self, ctx: ListenContext, mut stream: CompletionStream) -> ListenOutcome {
        let ListenContext {
            session,
            reply_id,
            iteration,
            cancel,
            mut parser,
            ..
        } = ctx;
        session.publish(StreamMessage::Start {
            reply_id: reply_id.clone(),
        });

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => Next::Cancelled,
                item = stream.next() => item.map_or(Next::End, Next::Chunk),
            };
            match next {
                Next::Chunk(Ok(StreamChunk::Delta { content })) => {
                    parser.add_chunk(&content);
                    session.publish(StreamMessage::Reply { chunk: content });
                }
                Next::Chunk(Ok(StreamChunk::Usage { usage })) => parser.set_usage(usage),
                Next::Chunk(Ok(StreamChunk::Done { finish_reason })) => {
                    debug!(%reply_id, ?finish_reason, "model stream done");
                    break;
                }
                Next::End => break,
                Next::Chunk(Err(ProviderError::Cancelled)) | Next::Cancelled => {
                    debug!(%reply_id, "reply stream cancelled");
                    session.finish_reply();
                    return ListenOutcome::Cancelled;
                }
                Next::Chunk(Err(e)) => {
                    warn!(%reply_id, error = %e, "reply stream failed");
                    session.finish_reply();
                    return ListenOutcome::Failed(ApiError::stream_runtime(format!(
                        "Error streaming reply: {e}"
                    )));
                }
            }
        }

        session.flush_buffer();
        session.publish(StreamMessage::Finished);
        session.finish_reply();
        info!(
            %reply_id,
            iteration,
            output_tokens = parser.output_tokens(),
            files = parser.files().len(),
            "reply finished"
        );
        ListenOutcome::Finished
    }
}
