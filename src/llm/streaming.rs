//! Streaming support for model responses.
//!
//! OpenAI-compatible providers stream Server-Sent Events. Each event carries a
//! `choices[0].delta` whose `reasoning_content` is thought text and whose
//! `content` is answer text. A literal `[DONE]` ends the stream. Chunks are
//! forwarded over a channel to a [`StreamHandle`], which folds them into a
//! [`Completion`] and honours cancellation.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::types::{Completion, LlmError};

/// Which part of the answer a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Thought,
    Content,
}

/// Chunk types emitted to consumers during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Delta { kind: ChunkKind, text: String },
    /// Stream completed successfully
    Done { tokens_used: u64 },
    Error(LlmError),
}

/// Result of parsing one SSE data payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    Chunks(Vec<StreamChunk>),
    /// Usage reported mid-stream, usually on the final event
    Usage(u64),
    Done,
}

/// Handle for receiving streaming chunks.
pub struct StreamHandle {
    receiver: mpsc::Receiver<StreamChunk>,
}

impl StreamHandle {
    pub fn new(receiver: mpsc::Receiver<StreamChunk>) -> Self {
        Self { receiver }
    }

    /// Receive the next chunk from the stream.
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        self.receiver.recv().await
    }

    /// Drain the stream into a completion.
    ///
    /// Returns `LlmError::Cancelled` as soon as the token fires. A channel
    /// that closes without `Done` is treated as an invalid response.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<Completion, LlmError> {
        let mut completion = Completion::default();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                chunk = self.receiver.recv() => chunk,
            };
            match chunk {
                Some(StreamChunk::Delta {
                    kind: ChunkKind::Thought,
                    text,
                }) => completion.thought.push_str(&text),
                Some(StreamChunk::Delta {
                    kind: ChunkKind::Content,
                    text,
                }) => completion.text.push_str(&text),
                Some(StreamChunk::Done { tokens_used }) => {
                    completion.tokens_used = tokens_used;
                    return Ok(completion);
                }
                Some(StreamChunk::Error(e)) => return Err(e),
                None => return Err(LlmError::InvalidResponse("stream ended without completion".to_string())),
            }
        }
    }
}

/// Builder for stream handle pairs (sender and handle).
pub fn create_stream_channel(buffer_size: usize) -> (mpsc::Sender<StreamChunk>, StreamHandle) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (tx, StreamHandle::new(rx))
}

/// Parse one SSE `data:` payload from a chat-completions stream.
pub fn parse_sse_data(data: &str) -> Result<SseData, LlmError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseData::Done);
    }

    let value: Value =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse(format!("bad stream event: {}", e)))?;

    if let Some(message) = value["error"]["message"].as_str() {
        return Err(LlmError::Api {
            status: value["error"]["code"].as_u64().unwrap_or(0) as u16,
            message: message.to_string(),
        });
    }

    let mut chunks = Vec::new();
    let delta = &value["choices"][0]["delta"];
    if let Some(thought) = delta["reasoning_content"].as_str()
        && !thought.is_empty()
    {
        chunks.push(StreamChunk::Delta {
            kind: ChunkKind::Thought,
            text: thought.to_string(),
        });
    }
    if let Some(content) = delta["content"].as_str()
        && !content.is_empty()
    {
        chunks.push(StreamChunk::Delta {
            kind: ChunkKind::Content,
            text: content.to_string(),
        });
    }

    if chunks.is_empty()
        && let Some(tokens) = value["usage"]["total_tokens"].as_u64()
    {
        return Ok(SseData::Usage(tokens));
    }
    Ok(SseData::Chunks(chunks))
}
