//! Core execution trait and a scripted mock

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::ModelTarget;
use crate::llm::streaming::{StreamChunk, StreamHandle, create_stream_channel};
use crate::llm::types::{Completion, ExecutionRequest, LlmError};

/// Stateless model executor - each call is independent (fresh context)
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// Single request, returning once the full answer is in
    async fn execute(&self, request: ExecutionRequest) -> Result<Completion, LlmError>;

    /// Streaming request. The handle yields thought and content deltas
    /// until the provider finishes or `cancel` fires.
    async fn stream(&self, request: ExecutionRequest, cancel: CancellationToken) -> Result<StreamHandle, LlmError>;
}

/// Run a request to completion, streaming when asked.
///
/// Returns `LlmError::Cancelled` once `cancel` fires, on either path.
pub async fn complete(
    executor: &dyn ModelExecutor,
    request: ExecutionRequest,
    stream: bool,
    cancel: &CancellationToken,
) -> Result<Completion, LlmError> {
    if stream {
        let handle = executor.stream(request, cancel.clone()).await?;
        return handle.collect(cancel).await;
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        result = executor.execute(request) => result,
    }
}

/// Executor that replays scripted responses, for tests and dry runs.
///
/// Responses are consumed in order. Once the script is empty the fallback
/// is returned for every call.
pub struct MockExecutor {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    fallback: Result<Completion, LlmError>,
    calls: Mutex<Vec<ModelTarget>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(LlmError::InvalidResponse("no scripted response".to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            fallback: Ok(Completion::new(text, 100)),
            ..Self::new()
        }
    }

    /// Fail every call with the same error.
    pub fn failing(err: LlmError) -> Self {
        Self {
            fallback: Err(err),
            ..Self::new()
        }
    }

    pub fn push_ok(&self, text: impl Into<String>) -> &Self {
        self.push(Ok(Completion::new(text, 100)))
    }

    pub fn push_err(&self, err: LlmError) -> &Self {
        self.push(Err(err))
    }

    fn push(&self, response: Result<Completion, LlmError>) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(response);
        self
    }

    /// Targets called so far, in order.
    pub fn calls(&self) -> Vec<ModelTarget> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn next_response(&self, request: &ExecutionRequest) -> Result<Completion, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.target.clone());
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ModelExecutor for MockExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<Completion, LlmError> {
        self.next_response(&request)
    }

    async fn stream(&self, request: ExecutionRequest, _cancel: CancellationToken) -> Result<StreamHandle, LlmError> {
        let completion = self.next_response(&request)?;
        let (tx, handle) = create_stream_channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(StreamChunk::Delta {
                    kind: crate::llm::ChunkKind::Content,
                    text: completion.text,
                })
                .await;
            let _ = tx
                .send(StreamChunk::Done {
                    tokens_used: completion.tokens_used,
                })
                .await;
        });
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Provider;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            target: ModelTarget::new(Provider::Groq, "llama-3.1-8b-instant"),
            credential: "key".to_string(),
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            max_tokens: 100,
            temperature: 0.3,
        }
    }

    #[tokio::test]
    async fn test_mock_replays_script_then_fallback() {
        let mock = MockExecutor::always("fallback");
        mock.push_ok("first").push_err(LlmError::Network("down".to_string()));

        assert_eq!(mock.execute(request()).await.unwrap().text, "first");
        assert!(mock.execute(request()).await.is_err());
        assert_eq!(mock.execute(request()).await.unwrap().text, "fallback");
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_without_script_fails() {
        let mock = MockExecutor::new();
        assert!(matches!(
            mock.execute(request()).await,
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_stream() {
        let mock = MockExecutor::always("[[1]]");
        let cancel = CancellationToken::new();
        let handle = mock.stream(request(), cancel.clone()).await.unwrap();
        let completion = handle.collect(&cancel).await.unwrap();
        assert_eq!(completion.text, "[[1]]");
        assert_eq!(completion.tokens_used, 100);
    }
}
