//! HTTP executor for the supported providers.
//!
//! Three wire formats are spoken: chat-completions (OpenAI, Groq, Mistral,
//! Cerebras, OpenRouter), Anthropic messages and Gemini `generateContent`.
//! Request bodies and response parsing are plain functions so they can be
//! tested without a network.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{Error as EventSourceError, Event, RequestBuilderExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::Provider;
use crate::llm::client::ModelExecutor;
use crate::llm::streaming::{SseData, StreamChunk, StreamHandle, create_stream_channel, parse_sse_data};
use crate::llm::types::{Completion, ExecutionRequest, LlmError};

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const STREAM_BUFFER: usize = 64;

/// Chat-completions endpoint for OpenAI-compatible providers.
pub fn chat_completions_url(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Openai => Some("https://api.openai.com/v1/chat/completions"),
        Provider::Groq => Some("https://api.groq.com/openai/v1/chat/completions"),
        Provider::Mistral => Some("https://api.mistral.ai/v1/chat/completions"),
        Provider::Cerebras => Some("https://api.cerebras.ai/v1/chat/completions"),
        Provider::Openrouter => Some("https://openrouter.ai/api/v1/chat/completions"),
        Provider::Anthropic | Provider::Gemini => None,
    }
}

/// Request body for a chat-completions call.
pub fn chat_completions_body(request: &ExecutionRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": request.target.model,
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_prompt }
        ],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "response_format": { "type": "json_object" }
    });
    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

/// Request body for the Anthropic messages API.
pub fn anthropic_body(request: &ExecutionRequest) -> Value {
    json!({
        "model": request.target.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "system": request.system_prompt,
        "messages": [
            { "role": "user", "content": request.user_prompt }
        ]
    })
}

/// Request body for Gemini `generateContent`.
pub fn gemini_body(request: &ExecutionRequest) -> Value {
    json!({
        "system_instruction": { "parts": [ { "text": request.system_prompt } ] },
        "contents": [ { "role": "user", "parts": [ { "text": request.user_prompt } ] } ],
        "generationConfig": {
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
            "responseMimeType": "application/json"
        }
    })
}

pub fn parse_chat_completion(body: &Value) -> Result<Completion, LlmError> {
    let message = &body["choices"][0]["message"];
    let text = message["content"]
        .as_str()
        .ok_or_else(|| LlmError::InvalidResponse("no content in choices[0].message".to_string()))?;
    Ok(Completion {
        text: text.to_string(),
        thought: message["reasoning_content"].as_str().unwrap_or_default().to_string(),
        tokens_used: body["usage"]["total_tokens"].as_u64().unwrap_or(0),
    })
}

pub fn parse_anthropic(body: &Value) -> Result<Completion, LlmError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("no content blocks".to_string()))?;

    let mut text = String::new();
    let mut thought = String::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("thinking") => thought.push_str(block["thinking"].as_str().unwrap_or_default()),
            _ => {}
        }
    }

    let usage = &body["usage"];
    Ok(Completion {
        text,
        thought,
        tokens_used: usage["input_tokens"].as_u64().unwrap_or(0) + usage["output_tokens"].as_u64().unwrap_or(0),
    })
}

pub fn parse_gemini(body: &Value) -> Result<Completion, LlmError> {
    let parts = body["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("no candidate parts".to_string()))?;

    let mut text = String::new();
    let mut thought = String::new();
    for part in parts {
        let Some(t) = part["text"].as_str() else { continue };
        if part["thought"].as_bool().unwrap_or(false) {
            thought.push_str(t);
        } else {
            text.push_str(t);
        }
    }

    Ok(Completion {
        text,
        thought,
        tokens_used: body["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0),
    })
}

/// Map a non-success HTTP status and body into an error.
pub fn error_from_status(status: u16, retry_after: Option<Duration>, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    if status == 429 {
        LlmError::RateLimited {
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            message,
        }
    } else {
        LlmError::Api { status, message }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Executor that talks to provider HTTP APIs
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn build(&self, request: &ExecutionRequest, stream: bool) -> RequestBuilder {
        let provider = request.provider();
        match provider {
            Provider::Anthropic => self
                .client
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", &request.credential)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(request)),
            Provider::Gemini => self
                .client
                .post(format!("{}/{}:generateContent", GEMINI_BASE_URL, request.target.model))
                .query(&[("key", request.credential.as_str())])
                .json(&gemini_body(request)),
            _ => {
                // Every remaining provider has a chat-completions URL
                let url = chat_completions_url(provider).unwrap_or_default();
                self.client
                    .post(url)
                    .bearer_auth(&request.credential)
                    .json(&chat_completions_body(request, stream))
            }
        }
    }

    async fn send(&self, request: &ExecutionRequest) -> Result<Value, LlmError> {
        let response = self.build(request, false).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(status.as_u16(), retry, &body));
        }
        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl ModelExecutor for HttpExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<Completion, LlmError> {
        tracing::debug!(target = %request.target, "Sending request");
        let body = self.send(&request).await?;
        match request.provider() {
            Provider::Anthropic => parse_anthropic(&body),
            Provider::Gemini => parse_gemini(&body),
            _ => parse_chat_completion(&body),
        }
    }

    async fn stream(&self, request: ExecutionRequest, cancel: CancellationToken) -> Result<StreamHandle, LlmError> {
        let (tx, handle) = create_stream_channel(STREAM_BUFFER);

        // Anthropic and Gemini are answered in one piece
        if !request.provider().is_openai_compatible() {
            let completion = self.execute(request).await?;
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
            return Ok(handle);
        }

        let mut source = self
            .build(&request, true)
            .eventsource()
            .map_err(|e| LlmError::Network(format!("Failed to open stream: {}", e)))?;

        tokio::spawn(async move {
            let mut tokens_used = 0;
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = source.next() => event,
                };
                let Some(event) = event else {
                    let _ = tx.send(StreamChunk::Done { tokens_used }).await;
                    break;
                };
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => match parse_sse_data(&message.data) {
                        Ok(SseData::Chunks(chunks)) => {
                            for chunk in chunks {
                                if tx.send(chunk).await.is_err() {
                                    source.close();
                                    return;
                                }
                            }
                        }
                        Ok(SseData::Usage(tokens)) => tokens_used = tokens,
                        Ok(SseData::Done) => {
                            let _ = tx.send(StreamChunk::Done { tokens_used }).await;
                            break;
                        }
                        Err(e) => {
                            let _ = tx.send(StreamChunk::Error(e)).await;
                            break;
                        }
                    },
                    Err(EventSourceError::StreamEnded) => {
                        let _ = tx.send(StreamChunk::Done { tokens_used }).await;
                        break;
                    }
                    Err(EventSourceError::InvalidStatusCode(status, response)) => {
                        let retry = retry_after(&response);
                        let body = response.text().await.unwrap_or_default();
                        let _ = tx
                            .send(StreamChunk::Error(error_from_status(status.as_u16(), retry, &body)))
                            .await;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(LlmError::Network(e.to_string()))).await;
                        break;
                    }
                }
            }
            source.close();
        });

        Ok(handle)
    }
}
