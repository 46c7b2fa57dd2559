//! Model execution layer - provider HTTP clients, streaming and answer parsing
//!
//! This module provides:
//! - ModelExecutor trait for calling a model, with a scripted MockExecutor
//! - HttpExecutor speaking the chat-completions, Anthropic and Gemini formats
//! - Streaming with thought/content deltas and cancellation
//! - Credential resolution per provider
//! - JSON extraction and typed parsing of model answers

pub mod client;
pub mod credentials;
pub mod http;
pub mod response;
pub mod streaming;
pub mod types;

pub use client::{MockExecutor, ModelExecutor, complete};
pub use credentials::{CredentialResolver, EnvCredentials, StaticCredentials};
pub use http::HttpExecutor;
pub use response::{EvaluationAnswer, GeneratedPuzzle, extract_json, parse_concepts, parse_evaluation, parse_generated_puzzle};
pub use streaming::{ChunkKind, StreamChunk, StreamHandle, create_stream_channel};
pub use types::{Completion, ExecutionRequest, LlmError, message_signals_rate_limit};
