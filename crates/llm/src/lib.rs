//! LLM Transport and Client Pool for swarmcraft orchestration.
//!
//! This crate provides the leaf layer of the orchestration stack: an HTTP
//! client for an OpenAI-compatible chat-completions endpoint, streaming
//! support, and a process-wide pool of such clients keyed by endpoint. It
//! has no knowledge of tasks, workflows, or retries — those live in the
//! `orchestrator` crate one layer up.

pub mod error;
pub mod message;
pub mod pool;
pub mod transport;

pub use error::{LlmError, Result};
pub use message::{ChatChunk, ChatConfig, ChatRequest, ChatResponse, Message, Role, UsageMetadata};
pub use pool::{ClientPool, Outcome, PoolConfig, PooledClient};
pub use transport::{ChatModel, ChatStream, OpenAiCompatibleClient};
