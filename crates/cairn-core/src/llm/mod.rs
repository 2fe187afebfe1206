//! LLM integration - OpenRouter API
//!
//! Community summaries and global answers only need two capabilities:
//! free-text generation from a prompt and a vector embedding of a text.
//! Both are traits ([`TextGenerator`], [`Embedder`]) so the pipeline can
//! run against scripted doubles; [`LlmClient`] implements them against
//! OpenRouter's OpenAI-compatible endpoints.

mod client;
mod provider;
mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use provider::{Embedder, Generation, GenerationOptions, TextGenerator};
pub use types::{
    ChatRequest, ChatResponse, Choice, EmbeddingRequest, EmbeddingResponse, EmbeddingVector,
    FinishReason, LlmResponse, Message, MessageRole, Usage,
};
