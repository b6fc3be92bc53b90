//! Perplexity Sonar client for real-time market research
//!
//! This crate provides a client for Perplexity's Sonar API with two request
//! modes:
//! - Free-form grounded text, backed by real-time web search
//! - Structured output validated against a target type's JSON schema, with
//!   recovery of JSON objects from noisy model replies (`<think>` blocks,
//!   markdown fences, leaked tool-use narration) and bounded retry when a
//!   reply contains no answer at all

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod research;
pub mod types;

pub use client::{
    ChatTransport, HttpTransport, RequestOptions, SonarClient, MODEL_DIRECT, MODEL_REASONING,
};
pub use config::SonarConfig;
pub use error::{SonarError, SonarResult};
pub use extract::extract_json;
pub use research::{build_research_prompt, EventInfo, MarketInfo};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, Choice, ContentPart,
    MessageContent, ResponseMessage, SearchRecency,
};
