//! Provider-agnostic conversational completion.
//!
//! Build a [`Conversation`], resolve a model name to an adapter through the
//! [`ProviderRegistry`], and ask the adapter for the next assistant reply.
//! Every backend is reached through the same [`LLMProvider`] contract, with
//! bounded retry applied uniformly.

pub mod config;
pub mod conversation;
pub mod image_codec;
pub mod llm;
pub mod transcript;

pub use config::{AdapterConfig, Config, EndpointsConfig, GenerationOptions};
pub use conversation::{Content, Conversation, ConversationError, Message, Role};
pub use image_codec::Image;
pub use llm::{LLMError, LLMProvider, Provider, ProviderRegistry};
