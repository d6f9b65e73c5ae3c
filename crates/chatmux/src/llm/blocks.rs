//! Common block format shared by the OpenAI-protocol adapters.
//!
//! Every content item becomes its own turn entry holding exactly one block:
//!
//! ```json
//! [{"role": "user", "content": [{"type": "text", "text": "Hello!"}]},
//!  {"role": "user", "content": [{"type": "image_url",
//!                                "image_url": {"url": "data:image/jpeg;base64,..."}}]}]
//! ```

use serde::Serialize;

use super::error::LLMError;
use crate::conversation::{Content, Conversation, Role};
use crate::image_codec;

/// A turn entry in the common format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// A single content block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Flatten a conversation into one single-block entry per content item.
pub fn to_common_blocks(conversation: &Conversation) -> Result<Vec<CommonMessage>, LLMError> {
    let mut blocks = Vec::new();
    for message in conversation.messages() {
        for content in message.content() {
            let block = match content {
                Content::Text { text } => ContentBlock::Text { text: text.clone() },
                Content::Image { image } => ContentBlock::ImageUrl {
                    image_url: ImageUrl {
                        url: image_codec::data_uri(&image_codec::encode(image)?),
                    },
                },
            };
            blocks.push(CommonMessage {
                role: message.role(),
                content: vec![block],
            });
        }
    }
    Ok(blocks)
}
