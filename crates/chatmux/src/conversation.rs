//! Provider-neutral conversation model.
//!
//! A [`Conversation`] is an append-only, chronologically ordered list of
//! [`Message`]s. Each message carries one or more [`Content`] items whose
//! order is the order they are presented to a backend.
//!
//! The serde shape is the persisted document format:
//!
//! ```json
//! {"messages": [{"role": "user",
//!                "content": [{"type": "text", "text": "Hello!"},
//!                            {"type": "image", "image": "<base64 jpeg>"}],
//!                "created_at": "2024-11-20T10:00:00Z"}]}
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image_codec::Image;

// ============================================================================
// Role
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConversationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ConversationError::UnknownRole(other.to_string())),
        }
    }
}

// ============================================================================
// Content
// ============================================================================

/// A single piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    Image { image: Image },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn image(image: Image) -> Self {
        Content::Image { image }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            Content::Image { .. } => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Content::Image { image } => Some(image),
            Content::Text { .. } => None,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    role: Role,
    content: Vec<Content>,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    content: Vec<Content>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ConversationError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        Message::with_timestamp(raw.role, raw.content, raw.created_at)
    }
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(role: Role, content: Vec<Content>) -> Result<Self, ConversationError> {
        Self::with_timestamp(role, content, Utc::now())
    }

    /// Create a message with an explicit timestamp.
    pub fn with_timestamp(
        role: Role,
        content: Vec<Content>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ConversationError> {
        if content.is_empty() {
            return Err(ConversationError::EmptyContent);
        }
        Ok(Self {
            role,
            content,
            created_at,
        })
    }

    /// A user message holding a single text item.
    pub fn user(text: impl Into<String>) -> Self {
        Self::single(Role::User, Content::text(text))
    }

    /// An assistant message holding a single text item.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::single(Role::Assistant, Content::text(text))
    }

    fn single(role: Role, content: Content) -> Self {
        Self {
            role,
            content: vec![content],
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Text items of this message, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(Content::as_text)
    }

    /// Image items of this message, in order.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.content.iter().filter_map(Content::as_image)
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Ordered history of a chat session. Only ever grows by appending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConversation")]
pub struct Conversation {
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct RawConversation {
    messages: Vec<Message>,
}

impl TryFrom<RawConversation> for Conversation {
    type Error = ConversationError;

    fn try_from(raw: RawConversation) -> Result<Self, Self::Error> {
        let mut conversation = Conversation::new();
        for message in raw.messages {
            conversation.push(message)?;
        }
        Ok(conversation)
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation seeded with an initial message.
    pub fn with_message(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }

    /// Append the next turn. Rejects messages older than the current last one.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationError> {
        if let Some(last) = self.messages.last()
            && message.created_at < last.created_at
        {
            return Err(ConversationError::OutOfOrder {
                previous: last.created_at,
                next: message.created_at,
            });
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Every image in the conversation, in presentation order across turns.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.messages.iter().flat_map(Message::images)
    }
}

// ============================================================================
// ConversationError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("message content must not be empty")]
    EmptyContent,

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("message at {next} is older than the previous message at {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use image::{Rgb, RgbImage};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 20, 10, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn red_square() -> Image {
        Image::from(RgbImage::from_pixel(4, 4, Rgb([200, 20, 20])))
    }

    #[test]
    fn message_requires_content() {
        let err = Message::new(Role::User, vec![]).unwrap_err();
        assert!(matches!(err, ConversationError::EmptyContent));
    }

    #[test]
    fn message_preserves_content_order() {
        let message = Message::new(
            Role::User,
            vec![
                Content::text("Hello!"),
                Content::image(red_square()),
                Content::text("What is this?"),
            ],
        )
        .unwrap();

        assert_eq!(message.texts().collect::<Vec<_>>(), ["Hello!", "What is this?"]);
        assert_eq!(message.images().count(), 1);
        assert!(matches!(message.content()[1], Content::Image { .. }));
    }

    #[test]
    fn push_rejects_out_of_order_messages() {
        let mut conversation = Conversation::new();
        conversation
            .push(Message::with_timestamp(Role::User, vec![Content::text("a")], at(10)).unwrap())
            .unwrap();

        let err = conversation
            .push(
                Message::with_timestamp(Role::Assistant, vec![Content::text("b")], at(5)).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConversationError::OutOfOrder { .. }));
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn conversation_collects_images_across_turns() {
        let mut conversation = Conversation::with_message(
            Message::with_timestamp(
                Role::User,
                vec![Content::text("first"), Content::image(red_square())],
                at(0),
            )
            .unwrap(),
        );
        conversation
            .push(
                Message::with_timestamp(Role::Assistant, vec![Content::text("ok")], at(1))
                    .unwrap(),
            )
            .unwrap();
        conversation
            .push(
                Message::with_timestamp(Role::User, vec![Content::image(red_square())], at(2))
                    .unwrap(),
            )
            .unwrap();

        assert_eq!(conversation.images().count(), 2);
    }

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn content_serialization_is_tagged() {
        let json = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));

        let json = serde_json::to_value(Content::image(red_square())).unwrap();
        assert_eq!(json["type"], "image");
        assert!(json["image"].is_string());
    }

    #[test]
    fn conversation_serialization_roundtrip() {
        let mut conversation = Conversation::with_message(
            Message::with_timestamp(
                Role::User,
                vec![Content::text("Hello!"), Content::image(red_square())],
                at(0),
            )
            .unwrap(),
        );
        conversation
            .push(
                Message::with_timestamp(Role::Assistant, vec![Content::text("Hi there")], at(3))
                    .unwrap(),
            )
            .unwrap();

        let json = serde_json::to_string(&conversation).unwrap();
        let parsed: Conversation = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.messages()[0].role(), Role::User);
        assert_eq!(parsed.messages()[0].texts().collect::<Vec<_>>(), ["Hello!"]);
        assert_eq!(parsed.messages()[0].created_at(), at(0));
        assert_eq!(parsed.messages()[1].role(), Role::Assistant);
        assert_eq!(parsed.messages()[1].texts().collect::<Vec<_>>(), ["Hi there"]);

        // Re-saving keeps the stored image payload untouched.
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn deserialization_rejects_empty_content() {
        let json = r#"{"messages":[{"role":"user","content":[],"created_at":"2024-11-20T10:00:00Z"}]}"#;
        assert!(serde_json::from_str::<Conversation>(json).is_err());
    }

    #[test]
    fn deserialization_rejects_unknown_role() {
        let json = r#"{"messages":[{"role":"system","content":[{"type":"text","text":"x"}],"created_at":"2024-11-20T10:00:00Z"}]}"#;
        assert!(serde_json::from_str::<Conversation>(json).is_err());
    }
}
