//! Conversation transcripts on disk.
//!
//! A transcript is the JSON form of a [`Conversation`]. Writes are atomic
//! (temp file + rename). Loading reads image payloads as plain strings and
//! decodes them afterwards, so a bad payload surfaces as [`DecodeError`] and
//! a broken message invariant as [`ConversationError`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::conversation::{Content, Conversation, ConversationError, Message, Role};
use crate::image_codec::{self, DecodeError};

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid transcript: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid image payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid conversation: {0}")]
    Conversation(#[from] ConversationError),
}

impl TranscriptError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn to_json(conversation: &Conversation) -> Result<String, TranscriptError> {
    Ok(serde_json::to_string_pretty(conversation)?)
}

pub fn from_json(json: &str) -> Result<Conversation, TranscriptError> {
    let document: Document = serde_json::from_str(json)?;
    let mut conversation = Conversation::new();
    for raw in document.messages {
        let content = raw
            .content
            .into_iter()
            .map(|item| match item {
                RawContent::Text { text } => Ok(Content::text(text)),
                RawContent::Image { image } => image_codec::decode(&image).map(Content::image),
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        conversation.push(Message::with_timestamp(raw.role, content, raw.created_at)?)?;
    }
    Ok(conversation)
}

/// Write `conversation` to `path`, replacing any existing file.
pub async fn save(
    path: impl AsRef<Path>,
    conversation: &Conversation,
) -> Result<(), TranscriptError> {
    let json = to_json(conversation)?;
    atomic_write_file(path.as_ref(), json.as_bytes()).await
}

pub async fn load(path: impl AsRef<Path>) -> Result<Conversation, TranscriptError> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)
        .await
        .map_err(|e| TranscriptError::io(path, e))?;
    from_json(&json)
}

// ============================================================================
// Document shape
// ============================================================================

#[derive(Deserialize)]
struct Document {
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    content: Vec<RawContent>,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawContent {
    Text { text: String },
    Image { image: String },
}

/// Write data to a temp file, fsync it, then atomically rename to the final path.
async fn atomic_write_file(final_path: &Path, data: &[u8]) -> Result<(), TranscriptError> {
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("transcript");
    let temp_path = final_path.with_file_name(format!("{}.{}.tmp", file_name, ulid::Ulid::new()));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| TranscriptError::io(&temp_path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| TranscriptError::io(&temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| TranscriptError::io(&temp_path, e))?;
    fs::rename(&temp_path, final_path)
        .await
        .map_err(|e| TranscriptError::io(final_path, e))?;
    Ok(())
}
