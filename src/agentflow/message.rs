//! Conversation message model.
//!
//! Messages are the unit of conversation shared between agents, providers,
//! and the [`State`](crate::state::State) container. A [`Message`] carries a
//! [`Role`] and an ordered sequence of [`ContentPart`]s, so a single message
//! can mix text with binary media (images, audio, video, files) referenced
//! through a [`SourceInfo`].
//!
//! # Example
//!
//! ```rust
//! use agentflow::message::{ContentPart, Message, Role};
//!
//! let msg = Message::text(Role::User, "What is in this picture?");
//! assert_eq!(msg.role, Role::User);
//! assert_eq!(msg.text_content(), "What is in this picture?");
//!
//! let with_image = msg.with_part(ContentPart::image_url("image/png", "https://example.com/cat.png"));
//! assert_eq!(with_image.content.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

/// Conversation role of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System directives (prompts, protocol instructions).
    System,
    /// End-user input, including tool-result feedback fed to the model.
    User,
    /// Model output.
    Assistant,
    /// Output attributed to a tool invocation.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

/// How a binary media part is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// `data` holds base64-encoded bytes.
    Base64,
    /// `data` holds a URL.
    Url,
    /// `data` holds a local file path.
    File,
}

/// Source descriptor for image/audio/video content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// How `data` should be interpreted.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// MIME type of the referenced media (e.g. `"image/png"`).
    pub media_type: String,
    /// The base64 payload, URL, or file path, depending on `source_type`.
    pub data: String,
}

impl SourceInfo {
    /// Build a URL-backed source.
    pub fn url(media_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Url,
            media_type: media_type.into(),
            data: url.into(),
        }
    }

    /// Build a base64-backed source.
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Base64,
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// One part of a message body.
///
/// Text is the common case; the media variants carry a [`SourceInfo`] and the
/// `File` variant references an artifact or path by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { source: SourceInfo },
    Audio { source: SourceInfo },
    Video { source: SourceInfo },
    File { name: String, media_type: String },
}

impl ContentPart {
    /// Build a text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Build an image part referencing a URL.
    pub fn image_url(media_type: impl Into<String>, url: impl Into<String>) -> Self {
        ContentPart::Image {
            source: SourceInfo::url(media_type, url),
        }
    }

    /// The text of this part, or `""` for media parts.
    pub fn as_text(&self) -> &str {
        match self {
            ContentPart::Text { text } => text,
            _ => "",
        }
    }
}

/// A conversation message: a [`Role`] plus an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Build a message with a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Build a message from pre-assembled parts.
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// Append a part (builder pattern).
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.content.push(part);
        self
    }

    /// Concatenate the text of all text parts, in order.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Token accounting reported by a provider for one round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Accumulate another round-trip's usage into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_round_trip() {
        let msg = Message::text(Role::Assistant, "hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
        assert_eq!(back.text_content(), "hello");
    }

    #[test]
    fn mixed_content_text_extraction() {
        let msg = Message::new(
            Role::User,
            vec![
                ContentPart::text("see "),
                ContentPart::image_url("image/jpeg", "https://example.com/a.jpg"),
                ContentPart::text("this"),
            ],
        );
        assert_eq!(msg.text_content(), "see this");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        total.add(&TokenUsage {
            input_tokens: 3,
            output_tokens: 2,
            total_tokens: 5,
        });
        assert_eq!(total.total_tokens, 20);
    }
}
