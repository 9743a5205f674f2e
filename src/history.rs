use std::path::{Path, PathBuf};

use crate::markdown;

/// Colour of the label on messages typed by the user.
pub const USER_LABEL_COLOR: &str = "#25733f";

/// [`USER_LABEL_COLOR`] as RGB channels, for surfaces that do not take CSS.
pub fn user_label_rgb() -> [u8; 3] {
    let hex = USER_LABEL_COLOR.trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .unwrap_or(0)
    };
    [channel(0), channel(2), channel(4)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    System,
}

/// One entry of the conversation. Rendered once on creation and never
/// changed afterwards.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    sender: Sender,
    content: String,
    rendered_html: String,
    attached_image: Option<PathBuf>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        let styled = format!(r#"<span style="color:{}">{}</span>"#, USER_LABEL_COLOR, content);
        ChatMessage {
            sender: Sender::User,
            rendered_html: markdown::render(&styled),
            content,
            attached_image: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        let content = content.into();
        ChatMessage {
            sender: Sender::System,
            rendered_html: markdown::render(&content),
            content,
            attached_image: None,
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.attached_image = Some(path.into());
        self
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn rendered_html(&self) -> &str {
        &self.rendered_html
    }

    pub fn attached_image(&self) -> Option<&Path> {
        self.attached_image.as_deref()
    }
}

/// Append-only, display-ordered list of messages for the running session.
#[derive(Debug, Default)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        tracing::trace!(sender = ?message.sender, len = message.content.len(), "message appended");
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_from(&self, sender: Sender) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.sender == sender)
    }
}
