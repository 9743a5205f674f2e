use std::path::Path;

use anyhow::Context;

use crate::history::ConversationLog;

pub const FILE_NAME: &str = "conversation.md";
pub const CONTENT_TYPE: &str = "text/html";

/// Rendered HTML of every message in display order, one per line.
pub fn export(log: &ConversationLog) -> Vec<u8> {
    log.iter()
        .map(|message| message.rendered_html())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

pub async fn write(path: &Path, document: &[u8]) -> anyhow::Result<()> {
    tokio::fs::write(path, document)
        .await
        .with_context(|| format!("Failed to write transcript to {}", path.display()))
}
