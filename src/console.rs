// ABOUTME: MessageSender that writes outbound room messages to stdout
// ABOUTME: Stands in for a chat transport when driving the pipeline from the CLI

use anyhow::{Context, Result};
use async_trait::async_trait;
use roomlog_core::traits::MessageSender;
use std::io::Write;

/// Prints each outbound message under a `>>> room` banner
#[derive(Debug, Clone, Default)]
pub struct ConsoleSender;

impl ConsoleSender {
    pub fn new() -> Self {
        Self
    }

    fn render(channel_id: &str, text: &str) -> String {
        format!(">>> {}\n{}\n", channel_id, text)
    }
}

#[async_trait]
impl MessageSender for ConsoleSender {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(Self::render(channel_id, text).as_bytes())
            .context("Failed to write message to stdout")?;
        stdout.flush().context("Failed to flush stdout")?;
        tracing::debug!(room = %channel_id, chars = text.chars().count(), "Message written to console");
        Ok(())
    }
}
