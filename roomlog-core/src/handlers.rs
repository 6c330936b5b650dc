// ABOUTME: Built-in pipeline handlers for room history queries
// ABOUTME: RoomHistoryHandler produces the report into the context, HistoryReplyHandler sends it

use crate::commands::{contains_trigger, parse_query_params};
use crate::config::RoomHistoryConfig;
use crate::engine::MessageFilterEngine;
use crate::pipeline::{ExecutionContext, Handler, HandlerResponse};
use crate::report::format_report;
use crate::traits::{IncomingMessage, MessageSender};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// `{formatted_text, message_count, room, limit, hours}` written by the query handler
pub const QUERY_RESULT_KEY: &str = "room_message_query_result";

/// Failure description written by the query handler
pub const QUERY_ERROR_KEY: &str = "room_message_query_error";

/// The formatted report as a plain string
pub const CHAT_HISTORY_KEY: &str = "chat_history";

pub const ROOM_HISTORY_HANDLER: &str = "room-message-query";
pub const HISTORY_REPLY_HANDLER: &str = "room-message-reply";

// =============================================================================
// Query Handler
// =============================================================================

/// Answers trigger messages in group rooms with a transcript of recent history
pub struct RoomHistoryHandler {
    engine: MessageFilterEngine,
    config: RoomHistoryConfig,
    unbounded_limit: usize,
}

impl RoomHistoryHandler {
    pub fn new(engine: MessageFilterEngine, config: RoomHistoryConfig, unbounded_limit: usize) -> Self {
        Self {
            engine,
            config,
            unbounded_limit,
        }
    }
}

#[async_trait]
impl Handler for RoomHistoryHandler {
    fn name(&self) -> &str {
        ROOM_HISTORY_HANDLER
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    async fn handle(&self, message: &IncomingMessage, ctx: &mut ExecutionContext) -> Result<()> {
        if message.is_direct || !contains_trigger(&message.body, &self.config.trigger_keyword) {
            return Ok(());
        }

        let room = message.channel_id.as_str();
        let params = parse_query_params(&message.body, &self.config);
        let spec = params.to_filter_spec(self.unbounded_limit);

        tracing::info!(
            room = %room,
            sender = %message.sender.label(),
            limit = ?params.limit,
            hours = ?params.hours,
            "Room history requested"
        );

        match self.engine.try_query(room, &spec).await {
            Ok(messages) => {
                let report = format_report(&messages, room, &params.describe());
                ctx.set(
                    QUERY_RESULT_KEY,
                    json!({
                        "formatted_text": report,
                        "message_count": messages.len(),
                        "room": room,
                        "limit": params.limit,
                        "hours": params.hours,
                    }),
                );
                ctx.set(CHAT_HISTORY_KEY, report);
                ctx.add_response(
                    HandlerResponse::handled(ROOM_HISTORY_HANDLER)
                        .with_payload(json!({ "message_count": messages.len() })),
                );
                tracing::info!(room = %room, count = messages.len(), "Room history ready");
            }
            Err(e) => {
                tracing::error!(room = %room, error = %e, "Room history query failed");
                ctx.set(QUERY_ERROR_KEY, e.to_string());
                ctx.add_error(ROOM_HISTORY_HANDLER, e.to_string());
            }
        }

        Ok(())
    }
}

// =============================================================================
// Reply Handler
// =============================================================================

/// Delivers the query handler's report (or its failure) back to the room
pub struct HistoryReplyHandler {
    sender: Arc<dyn MessageSender>,
    priority: i32,
}

impl HistoryReplyHandler {
    pub fn new(sender: Arc<dyn MessageSender>, priority: i32) -> Self {
        Self { sender, priority }
    }
}

#[async_trait]
impl Handler for HistoryReplyHandler {
    fn name(&self) -> &str {
        HISTORY_REPLY_HANDLER
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn handle(&self, message: &IncomingMessage, ctx: &mut ExecutionContext) -> Result<()> {
        let room = message.channel_id.as_str();

        if let Some(reason) = ctx.get_str(QUERY_ERROR_KEY) {
            let text = format!("Failed to query chat history: {}", reason);
            self.sender
                .send_text(room, &text)
                .await
                .context("Failed to send query failure notice")?;
            ctx.add_response(HandlerResponse::stop(HISTORY_REPLY_HANDLER));
            return Ok(());
        }

        let Some(result) = ctx.get(QUERY_RESULT_KEY) else {
            return Ok(());
        };
        let report = result
            .get("formatted_text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if report.is_empty() {
            tracing::warn!(room = %room, "Query result has no report text, skipping reply");
            return Ok(());
        }

        self.sender
            .send_text(room, &report)
            .await
            .context("Failed to send room history")?;
        tracing::info!(room = %room, chars = report.chars().count(), "Room history sent");

        ctx.add_response(HandlerResponse::stop(HISTORY_REPLY_HANDLER));
        Ok(())
    }
}
