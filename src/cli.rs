// ABOUTME: Command-line interface: rooms, query, count and trigger subcommands
// ABOUTME: Wires the SQLite store, filter engine, counter and handler pipeline from config

use crate::console::ConsoleSender;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use roomlog_core::config::Config;
use roomlog_core::count::{CountFilter, MessageCounter};
use roomlog_core::engine::{FilterSpec, MessageFilterEngine};
use roomlog_core::handlers::{HistoryReplyHandler, RoomHistoryHandler};
use roomlog_core::message::{Message, MessageType};
use roomlog_core::pipeline::HandlerPipeline;
use roomlog_core::report::format_line;
use roomlog_core::sqlite::SqliteStore;
use roomlog_core::traits::{ChatUser, IncomingMessage, MessageSender, MessageStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "roomlog", version, about = "Query and count chat room history")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// SQLite message store (overrides config and ROOMLOG_DB_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List rooms in the store
    Rooms,
    /// Fetch a room's messages, newest first
    Query(QueryArgs),
    /// Count a room's messages
    Count(CountArgs),
    /// Run a chat message through the handler pipeline
    Trigger(TriggerArgs),
}

/// Filters shared by `query` and `count`
#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Room id or display name
    pub room: String,

    /// Message type name or code; repeat for several
    #[arg(long = "type", value_name = "TYPE", value_parser = parse_message_type)]
    pub types: Vec<MessageType>,

    /// Only messages from the last N hours
    #[arg(long)]
    pub hours: Option<u32>,

    /// Sender username
    #[arg(long)]
    pub sender: Option<String>,
}

impl FilterArgs {
    fn time_window(&self) -> Option<Duration> {
        self.hours.map(|h| Duration::from_secs(u64::from(h) * 3600))
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Keep messages containing any of these; repeat for several
    #[arg(long = "keyword", value_name = "TEXT")]
    pub keywords: Vec<String>,

    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Print messages as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl QueryArgs {
    pub fn to_filter_spec(&self) -> FilterSpec {
        let mut spec = FilterSpec::default()
            .page(self.limit, self.offset)
            .with_types(self.filter.types.iter().copied())
            .with_keywords(self.keywords.iter().cloned());
        if let Some(window) = self.filter.time_window() {
            spec = spec.within(window);
        }
        if let Some(sender) = &self.filter.sender {
            spec = spec.from_sender(sender.clone());
        }
        spec
    }
}

#[derive(Args, Debug, Clone)]
pub struct CountArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
}

impl CountArgs {
    pub fn to_count_filter(&self) -> CountFilter {
        CountFilter {
            message_types: self.filter.types.clone(),
            time_window: self.filter.time_window(),
            sender: self.filter.sender.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Room the message is posted in
    pub room: String,

    /// Message body, e.g. "查询聊天记录 100"
    pub body: String,

    /// Sender id of the message
    #[arg(long, default_value = "cli")]
    pub sender: String,

    /// Sender display name
    #[arg(long)]
    pub sender_name: Option<String>,

    /// Treat the message as a direct (1:1) conversation
    #[arg(long)]
    pub direct: bool,
}

fn parse_message_type(input: &str) -> Result<MessageType, String> {
    MessageType::parse(input).ok_or_else(|| format!("unknown message type: {}", input))
}

/// Serialized shape of a message for `query --json`
#[derive(Debug, Serialize)]
struct MessageView<'a> {
    local_id: i64,
    server_id: i64,
    time: String,
    #[serde(rename = "type")]
    message_type: &'static str,
    sender: &'a str,
    is_sender: bool,
    text: String,
}

impl<'a> From<&'a Message> for MessageView<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            local_id: message.local_id,
            server_id: message.server_id,
            time: message.str_time(),
            message_type: message.message_type.name(),
            sender: message.sender_name(),
            is_sender: message.is_sender,
            text: message.render_text(),
        }
    }
}

/// Pipeline with the built-in handlers enabled in `config`
pub fn build_pipeline(
    config: &Config,
    store: Arc<dyn MessageStore>,
    sender: Arc<dyn MessageSender>,
) -> HandlerPipeline {
    let mut pipeline = HandlerPipeline::new(config.pipeline.handler_timeout());

    if config.room_history.enabled {
        let engine = MessageFilterEngine::new(store, config.query.engine_options());
        pipeline.register(Arc::new(RoomHistoryHandler::new(
            engine,
            config.room_history.clone(),
            config.query.unbounded_limit,
        )));
    }
    if config.reply.enabled {
        pipeline.register(Arc::new(HistoryReplyHandler::new(sender, config.reply.priority)));
    }

    pipeline
}

/// Execute a parsed command against the configured store
pub async fn run(command: Command, config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("Failed to open message store {}", config.store.path))?;
    let store: Arc<dyn MessageStore> = Arc::new(store);

    match command {
        Command::Rooms => {
            for room in store.rooms().await? {
                let name = store
                    .contact_by_username(&room.username)
                    .await?
                    .map(|c| c.display_name().to_string())
                    .unwrap_or_default();
                let owner = room.owner.as_deref().unwrap_or("-");
                println!("{}\t{}\t{}", room.username, name, owner);
            }
        }
        Command::Query(args) => {
            let engine = MessageFilterEngine::new(store, config.query.engine_options());
            let messages = engine
                .try_query(&args.filter.room, &args.to_filter_spec())
                .await
                .with_context(|| format!("Query failed for room {}", args.filter.room))?;

            tracing::info!(room = %args.filter.room, count = messages.len(), "Query complete");
            for message in &messages {
                if args.json {
                    println!("{}", serde_json::to_string(&MessageView::from(message))?);
                } else {
                    println!("{}", format_line(message));
                }
            }
        }
        Command::Count(args) => {
            let counter = MessageCounter::new(store, config.query.fetch_timeout());
            let count = counter
                .try_count(&args.filter.room, &args.to_count_filter())
                .await
                .with_context(|| format!("Count failed for room {}", args.filter.room))?;
            println!("{}", count);
        }
        Command::Trigger(args) => {
            let pipeline = build_pipeline(config, store, Arc::new(ConsoleSender::new()));
            let sender = match &args.sender_name {
                Some(name) => ChatUser::with_name(&args.sender, name),
                None => ChatUser::new(&args.sender),
            };
            let mut message = IncomingMessage::group(&args.room, sender, &args.body);
            message.is_direct = args.direct;

            let (ctx, summary) = pipeline.dispatch(&message).await;
            tracing::info!(
                executed = ?summary.executed,
                stopped_by = ?summary.stopped_by,
                handled = ctx.is_handled(),
                "Pipeline run complete"
            );
            for error in ctx.errors() {
                eprintln!("{}: {}", error.handler, error.error);
            }
        }
    }

    Ok(())
}
