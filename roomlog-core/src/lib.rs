// ABOUTME: Room message history retrieval and an ordered handler pipeline
// ABOUTME: Store contract, filter engine, count queries, trigger parsing and built-in handlers

pub mod commands;
pub mod config;
pub mod count;
pub mod engine;
pub mod handlers;
pub mod message;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod sqlite;
pub mod traits;

pub use engine::{EngineOptions, FilterSpec, MessageFilterEngine};
pub use handlers::{HistoryReplyHandler, RoomHistoryHandler};
pub use message::{Message, MessageBody, MessageFactory, MessageType};
pub use pipeline::{ExecutionContext, Handler, HandlerPipeline, HandlerResponse, RunSummary};
pub use resolver::RoomResolver;
pub use sqlite::SqliteStore;

// Re-export core traits for convenient access
pub use traits::{
    ChatUser, ContactRecord, IncomingMessage, MessageSender, MessageStore, RawMessageRow,
    RoomRecord, SortOrder,
};
