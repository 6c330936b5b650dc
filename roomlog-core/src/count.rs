// ABOUTME: Aggregate message counts via a parameterized SQL query over the message index
// ABOUTME: Independent of the row-fetch path; shares only the filter vocabulary

use crate::message::MessageType;
use crate::resolver::RoomResolver;
use crate::traits::{MessageStore, RoomRecord};
use anyhow::{anyhow, Result};
use md5::{Digest, Md5};
use rusqlite::types::Value;
use std::sync::Arc;
use std::time::Duration;

/// Per-room partition name: `Msg_` + hex MD5 of the room's opaque identifier
pub fn partition_key(room_username: &str) -> String {
    format!("Msg_{}", hex::encode(Md5::digest(room_username.as_bytes())))
}

/// Filter vocabulary for counting (no pagination)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountFilter {
    pub message_types: Vec<MessageType>,
    pub time_window: Option<Duration>,
    pub sender: Option<String>,
}

/// A built query and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Builds `SELECT COUNT(*)` over `MessageIndex` with conjunctive conditions
#[derive(Debug, Clone)]
pub struct CountQueryBuilder {
    partition: String,
    message_types: Vec<MessageType>,
    start_time: Option<i64>,
    sender_id: Option<i64>,
}

impl CountQueryBuilder {
    pub fn for_room(room: &RoomRecord) -> Self {
        Self {
            partition: partition_key(&room.username),
            message_types: Vec::new(),
            start_time: None,
            sender_id: None,
        }
    }

    pub fn types(mut self, types: &[MessageType]) -> Self {
        self.message_types = types.to_vec();
        self
    }

    pub fn since(mut self, start_time: Option<i64>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn sender_id(mut self, sender_id: Option<i64>) -> Self {
        self.sender_id = sender_id;
        self
    }

    pub fn build(self) -> CountQuery {
        let mut conditions = vec!["TableName = ?".to_string()];
        let mut params = vec![Value::Text(self.partition)];

        if !self.message_types.is_empty() {
            let terms: Vec<&str> = self.message_types.iter().map(|_| "Type = ?").collect();
            conditions.push(format!("({})", terms.join(" OR ")));
            params.extend(self.message_types.iter().map(|t| Value::Integer(t.code())));
        }

        if let Some(start) = self.start_time {
            conditions.push("CreateTime >= ?".to_string());
            params.push(Value::Integer(start));
        }

        if let Some(id) = self.sender_id {
            conditions.push("RealSenderId = ?".to_string());
            params.push(Value::Integer(id));
        }

        CountQuery {
            sql: format!(
                "SELECT COUNT(*) AS count FROM MessageIndex WHERE {}",
                conditions.join(" AND ")
            ),
            params,
        }
    }
}

/// Counts a room's messages through the store's SQL primitive
#[derive(Clone)]
pub struct MessageCounter {
    store: Arc<dyn MessageStore>,
    resolver: RoomResolver,
    fetch_timeout: Duration,
}

impl MessageCounter {
    pub fn new(store: Arc<dyn MessageStore>, fetch_timeout: Duration) -> Self {
        Self {
            resolver: RoomResolver::new(Arc::clone(&store)),
            store,
            fetch_timeout,
        }
    }

    /// Count, degrading any failure to 0 (logged)
    pub async fn count(&self, identifier: &str, filter: &CountFilter) -> i64 {
        match self.try_count(identifier, filter).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(room = %identifier, error = %e, "Message count failed");
                0
            }
        }
    }

    /// Count, surfacing failures. Unknown rooms and unknown senders count 0.
    pub async fn try_count(&self, identifier: &str, filter: &CountFilter) -> Result<i64> {
        let room = match self.bounded(self.resolver.resolve(identifier)).await? {
            Some(room) => room,
            None => {
                tracing::warn!(room = %identifier, "Room not found");
                return Ok(0);
            }
        };

        let sender_id = match &filter.sender {
            Some(username) => match self.bounded(self.store.contact_by_username(username)).await? {
                Some(contact) => Some(contact.id),
                None => {
                    tracing::info!(sender = %username, "Sender not found, count is 0");
                    return Ok(0);
                }
            },
            None => None,
        };

        let start_time = filter
            .time_window
            .map(|w| chrono::Utc::now().timestamp() - i64::try_from(w.as_secs()).unwrap_or(i64::MAX));

        let query = CountQueryBuilder::for_room(&room)
            .types(&filter.message_types)
            .since(start_time)
            .sender_id(sender_id)
            .build();

        tracing::debug!(room = %room.username, sql = %query.sql, "Counting messages");

        let rows = self
            .bounded(self.store.execute(&query.sql, query.params))
            .await?;

        match rows.first().and_then(|r| r.first()) {
            Some(Value::Integer(n)) => Ok(*n),
            Some(other) => Err(anyhow!("Unexpected count value: {:?}", other)),
            None => Ok(0),
        }
    }

    async fn bounded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.fetch_timeout, fut)
            .await
            .map_err(|_| anyhow!("Count query timed out after {:?}", self.fetch_timeout))?
    }
}
