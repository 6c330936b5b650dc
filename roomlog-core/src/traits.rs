// ABOUTME: Core traits and records shared by the query engine and handler pipeline
// ABOUTME: Store read contract, raw row wire format, inbound trigger and outbound sender

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Store Records
// =============================================================================

/// A group conversation as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Store-local numeric identity
    pub id: i64,
    /// Opaque identifier, unique within the store (e.g., "12345@chatroom")
    pub username: String,
    /// Username of the contact that owns the room, if known
    pub owner: Option<String>,
}

/// A contact (person or room) known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub remark: Option<String>,
}

impl ContactRecord {
    /// Remark wins over nickname, nickname wins over the raw username
    pub fn display_name(&self) -> &str {
        self.remark
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.nickname.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.username)
    }
}

// =============================================================================
// Raw Message Row
// =============================================================================

/// One stored message in the store's native positional layout.
///
/// Field positions are part of the storage contract. `COLUMNS` is the exact
/// projection every adapter must select, in this order:
///
/// | pos | column       | meaning                                 |
/// |-----|--------------|-----------------------------------------|
/// | 0   | LocalId      | local id                                |
/// | 1   | MsgSvrID     | server id                               |
/// | 2   | IsSender     | 1 when sent by the logged-in account    |
/// | 3   | SortSeq      | millisecond timestamp                   |
/// | 4   | Type         | type code                               |
/// | 5   | CreateTime   | second-resolution create time           |
/// | 6   | SubType      | type-specific sub code                  |
/// | 7   | RealSenderId | contact id of the sender, if recorded   |
/// | 8   | StrContent   | textual payload                         |
/// | 9   | BytesExtra   | binary payload                          |
/// | 10  | DbPath       | storage-location hint                   |
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessageRow {
    pub local_id: i64,
    pub server_id: i64,
    pub is_sender: bool,
    pub timestamp_ms: i64,
    pub type_code: i64,
    pub create_time: i64,
    pub sub_type: i64,
    pub real_sender_id: Option<i64>,
    pub content: Option<String>,
    pub bytes_extra: Option<Vec<u8>>,
    pub db_path: Option<String>,
}

impl RawMessageRow {
    pub const COLUMNS: &'static str = "LocalId, MsgSvrID, IsSender, SortSeq, Type, CreateTime, \
         SubType, RealSenderId, StrContent, BytesExtra, DbPath";

    /// Decode a row selected with [`RawMessageRow::COLUMNS`]
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            server_id: row.get(1)?,
            is_sender: row.get::<_, i64>(2)? != 0,
            timestamp_ms: row.get(3)?,
            type_code: row.get(4)?,
            create_time: row.get(5)?,
            sub_type: row.get(6)?,
            real_sender_id: row.get(7)?,
            content: row.get(8)?,
            bytes_extra: row.get(9)?,
            db_path: row.get(10)?,
        })
    }
}

/// Ordering of a message fetch by create time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

// =============================================================================
// Store Read Contract
// =============================================================================

/// Read-only view of the persisted message store.
///
/// Implementations are shared across concurrent pipeline runs and must be
/// safe for concurrent reads.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Exact lookup by opaque room identifier
    async fn room_by_username(&self, username: &str) -> Result<Option<RoomRecord>>;

    /// All rooms in store iteration order
    async fn rooms(&self) -> Result<Vec<RoomRecord>>;

    /// Contact lookup by opaque identity
    async fn contact_by_username(&self, username: &str) -> Result<Option<ContactRecord>>;

    /// Contact lookup by store-local id (the `RealSenderId` column)
    async fn contact_by_id(&self, id: i64) -> Result<Option<ContactRecord>>;

    /// Up to `count` rows of a room ordered by create time
    async fn fetch_messages(
        &self,
        room_username: &str,
        count: usize,
        order: SortOrder,
    ) -> Result<Vec<RawMessageRow>>;

    /// Parameterized query with positional parameters, returning raw rows
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Vec<Value>>>;
}

// =============================================================================
// Inbound / Outbound
// =============================================================================

/// Identity of a chat user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatUser {
    /// Unique identifier (e.g., wxid_abc123)
    pub id: String,
    /// Display name
    pub display_name: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(name.into()),
        }
    }

    /// Display name when known, otherwise the id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Inbound text message that may carry a trigger phrase
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// The room this message was sent in
    pub channel_id: String,
    /// The user who sent the message
    pub sender: ChatUser,
    /// Message body (text content)
    pub body: String,
    /// Whether this is a direct message (1:1 conversation)
    pub is_direct: bool,
    /// Transport-specific event ID
    pub event_id: String,
    /// Timestamp in seconds since Unix epoch
    pub timestamp: i64,
}

impl IncomingMessage {
    /// Group message with a generated event id and the current time
    pub fn group(channel_id: impl Into<String>, sender: ChatUser, body: impl Into<String>) -> Self {
        let timestamp = chrono::Utc::now().timestamp();
        Self {
            channel_id: channel_id.into(),
            sender,
            body: body.into(),
            is_direct: false,
            event_id: format!("local-{}", timestamp),
            timestamp,
        }
    }
}

/// Outbound delivery of text to a room. The transport itself is external.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()>;
}
