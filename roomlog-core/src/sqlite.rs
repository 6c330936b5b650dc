// ABOUTME: SQLite-backed implementation of the message store read contract
// ABOUTME: Rooms, contacts and a partitioned message index; seeding helpers for tools and tests
use crate::count::partition_key;
use crate::traits::{ContactRecord, MessageStore, RawMessageRow, RoomRecord, SortOrder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A message to insert through [`SqliteStore::insert_message`]
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub server_id: i64,
    pub is_sender: bool,
    pub type_code: i64,
    /// Seconds since Unix epoch
    pub create_time: i64,
    pub sub_type: i64,
    pub real_sender_id: Option<i64>,
    pub content: Option<String>,
    pub bytes_extra: Option<Vec<u8>>,
    pub db_path: Option<String>,
}

impl NewMessage {
    pub fn text(create_time: i64, sender_id: Option<i64>, content: impl Into<String>) -> Self {
        Self {
            type_code: 1,
            create_time,
            real_sender_id: sender_id,
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn of_type(type_code: i64, create_time: i64, sender_id: Option<i64>) -> Self {
        Self {
            type_code,
            create_time,
            real_sender_id: sender_id,
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

fn contact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        nickname: row.get(2)?,
        remark: row.get(3)?,
    })
}

fn room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRecord> {
    Ok(RoomRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        owner: row.get(2)?,
    })
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        let store = Self::init(conn)?;
        tracing::info!(db = %path.display(), "SqliteStore initialized");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS Contact (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                nickname TEXT,
                remark TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ChatRoom (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                owner TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS MessageIndex (
                LocalId INTEGER PRIMARY KEY AUTOINCREMENT,
                MsgSvrID INTEGER NOT NULL DEFAULT 0,
                IsSender INTEGER NOT NULL DEFAULT 0,
                SortSeq INTEGER NOT NULL,
                Type INTEGER NOT NULL,
                CreateTime INTEGER NOT NULL,
                SubType INTEGER NOT NULL DEFAULT 0,
                RealSenderId INTEGER,
                StrContent TEXT,
                BytesExtra BLOB,
                TableName TEXT NOT NULL,
                DbPath TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_message_partition_time
             ON MessageIndex (TableName, CreateTime)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the shared database connection
    pub fn db_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    /// Run a read on the blocking pool so store calls can be bounded by timeouts
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
            f(&conn)
        })
        .await
        .context("Store task failed")?
    }

    pub fn insert_contact(
        &self,
        username: &str,
        nickname: Option<&str>,
        remark: Option<&str>,
    ) -> Result<i64> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO Contact (username, nickname, remark) VALUES (?1, ?2, ?3)",
            params![username, nickname, remark],
        )
        .with_context(|| format!("Failed to insert contact {}", username))?;
        Ok(db.last_insert_rowid())
    }

    /// Insert a room; a display name also creates the room's contact entry
    pub fn insert_room(&self, username: &str, display_name: Option<&str>) -> Result<i64> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO ChatRoom (username, owner) VALUES (?1, NULL)",
            params![username],
        )
        .with_context(|| format!("Failed to insert room {}", username))?;
        let id = db.last_insert_rowid();
        if let Some(name) = display_name {
            db.execute(
                "INSERT INTO Contact (username, nickname, remark) VALUES (?1, ?2, NULL)",
                params![username, name],
            )
            .with_context(|| format!("Failed to insert contact for room {}", username))?;
        }
        tracing::debug!(room = %username, id, "Room inserted");
        Ok(id)
    }

    pub fn set_room_owner(&self, room_username: &str, owner: &str) -> Result<()> {
        let db = self.lock()?;
        let updated = db
            .execute(
                "UPDATE ChatRoom SET owner = ?1 WHERE username = ?2",
                params![owner, room_username],
            )
            .with_context(|| format!("Failed to set owner of room {}", room_username))?;
        if updated == 0 {
            anyhow::bail!("Room not found: {}", room_username);
        }
        Ok(())
    }

    pub fn insert_message(&self, room_username: &str, msg: &NewMessage) -> Result<i64> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO MessageIndex
                (MsgSvrID, IsSender, SortSeq, Type, CreateTime, SubType, RealSenderId,
                 StrContent, BytesExtra, TableName, DbPath)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                msg.server_id,
                if msg.is_sender { 1 } else { 0 },
                msg.create_time * 1000,
                msg.type_code,
                msg.create_time,
                msg.sub_type,
                msg.real_sender_id,
                msg.content,
                msg.bytes_extra,
                partition_key(room_username),
                msg.db_path,
            ],
        )
        .with_context(|| format!("Failed to insert message into {}", room_username))?;
        Ok(db.last_insert_rowid())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn room_by_username(&self, username: &str) -> Result<Option<RoomRecord>> {
        let username = username.to_string();
        self.read(move |db| {
            db.query_row(
                "SELECT id, username, owner FROM ChatRoom WHERE username = ?1",
                params![username],
                room_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn rooms(&self) -> Result<Vec<RoomRecord>> {
        self.read(|db| {
            let mut stmt = db.prepare("SELECT id, username, owner FROM ChatRoom ORDER BY id")?;
            let rooms = stmt
                .query_map([], room_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rooms)
        })
        .await
    }

    async fn contact_by_username(&self, username: &str) -> Result<Option<ContactRecord>> {
        let username = username.to_string();
        self.read(move |db| {
            db.query_row(
                "SELECT id, username, nickname, remark FROM Contact WHERE username = ?1",
                params![username],
                contact_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn contact_by_id(&self, id: i64) -> Result<Option<ContactRecord>> {
        self.read(move |db| {
            db.query_row(
                "SELECT id, username, nickname, remark FROM Contact WHERE id = ?1",
                params![id],
                contact_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn fetch_messages(
        &self,
        room_username: &str,
        count: usize,
        order: SortOrder,
    ) -> Result<Vec<RawMessageRow>> {
        let partition = partition_key(room_username);
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        self.read(move |db| {
            let sql = format!(
                "SELECT {} FROM MessageIndex WHERE TableName = ?1
                 ORDER BY CreateTime {order}, LocalId {order} LIMIT ?2",
                RawMessageRow::COLUMNS,
                order = order.as_sql()
            );
            let mut stmt = db.prepare(&sql)?;
            let rows = stmt
                .query_map(params![partition, limit], RawMessageRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Vec<Value>>> {
        let sql = sql.to_string();
        self.read(move |db| {
            let mut stmt = db.prepare(&sql)?;
            let columns = stmt.column_count();
            let rows = stmt
                .query_map(params_from_iter(params), |row| {
                    (0..columns)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_schema_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("messages.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_orders_and_limits() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_room("r@chatroom", Some("Team")).unwrap();
        for t in [100, 300, 200] {
            store
                .insert_message("r@chatroom", &NewMessage::text(t, None, format!("m{}", t)))
                .unwrap();
        }

        let desc = store
            .fetch_messages("r@chatroom", 2, SortOrder::Desc)
            .await
            .unwrap();
        let times: Vec<i64> = desc.iter().map(|r| r.create_time).collect();
        assert_eq!(times, vec![300, 200]);
        assert_eq!(desc[0].timestamp_ms, 300_000);
        assert_eq!(desc[0].content.as_deref(), Some("m300"));

        let asc = store
            .fetch_messages("r@chatroom", 10, SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(asc.first().map(|r| r.create_time), Some(100));
    }

    #[tokio::test]
    async fn test_fetch_is_partitioned_by_room() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_room("a@chatroom", None).unwrap();
        store.insert_room("b@chatroom", None).unwrap();
        store
            .insert_message("a@chatroom", &NewMessage::text(1, None, "in a"))
            .unwrap();

        let b = store
            .fetch_messages("b@chatroom", 10, SortOrder::Desc)
            .await
            .unwrap();
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn test_room_owner_is_stored() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_room("r@chatroom", None).unwrap();
        assert_eq!(store.rooms().await.unwrap()[0].owner, None);

        store.set_room_owner("r@chatroom", "wxid_alice").unwrap();
        let room = store.room_by_username("r@chatroom").await.unwrap().unwrap();
        assert_eq!(room.owner.as_deref(), Some("wxid_alice"));

        assert!(store.set_room_owner("ghost@chatroom", "wxid_alice").is_err());
    }

    #[tokio::test]
    async fn test_contact_lookups() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert_contact("wxid_alice", Some("Alice"), None)
            .unwrap();

        let by_name = store.contact_by_username("wxid_alice").await.unwrap();
        assert_eq!(by_name.as_ref().map(|c| c.id), Some(id));
        let by_id = store.contact_by_id(id).await.unwrap();
        assert_eq!(by_id.map(|c| c.display_name().to_string()), Some("Alice".to_string()));
        assert!(store.contact_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_returns_raw_values() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_room("r@chatroom", None).unwrap();
        store
            .insert_message("r@chatroom", &NewMessage::text(5, None, "x"))
            .unwrap();

        let rows = store
            .execute(
                "SELECT COUNT(*), MAX(CreateTime) FROM MessageIndex WHERE TableName = ?",
                vec![Value::Text(partition_key("r@chatroom"))],
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(5)]]);
    }

    #[tokio::test]
    async fn test_execute_surfaces_sql_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.execute("SELECT * FROM Nope", vec![]).await.is_err());
    }
}
