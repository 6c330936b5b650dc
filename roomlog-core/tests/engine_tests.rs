// ABOUTME: Integration tests for room resolution and the message filter engine
// ABOUTME: Uses an in-memory SQLite store plus mock stores for failures and stalls

use anyhow::Result;
use async_trait::async_trait;
use roomlog_core::engine::{EngineOptions, FilterSpec, MessageFilterEngine};
use roomlog_core::message::{MessageBody, MessageType};
use roomlog_core::resolver::RoomResolver;
use roomlog_core::sqlite::{NewMessage, SqliteStore};
use roomlog_core::traits::{ContactRecord, MessageStore, RawMessageRow, RoomRecord, SortOrder};
use rusqlite::types::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ROOM: &str = "team@chatroom";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn engine(store: SqliteStore) -> MessageFilterEngine {
    MessageFilterEngine::new(Arc::new(store), EngineOptions::default())
}

/// Room with Alice and Bob; `texts` inserted oldest first, one minute apart, ending a minute ago
fn seeded(texts: &[&str]) -> (SqliteStore, i64, i64) {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room(ROOM, Some("Team")).unwrap();
    let alice = store.insert_contact("wxid_alice", Some("Alice"), None).unwrap();
    let bob = store
        .insert_contact("wxid_bob", Some("bobby"), Some("Bob"))
        .unwrap();
    let base = now() - 60 * texts.len() as i64;
    for (i, text) in texts.iter().enumerate() {
        let sender = if i % 2 == 0 { alice } else { bob };
        store
            .insert_message(ROOM, &NewMessage::text(base + 60 * i as i64, Some(sender), *text))
            .unwrap();
    }
    (store, alice, bob)
}

fn texts(messages: &[roomlog_core::Message]) -> Vec<String> {
    messages.iter().map(|m| m.render_text()).collect()
}

// =============================================================================
// Room Resolution
// =============================================================================

#[tokio::test]
async fn test_resolve_by_username_and_display_name() {
    let (store, _, _) = seeded(&[]);
    let resolver = RoomResolver::new(Arc::new(store));

    let by_id = resolver.resolve(ROOM).await.unwrap().unwrap();
    assert_eq!(by_id.username, ROOM);

    let by_name = resolver.resolve("Team").await.unwrap().unwrap();
    assert_eq!(by_name.username, ROOM);

    assert!(resolver.resolve("Nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_display_name_collision_first_room_wins() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room("first@chatroom", Some("Family")).unwrap();
    store.insert_room("second@chatroom", Some("Family")).unwrap();
    let resolver = RoomResolver::new(Arc::new(store));

    let room = resolver.resolve("Family").await.unwrap().unwrap();
    assert_eq!(room.username, "first@chatroom");
}

#[tokio::test]
async fn test_exact_id_wins_over_colliding_display_name() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room("a@chatroom", None).unwrap();
    store.insert_room("b@chatroom", Some("a@chatroom")).unwrap();
    store.insert_room("c@chatroom", Some("a@chatroom")).unwrap();
    let resolver = RoomResolver::new(Arc::new(store));

    let room = resolver.resolve("a@chatroom").await.unwrap().unwrap();
    assert_eq!(room.username, "a@chatroom");
    let room = resolver.resolve("b@chatroom").await.unwrap().unwrap();
    assert_eq!(room.username, "b@chatroom");
}

// =============================================================================
// Filtering and Pagination
// =============================================================================

#[tokio::test]
async fn test_newest_first_with_limit() {
    let (store, _, _) = seeded(&["a", "b", "c", "d"]);
    let messages = engine(store).query(ROOM, &FilterSpec::new(3)).await;
    assert_eq!(texts(&messages), vec!["d", "c", "b"]);
}

#[tokio::test]
async fn test_query_by_display_name() {
    let (store, _, _) = seeded(&["hello"]);
    let messages = engine(store).query("Team", &FilterSpec::new(10)).await;
    assert_eq!(texts(&messages), vec!["hello"]);
    assert_eq!(messages[0].room, ROOM);
}

#[tokio::test]
async fn test_unknown_room_is_empty_not_error() {
    let (store, _, _) = seeded(&["hello"]);
    let result = engine(store).try_query("ghost", &FilterSpec::new(10)).await;
    assert!(result.unwrap().is_empty());
}

#[tokio::test]
async fn test_offset_pages_through_results() {
    let (store, _, _) = seeded(&["1", "2", "3", "4", "5"]);
    let engine = engine(store);

    let page = engine.query(ROOM, &FilterSpec::default().page(2, 0)).await;
    assert_eq!(texts(&page), vec!["5", "4"]);
    let page = engine.query(ROOM, &FilterSpec::default().page(2, 2)).await;
    assert_eq!(texts(&page), vec!["3", "2"]);
    let page = engine.query(ROOM, &FilterSpec::default().page(2, 4)).await;
    assert_eq!(texts(&page), vec!["1"]);
}

#[tokio::test]
async fn test_keywords_match_any() {
    let (store, _, _) = seeded(&["apple pie", "banana", "pear tart", "kiwi"]);
    let spec = FilterSpec::new(10).with_keywords(["apple", "pear"]);
    let messages = engine(store).query(ROOM, &spec).await;
    assert_eq!(texts(&messages), vec!["pear tart", "apple pie"]);
}

#[tokio::test]
async fn test_time_window_excludes_older_messages() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room(ROOM, None).unwrap();
    store
        .insert_message(ROOM, &NewMessage::text(now() - 3 * 3600, None, "old"))
        .unwrap();
    store
        .insert_message(ROOM, &NewMessage::text(now() - 600, None, "recent"))
        .unwrap();

    let spec = FilterSpec::new(10).within(Duration::from_secs(3600));
    let messages = engine(store).query(ROOM, &spec).await;
    assert_eq!(texts(&messages), vec!["recent"]);
}

#[tokio::test]
async fn test_sender_filter_and_sender_attached() {
    let (store, _, _) = seeded(&["a1", "b1", "a2", "b2"]);
    let engine = engine(store);

    let spec = FilterSpec::new(10).from_sender("wxid_bob");
    let messages = engine.query(ROOM, &spec).await;
    assert_eq!(texts(&messages), vec!["b2", "b1"]);
    assert_eq!(messages[0].sender_name(), "Bob");

    let spec = FilterSpec::new(10).from_sender("wxid_nobody");
    assert!(engine.query(ROOM, &spec).await.is_empty());
}

#[tokio::test]
async fn test_type_filter_and_typed_bodies() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room(ROOM, None).unwrap();
    let t = now() - 300;
    store.insert_message(ROOM, &NewMessage::text(t, None, "words")).unwrap();
    store
        .insert_message(ROOM, &NewMessage::of_type(3, t + 1, None))
        .unwrap();
    store
        .insert_message(
            ROOM,
            &NewMessage::of_type(49, t + 2, None)
                .with_content("<msg><appmsg><title>Release notes</title></appmsg></msg>"),
        )
        .unwrap();
    store
        .insert_message(ROOM, &NewMessage::of_type(9999, t + 3, None))
        .unwrap();
    let engine = engine(store);

    let all = engine.query(ROOM, &FilterSpec::new(10)).await;
    assert_eq!(
        texts(&all),
        vec![
            "[Unsupported message type 9999]",
            "[Link] Release notes",
            "[Image]",
            "words"
        ]
    );
    assert_eq!(all[0].message_type, MessageType::Unknown(9999));

    let spec = FilterSpec::new(10).with_types([MessageType::Image, MessageType::App]);
    let filtered = engine.query(ROOM, &spec).await;
    assert_eq!(filtered.len(), 2);
    assert!(matches!(filtered[1].body, MessageBody::Image { .. }));
}

#[tokio::test]
async fn test_text_row_without_content_does_not_fail_query() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room(ROOM, None).unwrap();
    let t = now() - 300;
    store.insert_message(ROOM, &NewMessage::text(t, None, "before")).unwrap();
    store.insert_message(ROOM, &NewMessage::of_type(1, t + 1, None)).unwrap();
    store.insert_message(ROOM, &NewMessage::text(t + 2, None, "after")).unwrap();

    let messages = engine(store).try_query(ROOM, &FilterSpec::new(10)).await.unwrap();
    assert_eq!(texts(&messages), vec!["after", "", "before"]);
}

#[tokio::test]
async fn test_invalid_limit_is_rejected() {
    let (store, _, _) = seeded(&["a"]);
    let engine = engine(store);
    assert!(engine.try_query(ROOM, &FilterSpec::new(0)).await.is_err());
    assert!(engine.query(ROOM, &FilterSpec::new(0)).await.is_empty());
}

// =============================================================================
// Batch Growth
// =============================================================================

/// Delegates to SQLite and records every fetch size
#[derive(Clone)]
struct RecordingStore {
    inner: SqliteStore,
    fetches: Arc<Mutex<Vec<usize>>>,
}

impl RecordingStore {
    fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fetches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn fetches(&self) -> Vec<usize> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn room_by_username(&self, username: &str) -> Result<Option<RoomRecord>> {
        self.inner.room_by_username(username).await
    }

    async fn rooms(&self) -> Result<Vec<RoomRecord>> {
        self.inner.rooms().await
    }

    async fn contact_by_username(&self, username: &str) -> Result<Option<ContactRecord>> {
        self.inner.contact_by_username(username).await
    }

    async fn contact_by_id(&self, id: i64) -> Result<Option<ContactRecord>> {
        self.inner.contact_by_id(id).await
    }

    async fn fetch_messages(
        &self,
        room_username: &str,
        count: usize,
        order: SortOrder,
    ) -> Result<Vec<RawMessageRow>> {
        self.fetches.lock().unwrap().push(count);
        self.inner.fetch_messages(room_username, count, order).await
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Vec<Value>>> {
        self.inner.execute(sql, params).await
    }
}

/// Two old texts buried under eight newer images
fn buried_texts() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room(ROOM, None).unwrap();
    let base = now() - 3600;
    store.insert_message(ROOM, &NewMessage::text(base, None, "t1")).unwrap();
    store.insert_message(ROOM, &NewMessage::text(base + 1, None, "t2")).unwrap();
    for i in 0..8 {
        store
            .insert_message(ROOM, &NewMessage::of_type(3, base + 10 + i, None))
            .unwrap();
    }
    store
}

#[tokio::test]
async fn test_batch_grows_until_page_is_filled() {
    let store = RecordingStore::new(buried_texts());
    let engine = MessageFilterEngine::new(Arc::new(store.clone()), EngineOptions::default());

    let spec = FilterSpec::new(2).with_types([MessageType::Text]);
    let messages = engine.query(ROOM, &spec).await;

    assert_eq!(texts(&messages), vec!["t2", "t1"]);
    assert_eq!(store.fetches(), vec![4, 8, 16]);
}

#[tokio::test]
async fn test_batch_growth_stops_at_cap() {
    let store = RecordingStore::new(buried_texts());
    let options = EngineOptions {
        max_fetch_rows: 6,
        ..EngineOptions::default()
    };
    let engine = MessageFilterEngine::new(Arc::new(store.clone()), options);

    let spec = FilterSpec::new(2).with_types([MessageType::Text]);
    let messages = engine.query(ROOM, &spec).await;

    assert!(messages.is_empty());
    assert_eq!(store.fetches(), vec![4, 6]);
}

/// Texts interleaved with runs of images so filtered pages force batch growth
fn interleaved() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_room(ROOM, None).unwrap();
    let mut t = now() - 3600;
    for i in 0..10 {
        store
            .insert_message(ROOM, &NewMessage::text(t, None, format!("t{}", i)))
            .unwrap();
        t += 1;
        for _ in 0..3 {
            store.insert_message(ROOM, &NewMessage::of_type(3, t, None)).unwrap();
            t += 1;
        }
    }
    store
}

#[tokio::test]
async fn test_filtered_pages_are_consistent_slices() {
    let store = RecordingStore::new(interleaved());
    let engine = MessageFilterEngine::new(Arc::new(store.clone()), EngineOptions::default());
    let spec = |limit, offset| FilterSpec::default().with_types([MessageType::Text]).page(limit, offset);

    let whole = engine.query(ROOM, &spec(7, 0)).await;
    assert_eq!(whole.len(), 7);
    assert!(store.fetches().len() > 1);

    for (limit, offset) in [(4, 3), (3, 4), (5, 2)] {
        let page = engine.query(ROOM, &spec(limit, offset)).await;
        let expected = &whole[offset..(offset + limit).min(whole.len())];
        assert_eq!(texts(&page), texts(expected), "limit {} offset {}", limit, offset);
    }

    let tail = engine.query(ROOM, &spec(5, 8)).await;
    assert_eq!(texts(&tail), vec!["t1", "t0"]);
}

#[tokio::test]
async fn test_single_fetch_when_first_batch_suffices() {
    let (inner, _, _) = seeded(&["a", "b", "c", "d", "e", "f"]);
    let store = RecordingStore::new(inner);
    let engine = MessageFilterEngine::new(Arc::new(store.clone()), EngineOptions::default());

    let messages = engine.query(ROOM, &FilterSpec::new(2)).await;
    assert_eq!(texts(&messages), vec!["f", "e"]);
    assert_eq!(store.fetches(), vec![4]);
}

// =============================================================================
// Failures and Timeouts
// =============================================================================

/// Knows one room; fetches either fail or stall
struct BrokenStore {
    stall: bool,
}

#[async_trait]
impl MessageStore for BrokenStore {
    async fn room_by_username(&self, username: &str) -> Result<Option<RoomRecord>> {
        Ok((username == ROOM).then(|| RoomRecord {
            id: 1,
            username: ROOM.to_string(),
            owner: None,
        }))
    }

    async fn rooms(&self) -> Result<Vec<RoomRecord>> {
        Ok(Vec::new())
    }

    async fn contact_by_username(&self, _username: &str) -> Result<Option<ContactRecord>> {
        Ok(None)
    }

    async fn contact_by_id(&self, _id: i64) -> Result<Option<ContactRecord>> {
        Ok(None)
    }

    async fn fetch_messages(
        &self,
        _room_username: &str,
        _count: usize,
        _order: SortOrder,
    ) -> Result<Vec<RawMessageRow>> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        anyhow::bail!("disk I/O error")
    }

    async fn execute(&self, _sql: &str, _params: Vec<Value>) -> Result<Vec<Vec<Value>>> {
        anyhow::bail!("disk I/O error")
    }
}

#[tokio::test]
async fn test_store_failure_degrades_to_empty() {
    let engine = MessageFilterEngine::new(Arc::new(BrokenStore { stall: false }), EngineOptions::default());

    let err = engine.try_query(ROOM, &FilterSpec::new(5)).await.unwrap_err();
    assert!(err.to_string().contains("disk I/O error"));
    assert!(engine.query(ROOM, &FilterSpec::new(5)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_fetch_times_out() {
    let options = EngineOptions {
        fetch_timeout: Duration::from_millis(100),
        ..EngineOptions::default()
    };
    let engine = MessageFilterEngine::new(Arc::new(BrokenStore { stall: true }), options);

    let err = engine.try_query(ROOM, &FilterSpec::new(5)).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
}
