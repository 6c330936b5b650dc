// ABOUTME: Room message retrieval engine: resolve, fetch, reconstruct, filter, paginate
// ABOUTME: Grows the candidate batch on shortfall so pages are exact up to max_fetch_rows

use crate::message::{Message, MessageFactory, MessageType};
use crate::resolver::RoomResolver;
use crate::traits::{ContactRecord, MessageStore, RawMessageRow, RoomRecord, SortOrder};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Compound filter over a room's messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// Type codes to keep (empty = all)
    pub message_types: Vec<MessageType>,
    /// Only messages newer than `now - time_window`
    pub time_window: Option<Duration>,
    /// OR-matched substrings of the rendered text
    pub keywords: Vec<String>,
    /// Sender username
    pub sender: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            message_types: Vec::new(),
            time_window: None,
            keywords: Vec::new(),
            sender: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl FilterSpec {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = MessageType>) -> Self {
        self.message_types = types.into_iter().collect();
        self
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_keywords<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_sender(mut self, username: impl Into<String>) -> Self {
        self.sender = Some(username.into());
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            anyhow::bail!("limit must be at least 1");
        }
        Ok(())
    }

    /// Epoch-second floor for the given `now`, if a window is set
    pub fn start_time(&self, now: i64) -> Option<i64> {
        self.time_window
            .map(|w| now - i64::try_from(w.as_secs()).unwrap_or(i64::MAX))
    }

    fn accepts_type(&self, type_code: i64) -> bool {
        self.message_types.is_empty() || self.message_types.iter().any(|t| t.code() == type_code)
    }

    fn accepts_text(&self, text: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// Tunables for the engine's store access
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound for a single candidate batch
    pub max_fetch_rows: usize,
    /// Bound on each store call
    pub fetch_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_fetch_rows: 10_000,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Retrieves and filters a room's messages, newest first
#[derive(Clone)]
pub struct MessageFilterEngine {
    store: Arc<dyn MessageStore>,
    resolver: RoomResolver,
    options: EngineOptions,
}

impl MessageFilterEngine {
    pub fn new(store: Arc<dyn MessageStore>, options: EngineOptions) -> Self {
        Self {
            resolver: RoomResolver::new(Arc::clone(&store)),
            store,
            options,
        }
    }

    /// Query, degrading any failure to an empty result (logged)
    pub async fn query(&self, identifier: &str, spec: &FilterSpec) -> Vec<Message> {
        match self.try_query(identifier, spec).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(room = %identifier, error = %e, "Message query failed");
                Vec::new()
            }
        }
    }

    /// Query, surfacing failures. An unknown room is `Ok(empty)`.
    pub async fn try_query(&self, identifier: &str, spec: &FilterSpec) -> Result<Vec<Message>> {
        spec.validate()?;

        let room = match self.bounded("room lookup", self.resolver.resolve(identifier)).await? {
            Some(room) => room,
            None => {
                tracing::warn!(room = %identifier, "Room not found");
                return Ok(Vec::new());
            }
        };

        let sender_id = match &spec.sender {
            Some(username) => {
                match self
                    .bounded("sender lookup", self.store.contact_by_username(username))
                    .await?
                {
                    Some(contact) => Some(contact.id),
                    None => {
                        tracing::info!(sender = %username, "Sender not found, no messages can match");
                        return Ok(Vec::new());
                    }
                }
            }
            None => None,
        };

        let start_time = spec.start_time(chrono::Utc::now().timestamp());
        let wanted = spec.offset.saturating_add(spec.limit);
        let max_rows = self.options.max_fetch_rows.max(1);
        let mut batch = wanted.saturating_mul(2).clamp(1, max_rows);
        let mut contacts: HashMap<i64, Option<ContactRecord>> = HashMap::new();

        loop {
            let rows = self
                .bounded(
                    "message fetch",
                    self.store
                        .fetch_messages(&room.username, batch, SortOrder::Desc),
                )
                .await?;
            let exhausted = rows.len() < batch;

            let scan = self
                .scan(&room, &rows, spec, start_time, sender_id, wanted, &mut contacts)
                .await?;

            let satisfied = scan.matched.len() >= wanted;
            if satisfied || exhausted || scan.reached_floor || batch >= max_rows {
                if !satisfied && !exhausted && !scan.reached_floor {
                    tracing::warn!(
                        room = %room.username,
                        max_fetch_rows = max_rows,
                        matched = scan.matched.len(),
                        wanted,
                        "Batch cap reached before the page was filled"
                    );
                }
                tracing::debug!(
                    room = %room.username,
                    batch,
                    fetched = rows.len(),
                    matched = scan.matched.len(),
                    "Message query complete"
                );
                return Ok(scan
                    .matched
                    .into_iter()
                    .skip(spec.offset)
                    .take(spec.limit)
                    .collect());
            }

            batch = batch.saturating_mul(2).min(max_rows);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan(
        &self,
        room: &RoomRecord,
        rows: &[RawMessageRow],
        spec: &FilterSpec,
        start_time: Option<i64>,
        sender_id: Option<i64>,
        wanted: usize,
        contacts: &mut HashMap<i64, Option<ContactRecord>>,
    ) -> Result<Scan> {
        let mut scan = Scan::default();

        for row in rows {
            // Rows arrive newest first, so nothing past the floor can match.
            if start_time.is_some_and(|floor| row.create_time < floor) {
                scan.reached_floor = true;
                break;
            }
            if !spec.accepts_type(row.type_code) {
                continue;
            }
            if sender_id.is_some() && row.real_sender_id != sender_id {
                continue;
            }

            let sender = match row.real_sender_id {
                Some(id) => self.sender_contact(id, contacts).await?,
                None => None,
            };
            let message = MessageFactory::create(row, room, sender)
                .map_err(|e| anyhow!("Failed to build message {}: {}", row.local_id, e))?;

            if !spec.accepts_text(&message.render_text()) {
                continue;
            }

            scan.matched.push(message);
            if scan.matched.len() >= wanted {
                break;
            }
        }

        Ok(scan)
    }

    async fn sender_contact(
        &self,
        id: i64,
        cache: &mut HashMap<i64, Option<ContactRecord>>,
    ) -> Result<Option<ContactRecord>> {
        if let Some(cached) = cache.get(&id) {
            return Ok(cached.clone());
        }
        let contact = self
            .bounded("contact lookup", self.store.contact_by_id(id))
            .await?;
        cache.insert(id, contact.clone());
        Ok(contact)
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.options.fetch_timeout, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", what, self.options.fetch_timeout))?
    }
}

#[derive(Default)]
struct Scan {
    matched: Vec<Message>,
    reached_floor: bool,
}
