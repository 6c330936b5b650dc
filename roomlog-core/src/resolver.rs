// ABOUTME: Resolves a human-supplied room identifier (opaque id or display name)
// ABOUTME: Exact id lookup first, then a linear scan over rooms and their contacts

use crate::traits::{MessageStore, RoomRecord};
use anyhow::Result;
use std::sync::Arc;

/// Maps a room identifier to a room record.
///
/// Display names are not unique. When two rooms share a display name the
/// first one in store iteration order wins.
#[derive(Clone)]
pub struct RoomResolver {
    store: Arc<dyn MessageStore>,
}

impl RoomResolver {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Resolve an identifier. `Ok(None)` means no such room, which is not an error.
    pub async fn resolve(&self, identifier: &str) -> Result<Option<RoomRecord>> {
        if let Some(room) = self.store.room_by_username(identifier).await? {
            return Ok(Some(room));
        }

        for room in self.store.rooms().await? {
            if room.username == identifier {
                return Ok(Some(room));
            }

            let contact = self.store.contact_by_username(&room.username).await?;
            if contact.is_some_and(|c| c.display_name() == identifier) {
                tracing::debug!(
                    identifier = %identifier,
                    room = %room.username,
                    "Resolved room by display name"
                );
                return Ok(Some(room));
            }
        }

        Ok(None)
    }
}
