/// Message store — per-group message arenas with tombstone deletes.
///
/// Each group owns an arena: a next-sequence cell plus a BTreeMap of
/// messages keyed by sequence number. Sequence numbers start at 1, are
/// assigned under the group's serialization point, and are never reused.
/// Deletion sets a tombstone flag; entries are never physically removed, so
/// like-ledger references stay valid and "deleted" is distinguishable from
/// "never existed". Readers filter tombstones.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;
use thiserror::Error;

use crate::ids::{GroupId, MessageId, Seq, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("message not found: {0}")]
    NotFound(MessageId),
}

// ---------------------------------------------------------------------------
// Message / Page
// ---------------------------------------------------------------------------

/// One message. `deleted` is the tombstone flag; tombstoned messages never
/// reach readers through `get`/`list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) deleted: bool,
}

/// One page of a message listing. `next_cursor` is the last returned
/// sequence number, present only when another page may exist; feed it back
/// as the cursor to resume. Pagination is stable under concurrent appends
/// because the cursor is an exclusive lower bound on sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub messages: Vec<Message>,
    pub next_cursor: Option<Seq>,
}

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

struct GroupArena {
    /// Next sequence number to assign. Monotone, never rewound.
    next_seq: Seq,
    messages: BTreeMap<Seq, Message>,
}

impl GroupArena {
    fn new() -> Self {
        GroupArena {
            next_seq: 1,
            messages: BTreeMap::new(),
        }
    }
}

/// Thread-safe message state for all groups. Per-group mutation ordering is
/// the engine's job; the lock here keeps cross-group reads consistent.
pub struct MessageStore {
    arenas: RwLock<HashMap<GroupId, GroupArena>>,
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore {
            arenas: RwLock::new(HashMap::new()),
        }
    }

    /// Create the arena for a new group. Idempotent.
    pub fn create_arena(&self, group: GroupId) {
        let mut arenas = self.arenas.write().unwrap();
        arenas.entry(group).or_insert_with(GroupArena::new);
    }

    /// Append a message, assigning the group's next sequence number.
    pub fn post(
        &self,
        group: GroupId,
        author: UserId,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, MessageError> {
        let mut arenas = self.arenas.write().unwrap();
        let arena = arenas
            .get_mut(&group)
            .ok_or(MessageError::GroupNotFound(group))?;
        let seq = arena.next_seq;
        arena.next_seq += 1;
        let message = Message {
            id: MessageId::new(group, seq),
            author,
            body: body.to_string(),
            created_at: now,
            edited_at: None,
            deleted: false,
        };
        arena.messages.insert(seq, message.clone());
        Ok(message)
    }

    /// Reader-facing fetch: tombstoned messages are `NotFound`, never data.
    pub fn get(&self, group: GroupId, seq: Seq) -> Result<Message, MessageError> {
        let message = self.get_any(group, seq)?;
        if message.deleted {
            return Err(MessageError::NotFound(MessageId::new(group, seq)));
        }
        Ok(message)
    }

    /// Fetch including tombstones. Used by the engine for authorization and
    /// for answering like-count queries on deleted messages.
    pub(crate) fn get_any(&self, group: GroupId, seq: Seq) -> Result<Message, MessageError> {
        let arenas = self.arenas.read().unwrap();
        let arena = arenas
            .get(&group)
            .ok_or(MessageError::GroupNotFound(group))?;
        arena
            .messages
            .get(&seq)
            .cloned()
            .ok_or(MessageError::NotFound(MessageId::new(group, seq)))
    }

    /// Replace the body of a live message. Sets `edited_at`; the sequence
    /// number and `created_at` never change.
    pub fn edit(
        &self,
        group: GroupId,
        seq: Seq,
        new_body: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, MessageError> {
        let mut arenas = self.arenas.write().unwrap();
        let arena = arenas
            .get_mut(&group)
            .ok_or(MessageError::GroupNotFound(group))?;
        let message = arena
            .messages
            .get_mut(&seq)
            .filter(|m| !m.deleted)
            .ok_or(MessageError::NotFound(MessageId::new(group, seq)))?;
        message.body = new_body.to_string();
        message.edited_at = Some(now);
        Ok(message.clone())
    }

    /// Tombstone a live message. Tombstoning an already-deleted message is
    /// `NotFound` (deleted messages are invisible, never resurrected).
    pub fn tombstone(&self, group: GroupId, seq: Seq) -> Result<(), MessageError> {
        let mut arenas = self.arenas.write().unwrap();
        let arena = arenas
            .get_mut(&group)
            .ok_or(MessageError::GroupNotFound(group))?;
        let message = arena
            .messages
            .get_mut(&seq)
            .filter(|m| !m.deleted)
            .ok_or(MessageError::NotFound(MessageId::new(group, seq)))?;
        message.deleted = true;
        Ok(())
    }

    /// Tombstone every live message in the group (group-deletion cascade).
    /// Returns the ids that were live, for like-ledger and index cleanup.
    pub fn tombstone_group(&self, group: GroupId) -> Result<Vec<MessageId>, MessageError> {
        let mut arenas = self.arenas.write().unwrap();
        let arena = arenas
            .get_mut(&group)
            .ok_or(MessageError::GroupNotFound(group))?;
        let mut ids = Vec::new();
        for message in arena.messages.values_mut() {
            if !message.deleted {
                message.deleted = true;
                ids.push(message.id);
            }
        }
        Ok(ids)
    }

    /// Non-deleted messages after `cursor` (exclusive), sequence ascending.
    /// `limit` is clamped by the caller. `next_cursor` is set only when the
    /// page filled, i.e. more messages may follow.
    pub fn list(
        &self,
        group: GroupId,
        cursor: Option<Seq>,
        limit: usize,
    ) -> Result<Page, MessageError> {
        let arenas = self.arenas.read().unwrap();
        let arena = arenas
            .get(&group)
            .ok_or(MessageError::GroupNotFound(group))?;
        let lower = match cursor {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };
        let messages: Vec<Message> = arena
            .messages
            .range((lower, Bound::Unbounded))
            .filter(|(_, m)| !m.deleted)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect();
        let next_cursor = if messages.len() == limit {
            messages.last().map(|m| m.id.seq)
        } else {
            None
        };
        Ok(Page {
            messages,
            next_cursor,
        })
    }

    /// Snapshot of all live messages in one group, for index rebuild and
    /// search-result filtering.
    pub fn live_messages(&self, group: GroupId) -> Vec<Message> {
        let arenas = self.arenas.read().unwrap();
        arenas.get(&group).map_or_else(Vec::new, |arena| {
            arena
                .messages
                .values()
                .filter(|m| !m.deleted)
                .cloned()
                .collect()
        })
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_group() -> (MessageStore, GroupId, UserId) {
        let store = MessageStore::new();
        let group = GroupId::new();
        store.create_arena(group);
        (store, group, UserId::new())
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let (store, group, author) = store_with_group();
        for expected in 1..=5 {
            let m = store.post(group, author, "hi", Utc::now()).unwrap();
            assert_eq!(m.id.seq, expected);
        }
    }

    #[test]
    fn post_to_unknown_group_fails() {
        let store = MessageStore::new();
        let err = store
            .post(GroupId::new(), UserId::new(), "hi", Utc::now())
            .unwrap_err();
        assert!(matches!(err, MessageError::GroupNotFound(_)));
    }

    #[test]
    fn edit_sets_edited_at_and_keeps_created_at() {
        let (store, group, author) = store_with_group();
        let posted = store.post(group, author, "first", Utc::now()).unwrap();
        let edited = store
            .edit(group, posted.id.seq, "second", Utc::now())
            .unwrap();
        assert_eq!(edited.body, "second");
        assert_eq!(edited.created_at, posted.created_at);
        assert_eq!(edited.id.seq, posted.id.seq);
        assert!(edited.edited_at.is_some());
    }

    #[test]
    fn tombstoned_message_is_not_found_but_seq_is_not_reused() {
        let (store, group, author) = store_with_group();
        let first = store.post(group, author, "one", Utc::now()).unwrap();
        store.tombstone(group, first.id.seq).unwrap();
        assert!(matches!(
            store.get(group, first.id.seq),
            Err(MessageError::NotFound(_))
        ));
        assert!(matches!(
            store.edit(group, first.id.seq, "x", Utc::now()),
            Err(MessageError::NotFound(_))
        ));
        assert!(matches!(
            store.tombstone(group, first.id.seq),
            Err(MessageError::NotFound(_))
        ));
        let second = store.post(group, author, "two", Utc::now()).unwrap();
        assert_eq!(second.id.seq, first.id.seq + 1);
    }

    #[test]
    fn list_filters_tombstones_and_orders_by_seq() {
        let (store, group, author) = store_with_group();
        for body in ["a", "b", "c", "d"] {
            store.post(group, author, body, Utc::now()).unwrap();
        }
        store.tombstone(group, 2).unwrap();
        let page = store.list(group, None, 10).unwrap();
        let seqs: Vec<Seq> = page.messages.iter().map(|m| m.id.seq).collect();
        assert_eq!(seqs, vec![1, 3, 4]);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn cursor_pagination_is_restartable() {
        let (store, group, author) = store_with_group();
        for i in 0..7 {
            store.post(group, author, &format!("m{i}"), Utc::now()).unwrap();
        }
        let first = store.list(group, None, 3).unwrap();
        assert_eq!(first.messages.len(), 3);
        assert_eq!(first.next_cursor, Some(3));
        // New messages appended mid-pagination do not disturb earlier pages.
        store.post(group, author, "late", Utc::now()).unwrap();
        let second = store.list(group, first.next_cursor, 3).unwrap();
        let seqs: Vec<Seq> = second.messages.iter().map(|m| m.id.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
        let third = store.list(group, second.next_cursor, 3).unwrap();
        let seqs: Vec<Seq> = third.messages.iter().map(|m| m.id.seq).collect();
        assert_eq!(seqs, vec![7, 8]);
        assert_eq!(third.next_cursor, None);
    }

    #[test]
    fn tombstone_group_reports_only_live_ids() {
        let (store, group, author) = store_with_group();
        for body in ["a", "b", "c"] {
            store.post(group, author, body, Utc::now()).unwrap();
        }
        store.tombstone(group, 2).unwrap();
        let ids = store.tombstone_group(group).unwrap();
        let seqs: Vec<Seq> = ids.iter().map(|id| id.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert!(store.live_messages(group).is_empty());
    }
}
