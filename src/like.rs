/// Like ledger — who liked which message, with O(1) counts.
///
/// Per-message state is the set of likers plus a running counter mutated in
/// the same critical section, never recomputed by scanning. Counts are read
/// far more often than they change.
///
/// Ledger entries survive message tombstoning (like counts on a deleted
/// message stay resolvable); they are dropped only when the whole group is
/// deleted.
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

use crate::ids::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LikeError {
    #[error("user {user} already liked message {message}")]
    AlreadyLiked { message: MessageId, user: UserId },

    #[error("user {user} has no like on message {message}")]
    NotLiked { message: MessageId, user: UserId },
}

// ---------------------------------------------------------------------------
// LikeLedger
// ---------------------------------------------------------------------------

struct MessageLikes {
    /// Liker -> liked-at. BTreeMap for deterministic iteration.
    users: BTreeMap<UserId, DateTime<Utc>>,
    /// Running counter, kept in lockstep with `users` under the write lock.
    count: u64,
}

/// Thread-safe like state for all messages. The single write lock makes a
/// concurrent like/unlike race on one (message, user) pair resolve to
/// exactly one winner — no lost updates, no double counts.
pub struct LikeLedger {
    by_message: RwLock<HashMap<MessageId, MessageLikes>>,
}

impl LikeLedger {
    pub fn new() -> Self {
        LikeLedger {
            by_message: RwLock::new(HashMap::new()),
        }
    }

    /// Record a like. The second like by the same user is `AlreadyLiked`,
    /// never a double count.
    pub fn like(
        &self,
        message: MessageId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), LikeError> {
        let mut by_message = self.by_message.write().unwrap();
        let likes = by_message.entry(message).or_insert_with(|| MessageLikes {
            users: BTreeMap::new(),
            count: 0,
        });
        if likes.users.contains_key(&user) {
            return Err(LikeError::AlreadyLiked { message, user });
        }
        likes.users.insert(user, now);
        likes.count += 1;
        debug_assert_eq!(likes.count as usize, likes.users.len());
        Ok(())
    }

    /// Remove a like. `NotLiked` if no prior like exists.
    pub fn unlike(&self, message: MessageId, user: UserId) -> Result<(), LikeError> {
        let mut by_message = self.by_message.write().unwrap();
        let likes = by_message
            .get_mut(&message)
            .ok_or(LikeError::NotLiked { message, user })?;
        if likes.users.remove(&user).is_none() {
            return Err(LikeError::NotLiked { message, user });
        }
        likes.count -= 1;
        debug_assert_eq!(likes.count as usize, likes.users.len());
        Ok(())
    }

    pub fn count(&self, message: MessageId) -> u64 {
        let by_message = self.by_message.read().unwrap();
        by_message.get(&message).map_or(0, |l| l.count)
    }

    pub fn has_liked(&self, message: MessageId, user: UserId) -> bool {
        let by_message = self.by_message.read().unwrap();
        by_message
            .get(&message)
            .is_some_and(|l| l.users.contains_key(&user))
    }

    /// The current liker set, liked-at ascending then user id.
    #[cfg(test)]
    pub(crate) fn likers(&self, message: MessageId) -> Vec<UserId> {
        let by_message = self.by_message.read().unwrap();
        by_message.get(&message).map_or_else(Vec::new, |l| {
            let mut out: Vec<(UserId, DateTime<Utc>)> =
                l.users.iter().map(|(u, t)| (*u, *t)).collect();
            out.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
            out.into_iter().map(|(u, _)| u).collect()
        })
    }

    /// Drop all ledger entries for the given messages (group-deletion
    /// cascade).
    pub fn drop_messages(&self, messages: &[MessageId]) {
        let mut by_message = self.by_message.write().unwrap();
        for id in messages {
            by_message.remove(id);
        }
    }
}

impl Default for LikeLedger {
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
    use crate::ids::GroupId;

    fn msg() -> MessageId {
        MessageId::new(GroupId::new(), 1)
    }

    #[test]
    fn like_then_count_then_unlike() {
        let ledger = LikeLedger::new();
        let (m, u) = (msg(), UserId::new());
        ledger.like(m, u, Utc::now()).unwrap();
        assert_eq!(ledger.count(m), 1);
        assert!(ledger.has_liked(m, u));
        ledger.unlike(m, u).unwrap();
        assert_eq!(ledger.count(m), 0);
        assert!(!ledger.has_liked(m, u));
    }

    #[test]
    fn double_like_is_rejected_and_never_double_counts() {
        let ledger = LikeLedger::new();
        let (m, u) = (msg(), UserId::new());
        ledger.like(m, u, Utc::now()).unwrap();
        let err = ledger.like(m, u, Utc::now()).unwrap_err();
        assert!(matches!(err, LikeError::AlreadyLiked { .. }));
        assert_eq!(ledger.count(m), 1);
    }

    #[test]
    fn unlike_without_like_is_not_liked() {
        let ledger = LikeLedger::new();
        let err = ledger.unlike(msg(), UserId::new()).unwrap_err();
        assert!(matches!(err, LikeError::NotLiked { .. }));
    }

    #[test]
    fn counter_never_drifts_from_the_set() {
        let ledger = LikeLedger::new();
        let m = msg();
        let users: Vec<UserId> = (0..8).map(|_| UserId::new()).collect();
        for u in &users {
            ledger.like(m, *u, Utc::now()).unwrap();
            assert_eq!(ledger.count(m) as usize, ledger.likers(m).len());
        }
        for u in &users[..4] {
            ledger.unlike(m, *u).unwrap();
            assert_eq!(ledger.count(m) as usize, ledger.likers(m).len());
        }
        assert_eq!(ledger.count(m), 4);
    }

    #[test]
    fn drop_messages_clears_state() {
        let ledger = LikeLedger::new();
        let m = msg();
        ledger.like(m, UserId::new(), Utc::now()).unwrap();
        ledger.drop_messages(&[m]);
        assert_eq!(ledger.count(m), 0);
    }
}
