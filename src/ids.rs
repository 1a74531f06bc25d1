/// Core identity types for the messaging engine.
///
/// - `UserId`: opaque user identity, owned by the identity directory
/// - `GroupId`: unique group identifier
/// - `Seq`: per-group strictly increasing message sequence number
/// - `MessageId`: a group plus a sequence number — globally unique, sortable
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Opaque user identity. Minted by the identity directory, referenced (never
/// owned) by groups, messages, and likes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Unique group identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        GroupId(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Seq / MessageId
// ---------------------------------------------------------------------------

/// Per-group message sequence number. Strictly increasing, assigned under the
/// group's serialization point, never reused. Establishes message order
/// independent of wall-clock timestamps.
pub type Seq = u64;

/// Globally unique message identifier: the owning group plus the per-group
/// sequence number. Sorts by `(group, seq)`, so within one group the ordering
/// is exactly posting order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub group: GroupId,
    pub seq: Seq,
}

impl MessageId {
    pub fn new(group: GroupId, seq: Seq) -> Self {
        MessageId { group, seq }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.seq)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({}/{})", self.group, self.seq)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_sort_by_group_then_seq() {
        let g = GroupId::new();
        let a = MessageId::new(g, 1);
        let b = MessageId::new(g, 2);
        assert!(a < b);
        assert_eq!(a, MessageId::new(g, 1));
    }

    #[test]
    fn ids_roundtrip_through_serde() {
        let id = MessageId::new(GroupId::new(), 42);
        let json = serde_json::to_string(&id).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn display_is_group_slash_seq() {
        let g = GroupId::new();
        let id = MessageId::new(g, 7);
        assert_eq!(format!("{}", id), format!("{}/7", g));
    }
}
