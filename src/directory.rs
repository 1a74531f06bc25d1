/// Identity directory contract — the engine's view of the user base.
///
/// The real directory (user accounts, login, password handling) lives in
/// the embedding application; the engine only asks two questions before any
/// mutation: does this user exist, and is the account active. The in-memory
/// implementation here backs tests and embedders without a user database.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::ids::UserId;

// ---------------------------------------------------------------------------
// IdentityDirectory contract (app implements)
// ---------------------------------------------------------------------------

pub trait IdentityDirectory: Send + Sync {
    fn user_exists(&self, id: UserId) -> bool;
    fn is_active(&self, id: UserId) -> bool;
}

// ---------------------------------------------------------------------------
// UserRecord / InMemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    pub active: bool,
}

/// Reference directory implementation over a locked map.
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        InMemoryDirectory {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new active user and return its id.
    pub fn register(&self, display_name: &str) -> UserId {
        let record = UserRecord {
            id: UserId::new(),
            display_name: display_name.to_string(),
            active: true,
        };
        let id = record.id;
        self.users.write().unwrap().insert(id, record);
        id
    }

    /// Deactivate an account. Unknown ids are ignored.
    pub fn deactivate(&self, id: UserId) {
        if let Some(record) = self.users.write().unwrap().get_mut(&id) {
            record.active = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: UserId) -> Option<UserRecord> {
        self.users.read().unwrap().get(&id).cloned()
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn user_exists(&self, id: UserId) -> bool {
        self.users.read().unwrap().contains_key(&id)
    }

    fn is_active(&self, id: UserId) -> bool {
        self.users
            .read()
            .unwrap()
            .get(&id)
            .is_some_and(|u| u.active)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_exists_and_active() {
        let dir = InMemoryDirectory::new();
        let id = dir.register("ada");
        assert!(dir.user_exists(id));
        assert!(dir.is_active(id));
        assert_eq!(dir.get(id).unwrap().display_name, "ada");
    }

    #[test]
    fn deactivate_keeps_existence() {
        let dir = InMemoryDirectory::new();
        let id = dir.register("bob");
        dir.deactivate(id);
        assert!(dir.user_exists(id));
        assert!(!dir.is_active(id));
    }

    #[test]
    fn unknown_user_is_neither() {
        let dir = InMemoryDirectory::new();
        let id = UserId::new();
        assert!(!dir.user_exists(id));
        assert!(!dir.is_active(id));
    }
}
