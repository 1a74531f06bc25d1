/// Membership registry — groups, members, and roles.
///
/// Authority for "is user U a member of group G" and "who owns G". Group
/// records and per-group membership maps live behind one lock so a reader
/// never observes a group without its owner membership.
///
/// Structural invariants enforced here:
/// - the owner is always a member; a group never exists without one
/// - group names are unique
/// - the owner membership cannot be removed (only group deletion ends it)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

use crate::ids::{GroupId, UserId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("a group named {0:?} already exists")]
    NameTaken(String),

    #[error("user {user} is already a member of group {group}")]
    AlreadyMember { group: GroupId, user: UserId },

    #[error("user {user} is not a member of group {group}")]
    MemberNotFound { group: GroupId, user: UserId },

    #[error("user {user} owns group {group} and cannot be removed from it")]
    CannotRemoveOwner { group: GroupId, user: UserId },
}

// ---------------------------------------------------------------------------
// Role / MemberEntry / GroupRecord
// ---------------------------------------------------------------------------

/// Role of a member within a group. A tagged variant rather than a boolean
/// so future roles (moderator, guest, ...) extend it without reshaping
/// membership records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Member,
}

/// One (group, user) membership fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub user: UserId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// A group's own record. Membership is tracked separately, keyed by the
/// group id, never embedded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
}

/// Group record plus the derived member count, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
}

// ---------------------------------------------------------------------------
// MembershipRegistry
// ---------------------------------------------------------------------------

struct RegistryInner {
    groups: HashMap<GroupId, GroupRecord>,
    /// Group name -> id, for the uniqueness check.
    names: HashMap<String, GroupId>,
    /// Per-group membership map. BTreeMap keyed by user for deterministic
    /// iteration; sort-by-joined-at happens at read time.
    members: HashMap<GroupId, BTreeMap<UserId, MemberEntry>>,
}

/// Thread-safe membership state. Mutations on one group are serialized by
/// the engine's per-group lock; this lock exists so reads from other tasks
/// are always consistent.
pub struct MembershipRegistry {
    inner: RwLock<RegistryInner>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        MembershipRegistry {
            inner: RwLock::new(RegistryInner {
                groups: HashMap::new(),
                names: HashMap::new(),
                members: HashMap::new(),
            }),
        }
    }

    /// Create a group and its owner membership in one step, so no reader
    /// ever sees a group with zero members.
    pub fn create_group(
        &self,
        owner: UserId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<GroupRecord, MembershipError> {
        let mut inner = self.inner.write().unwrap();
        if inner.names.contains_key(name) {
            return Err(MembershipError::NameTaken(name.to_string()));
        }
        let record = GroupRecord {
            id: GroupId::new(),
            name: name.to_string(),
            owner,
            created_at: now,
        };
        let mut members = BTreeMap::new();
        members.insert(
            owner,
            MemberEntry {
                user: owner,
                role: Role::Owner,
                joined_at: now,
            },
        );
        inner.names.insert(record.name.clone(), record.id);
        inner.members.insert(record.id, members);
        inner.groups.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn get_group(&self, group: GroupId) -> Result<GroupRecord, MembershipError> {
        let inner = self.inner.read().unwrap();
        inner
            .groups
            .get(&group)
            .cloned()
            .ok_or(MembershipError::GroupNotFound(group))
    }

    /// All groups, sorted by name. Any authenticated user may enumerate.
    pub fn list_groups(&self) -> Vec<GroupSummary> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<GroupSummary> = inner
            .groups
            .values()
            .map(|g| GroupSummary {
                id: g.id,
                name: g.name.clone(),
                owner: g.owner,
                created_at: g.created_at,
                member_count: inner.members.get(&g.id).map_or(0, |m| m.len()),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Snapshot of (id, name) for every live group, for index rebuild.
    pub fn group_names(&self) -> Vec<(GroupId, String)> {
        let inner = self.inner.read().unwrap();
        inner
            .groups
            .values()
            .map(|g| (g.id, g.name.clone()))
            .collect()
    }

    pub fn add_member(
        &self,
        group: GroupId,
        target: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), MembershipError> {
        let mut inner = self.inner.write().unwrap();
        let members = inner
            .members
            .get_mut(&group)
            .ok_or(MembershipError::GroupNotFound(group))?;
        if members.contains_key(&target) {
            return Err(MembershipError::AlreadyMember {
                group,
                user: target,
            });
        }
        members.insert(
            target,
            MemberEntry {
                user: target,
                role: Role::Member,
                joined_at: now,
            },
        );
        Ok(())
    }

    pub fn remove_member(&self, group: GroupId, target: UserId) -> Result<(), MembershipError> {
        let mut inner = self.inner.write().unwrap();
        let members = inner
            .members
            .get_mut(&group)
            .ok_or(MembershipError::GroupNotFound(group))?;
        match members.get(&target) {
            None => Err(MembershipError::MemberNotFound {
                group,
                user: target,
            }),
            Some(entry) if entry.role == Role::Owner => Err(MembershipError::CannotRemoveOwner {
                group,
                user: target,
            }),
            Some(_) => {
                members.remove(&target);
                Ok(())
            }
        }
    }

    pub fn is_member(&self, group: GroupId, user: UserId) -> bool {
        let inner = self.inner.read().unwrap();
        inner
            .members
            .get(&group)
            .is_some_and(|m| m.contains_key(&user))
    }

    pub fn role_of(&self, group: GroupId, user: UserId) -> Option<Role> {
        let inner = self.inner.read().unwrap();
        inner
            .members
            .get(&group)
            .and_then(|m| m.get(&user))
            .map(|e| e.role)
    }

    /// Members sorted by joined-at ascending; the owner sorts first on ties
    /// (it joined at group creation), user id breaks remaining ties.
    pub fn list_members(&self, group: GroupId) -> Result<Vec<MemberEntry>, MembershipError> {
        let inner = self.inner.read().unwrap();
        let members = inner
            .members
            .get(&group)
            .ok_or(MembershipError::GroupNotFound(group))?;
        let mut out: Vec<MemberEntry> = members.values().cloned().collect();
        out.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then((a.role != Role::Owner).cmp(&(b.role != Role::Owner)))
                .then(a.user.cmp(&b.user))
        });
        Ok(out)
    }

    /// Remove the group, its name reservation, and all memberships. Returns
    /// the record so callers can cascade (messages, likes, index).
    pub fn delete_group(&self, group: GroupId) -> Result<GroupRecord, MembershipError> {
        let mut inner = self.inner.write().unwrap();
        let record = inner
            .groups
            .remove(&group)
            .ok_or(MembershipError::GroupNotFound(group))?;
        inner.names.remove(&record.name);
        inner.members.remove(&group);
        Ok(record)
    }
}

impl Default for MembershipRegistry {
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

    fn registry_with_group() -> (MembershipRegistry, GroupRecord, UserId) {
        let reg = MembershipRegistry::new();
        let owner = UserId::new();
        let record = reg.create_group(owner, "eng", Utc::now()).unwrap();
        (reg, record, owner)
    }

    #[test]
    fn create_group_inserts_owner_membership() {
        let (reg, record, owner) = registry_with_group();
        assert!(reg.is_member(record.id, owner));
        assert_eq!(reg.role_of(record.id, owner), Some(Role::Owner));
        let members = reg.list_members(record.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user, owner);
    }

    #[test]
    fn duplicate_group_name_is_rejected() {
        let (reg, _, _) = registry_with_group();
        let err = reg.create_group(UserId::new(), "eng", Utc::now()).unwrap_err();
        assert_eq!(err, MembershipError::NameTaken("eng".into()));
    }

    #[test]
    fn add_member_twice_reports_already_member() {
        let (reg, record, _) = registry_with_group();
        let user = UserId::new();
        reg.add_member(record.id, user, Utc::now()).unwrap();
        let err = reg.add_member(record.id, user, Utc::now()).unwrap_err();
        assert!(matches!(err, MembershipError::AlreadyMember { .. }));
    }

    #[test]
    fn membership_and_listing_agree() {
        let (reg, record, owner) = registry_with_group();
        let a = UserId::new();
        let b = UserId::new();
        reg.add_member(record.id, a, Utc::now()).unwrap();
        reg.add_member(record.id, b, Utc::now()).unwrap();
        let listed: Vec<UserId> = reg
            .list_members(record.id)
            .unwrap()
            .into_iter()
            .map(|e| e.user)
            .collect();
        for user in [owner, a, b] {
            assert_eq!(reg.is_member(record.id, user), listed.contains(&user));
        }
        assert!(!reg.is_member(record.id, UserId::new()));
    }

    #[test]
    fn members_are_sorted_by_join_time_owner_first() {
        let reg = MembershipRegistry::new();
        let owner = UserId::new();
        let t0 = Utc::now();
        let record = reg.create_group(owner, "ordered", t0).unwrap();
        let a = UserId::new();
        let b = UserId::new();
        reg.add_member(record.id, a, t0 + chrono::Duration::seconds(2)).unwrap();
        reg.add_member(record.id, b, t0 + chrono::Duration::seconds(1)).unwrap();
        let order: Vec<UserId> = reg
            .list_members(record.id)
            .unwrap()
            .into_iter()
            .map(|e| e.user)
            .collect();
        assert_eq!(order, vec![owner, b, a]);
    }

    #[test]
    fn owner_cannot_be_removed() {
        let (reg, record, owner) = registry_with_group();
        let err = reg.remove_member(record.id, owner).unwrap_err();
        assert!(matches!(err, MembershipError::CannotRemoveOwner { .. }));
        assert!(reg.is_member(record.id, owner));
    }

    #[test]
    fn remove_member_then_absent() {
        let (reg, record, _) = registry_with_group();
        let user = UserId::new();
        reg.add_member(record.id, user, Utc::now()).unwrap();
        reg.remove_member(record.id, user).unwrap();
        assert!(!reg.is_member(record.id, user));
        let err = reg.remove_member(record.id, user).unwrap_err();
        assert!(matches!(err, MembershipError::MemberNotFound { .. }));
    }

    #[test]
    fn delete_group_clears_memberships_and_frees_name() {
        let (reg, record, owner) = registry_with_group();
        reg.delete_group(record.id).unwrap();
        assert!(!reg.is_member(record.id, owner));
        assert!(matches!(
            reg.get_group(record.id),
            Err(MembershipError::GroupNotFound(_))
        ));
        // Name is reusable after deletion.
        reg.create_group(UserId::new(), "eng", Utc::now()).unwrap();
    }

    #[test]
    fn list_groups_reports_member_counts() {
        let (reg, record, _) = registry_with_group();
        reg.add_member(record.id, UserId::new(), Utc::now()).unwrap();
        reg.create_group(UserId::new(), "art", Utc::now()).unwrap();
        let groups = reg.list_groups();
        assert_eq!(groups.len(), 2);
        // Sorted by name.
        assert_eq!(groups[0].name, "art");
        assert_eq!(groups[0].member_count, 1);
        assert_eq!(groups[1].name, "eng");
        assert_eq!(groups[1].member_count, 2);
    }
}
