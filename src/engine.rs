/// Messaging engine — the single entry point for every public operation.
///
/// Composes the identity directory, membership registry, message store,
/// like ledger, and search index. Each operation is: validate the actor,
/// acquire the group's serialization point (bounded by the operation
/// timeout), run one authorization check, apply one atomic mutation, then
/// hand the index update to the writer. No operation partially authorizes
/// and then partially mutates visibly to another caller.
///
/// Mutual exclusion is per group: membership changes and sequence-number
/// assignment for one group are serialized, while unrelated groups proceed
/// in parallel. Search updates are best-effort relative to the source of
/// truth — they are logged and retried, never allowed to fail the primary
/// operation.
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, IndexMode, MAX_PAGE_SIZE};
use crate::directory::IdentityDirectory;
use crate::error::{EngineError, Result};
use crate::ids::{GroupId, MessageId, Seq, UserId};
use crate::like::LikeLedger;
use crate::membership::{GroupRecord, GroupSummary, MemberEntry, MembershipRegistry, Role};
use crate::message::{Message, MessageStore, Page};
use crate::search::{DocId, InMemorySearchIndex, SearchIndex};

// ---------------------------------------------------------------------------
// Index writer
// ---------------------------------------------------------------------------

/// One pending search-index update.
enum IndexEvent {
    UpsertGroup { id: GroupId, name: String },
    UpsertMessage { id: MessageId, body: String },
    Remove(DocId),
    /// Barrier: acked once every prior event has been applied.
    Flush(oneshot::Sender<()>),
}

/// Apply one event, retrying on failure within the configured budget. A
/// permanently failing update is dropped with a warning; `rebuild` is the
/// recovery path for whatever staleness that leaves behind.
async fn apply_with_retry(
    index: &dyn SearchIndex,
    event: &IndexEvent,
    retry_limit: u32,
    retry_delay: Duration,
) {
    let mut attempt = 0u32;
    loop {
        let result = match event {
            IndexEvent::UpsertGroup { id, name } => index.upsert_group(*id, name),
            IndexEvent::UpsertMessage { id, body } => index.upsert_message(*id, body),
            IndexEvent::Remove(doc) => index.remove(*doc),
            IndexEvent::Flush(_) => Ok(()),
        };
        match result {
            Ok(()) => return,
            Err(e) if attempt < retry_limit => {
                attempt += 1;
                log::warn!("index update failed (attempt {attempt}): {e}; retrying");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                log::warn!("index update dropped after {attempt} retries: {e}");
                return;
            }
        }
    }
}

fn spawn_index_writer(
    index: Arc<dyn SearchIndex>,
    retry_limit: u32,
    retry_delay: Duration,
) -> (mpsc::UnboundedSender<IndexEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<IndexEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                IndexEvent::Flush(ack) => {
                    let _ = ack.send(());
                }
                other => apply_with_retry(index.as_ref(), &other, retry_limit, retry_delay).await,
            }
        }
        log::debug!("index writer stopped");
    });
    (tx, handle)
}

// ---------------------------------------------------------------------------
// MessagingEngine
// ---------------------------------------------------------------------------

pub struct MessagingEngine {
    directory: Arc<dyn IdentityDirectory>,
    registry: MembershipRegistry,
    store: MessageStore,
    likes: LikeLedger,
    index: Arc<dyn SearchIndex>,
    /// Group -> serialization point. Entries are created lazily for live
    /// groups and dropped when the group is deleted.
    locks: StdMutex<HashMap<GroupId, Arc<AsyncMutex<()>>>>,
    index_tx: StdMutex<Option<mpsc::UnboundedSender<IndexEvent>>>,
    writer: StdMutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl MessagingEngine {
    /// Engine over the built-in in-memory search index. Must be called from
    /// within a tokio runtime when `index_mode` is `Background`.
    pub fn new(directory: Arc<dyn IdentityDirectory>, config: EngineConfig) -> Self {
        Self::with_index(directory, Arc::new(InMemorySearchIndex::new()), config)
    }

    /// Engine over a caller-supplied search index implementation.
    pub fn with_index(
        directory: Arc<dyn IdentityDirectory>,
        index: Arc<dyn SearchIndex>,
        config: EngineConfig,
    ) -> Self {
        let (index_tx, writer) = match config.index_mode {
            IndexMode::Background => {
                let (tx, handle) = spawn_index_writer(
                    index.clone(),
                    config.index_retry_limit,
                    config.index_retry_delay,
                );
                (Some(tx), Some(handle))
            }
            IndexMode::Inline => (None, None),
        };
        MessagingEngine {
            directory,
            registry: MembershipRegistry::new(),
            store: MessageStore::new(),
            likes: LikeLedger::new(),
            index,
            locks: StdMutex::new(HashMap::new()),
            index_tx: StdMutex::new(index_tx),
            writer: StdMutex::new(writer),
            config,
        }
    }

    /// Stop the background index writer after draining pending updates.
    pub async fn shutdown(&self) {
        let tx = self.index_tx.lock().unwrap().take();
        drop(tx);
        let writer = self.writer.lock().unwrap().take();
        if let Some(handle) = writer {
            let _ = handle.await;
        }
    }

    /// Wait until every index update emitted so far has been applied.
    /// No-op in inline mode.
    pub async fn flush_index(&self) {
        let tx = self.index_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(IndexEvent::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal plumbing
    // -----------------------------------------------------------------------

    fn check_user(&self, id: UserId) -> Result<()> {
        if !self.directory.user_exists(id) {
            return Err(EngineError::UserNotFound(id));
        }
        if !self.directory.is_active(id) {
            return Err(EngineError::UserInactive(id));
        }
        Ok(())
    }

    /// Acquire the group's serialization point within the operation timeout.
    /// Callers check group existence first so bogus ids do not grow the map.
    async fn lock_group(&self, group: GroupId, op: &'static str) -> Result<OwnedMutexGuard<()>> {
        let cell = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(group)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        tokio::time::timeout(self.config.op_timeout, cell.lock_owned())
            .await
            .map_err(|_| EngineError::Timeout { op })
    }

    /// Acquire the group's serialization point, then re-verify the group
    /// still exists: it may have been deleted while we waited, and the
    /// existence pre-check may have re-inserted a lock cell for the dead
    /// group. Prunes that cell on the way out, so `locks` only ever holds
    /// cells for live groups.
    async fn lock_live_group(
        &self,
        group: GroupId,
        op: &'static str,
    ) -> Result<OwnedMutexGuard<()>> {
        let guard = self.lock_group(group, op).await?;
        if let Err(e) = self.registry.get_group(group) {
            self.locks.lock().unwrap().remove(&group);
            return Err(e.into());
        }
        Ok(guard)
    }

    /// Group must exist and the actor must currently be a member. Absence
    /// of the group wins over lack of membership.
    fn require_member(&self, group: GroupId, actor: UserId, action: &'static str) -> Result<()> {
        self.registry.get_group(group)?;
        if !self.registry.is_member(group, actor) {
            return Err(EngineError::NotAuthorized { actor, action });
        }
        Ok(())
    }

    fn validate_group_name<'a>(&self, name: &'a str) -> Result<&'a str> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput {
                field: "name",
                reason: "must not be empty".into(),
            });
        }
        if name.chars().count() > self.config.max_group_name_len {
            return Err(EngineError::InvalidInput {
                field: "name",
                reason: format!("exceeds {} characters", self.config.max_group_name_len),
            });
        }
        Ok(name)
    }

    fn validate_body(&self, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(EngineError::InvalidInput {
                field: "body",
                reason: "must not be empty".into(),
            });
        }
        if body.chars().count() > self.config.max_message_len {
            return Err(EngineError::InvalidInput {
                field: "body",
                reason: format!("exceeds {} characters", self.config.max_message_len),
            });
        }
        Ok(())
    }

    async fn emit(&self, event: IndexEvent) {
        match self.config.index_mode {
            IndexMode::Inline => {
                apply_with_retry(
                    self.index.as_ref(),
                    &event,
                    self.config.index_retry_limit,
                    self.config.index_retry_delay,
                )
                .await;
            }
            IndexMode::Background => {
                let tx = self.index_tx.lock().unwrap().clone();
                match tx {
                    Some(tx) => {
                        if tx.send(event).is_err() {
                            log::warn!("index writer gone; dropping index update");
                        }
                    }
                    None => log::warn!("engine shut down; dropping index update"),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub async fn create_group(&self, actor: UserId, name: &str) -> Result<GroupRecord> {
        self.check_user(actor)?;
        let name = self.validate_group_name(name)?;
        let record = self.registry.create_group(actor, name, Utc::now())?;
        self.store.create_arena(record.id);
        self.emit(IndexEvent::UpsertGroup {
            id: record.id,
            name: record.name.clone(),
        })
        .await;
        log::info!("group {} ({:?}) created by {}", record.id, record.name, actor);
        Ok(record)
    }

    pub async fn get_group(&self, actor: UserId, group: GroupId) -> Result<GroupSummary> {
        self.check_user(actor)?;
        let record = self.registry.get_group(group)?;
        let members = self.registry.list_members(group)?;
        Ok(GroupSummary {
            id: record.id,
            name: record.name,
            owner: record.owner,
            created_at: record.created_at,
            member_count: members.len(),
        })
    }

    pub async fn list_groups(&self, actor: UserId) -> Result<Vec<GroupSummary>> {
        self.check_user(actor)?;
        Ok(self.registry.list_groups())
    }

    /// Delete a group (owner only). Cascades: every message is tombstoned,
    /// their likes dropped, all memberships removed, the group's and its
    /// messages' search documents invalidated.
    pub async fn delete_group(&self, actor: UserId, group: GroupId) -> Result<()> {
        self.check_user(actor)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "delete group").await?;
        if self.registry.role_of(group, actor) != Some(Role::Owner) {
            return Err(EngineError::NotAuthorized {
                actor,
                action: "delete this group",
            });
        }
        let tombstoned = self.store.tombstone_group(group)?;
        self.likes.drop_messages(&tombstoned);
        let record = self.registry.delete_group(group)?;
        self.locks.lock().unwrap().remove(&group);
        for id in &tombstoned {
            self.emit(IndexEvent::Remove(DocId::Message(*id))).await;
        }
        self.emit(IndexEvent::Remove(DocId::Group(group))).await;
        log::info!(
            "group {} ({:?}) deleted by {} ({} messages tombstoned)",
            group,
            record.name,
            actor,
            tombstoned.len()
        );
        Ok(())
    }

    pub async fn search_groups(&self, actor: UserId, query: &str) -> Result<Vec<GroupId>> {
        self.check_user(actor)?;
        let mut ids = self.index.search_groups(query)?;
        // The index is eventually consistent; never surface deleted groups.
        ids.retain(|id| self.registry.get_group(*id).is_ok());
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    pub async fn add_member(&self, actor: UserId, group: GroupId, target: UserId) -> Result<()> {
        self.check_user(actor)?;
        self.check_user(target)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "add member").await?;
        let actor_role = self.registry.role_of(group, actor);
        let allowed = actor_role == Some(Role::Owner)
            || (self.config.open_membership && actor_role.is_some());
        if !allowed {
            return Err(EngineError::NotAuthorized {
                actor,
                action: "add members to this group",
            });
        }
        self.registry.add_member(group, target, Utc::now())?;
        log::debug!("user {target} added to group {group} by {actor}");
        Ok(())
    }

    /// Owner may remove anyone but the owner; anyone may remove themselves
    /// (self-leave). Removing the owner is always `CannotRemoveOwner`.
    pub async fn remove_member(
        &self,
        actor: UserId,
        group: GroupId,
        target: UserId,
    ) -> Result<()> {
        self.check_user(actor)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "remove member").await?;
        let allowed = actor == target || self.registry.role_of(group, actor) == Some(Role::Owner);
        if !allowed {
            return Err(EngineError::NotAuthorized {
                actor,
                action: "remove members from this group",
            });
        }
        self.registry.remove_member(group, target)?;
        log::debug!("user {target} removed from group {group} by {actor}");
        Ok(())
    }

    pub async fn list_members(&self, actor: UserId, group: GroupId) -> Result<Vec<MemberEntry>> {
        self.check_user(actor)?;
        Ok(self.registry.list_members(group)?)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub async fn post_message(
        &self,
        actor: UserId,
        group: GroupId,
        body: &str,
    ) -> Result<Message> {
        self.check_user(actor)?;
        self.validate_body(body)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "post message").await?;
        self.require_member(group, actor, "post messages to this group")?;
        let message = self.store.post(group, actor, body, Utc::now())?;
        self.emit(IndexEvent::UpsertMessage {
            id: message.id,
            body: message.body.clone(),
        })
        .await;
        Ok(message)
    }

    pub async fn get_message(&self, actor: UserId, group: GroupId, seq: Seq) -> Result<Message> {
        self.check_user(actor)?;
        self.require_member(group, actor, "view messages in this group")?;
        Ok(self.store.get(group, seq)?)
    }

    /// Non-deleted messages after `cursor` (exclusive), sequence ascending.
    /// `limit` must be positive and is clamped to `MAX_PAGE_SIZE`.
    pub async fn list_messages(
        &self,
        actor: UserId,
        group: GroupId,
        cursor: Option<Seq>,
        limit: usize,
    ) -> Result<Page> {
        self.check_user(actor)?;
        if limit == 0 {
            return Err(EngineError::InvalidInput {
                field: "limit",
                reason: "must be positive".into(),
            });
        }
        self.require_member(group, actor, "view messages in this group")?;
        Ok(self.store.list(group, cursor, limit.min(MAX_PAGE_SIZE))?)
    }

    /// Edit a message body. Authorship governs: by default the author may
    /// edit even after leaving the group; `edit_requires_membership` adds a
    /// current-membership requirement.
    pub async fn edit_message(
        &self,
        actor: UserId,
        group: GroupId,
        seq: Seq,
        new_body: &str,
    ) -> Result<Message> {
        self.check_user(actor)?;
        self.validate_body(new_body)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "edit message").await?;
        let current = self.store.get(group, seq)?;
        if current.author != actor {
            return Err(EngineError::NotAuthorized {
                actor,
                action: "edit this message",
            });
        }
        if self.config.edit_requires_membership && !self.registry.is_member(group, actor) {
            return Err(EngineError::NotAuthorized {
                actor,
                action: "edit this message",
            });
        }
        let edited = self.store.edit(group, seq, new_body, Utc::now())?;
        self.emit(IndexEvent::UpsertMessage {
            id: edited.id,
            body: edited.body.clone(),
        })
        .await;
        Ok(edited)
    }

    /// Tombstone a message. Allowed for the author (policy-gated like edit)
    /// and for the group owner.
    pub async fn delete_message(&self, actor: UserId, group: GroupId, seq: Seq) -> Result<()> {
        self.check_user(actor)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "delete message").await?;
        let current = self.store.get(group, seq)?;
        let is_owner = self.registry.role_of(group, actor) == Some(Role::Owner);
        let author_allowed = current.author == actor
            && (!self.config.edit_requires_membership || self.registry.is_member(group, actor));
        if !author_allowed && !is_owner {
            return Err(EngineError::NotAuthorized {
                actor,
                action: "delete this message",
            });
        }
        self.store.tombstone(group, seq)?;
        // Ledger entries survive the tombstone; only the search doc goes.
        self.emit(IndexEvent::Remove(DocId::Message(current.id))).await;
        Ok(())
    }

    pub async fn search_messages(
        &self,
        actor: UserId,
        group: GroupId,
        query: &str,
    ) -> Result<Vec<MessageId>> {
        self.check_user(actor)?;
        self.require_member(group, actor, "search messages in this group")?;
        let mut ids = self.index.search_messages(group, query)?;
        // The index is eventually consistent; never surface tombstones.
        ids.retain(|id| self.store.get(id.group, id.seq).is_ok());
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Likes
    // -----------------------------------------------------------------------

    /// Like a message. Requires current membership and a live message; the
    /// second like by the same user is `AlreadyLiked`, never a double count.
    pub async fn like(&self, actor: UserId, group: GroupId, seq: Seq) -> Result<()> {
        self.check_user(actor)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "like message").await?;
        self.require_member(group, actor, "like messages in this group")?;
        let message = self.store.get(group, seq)?;
        if !self.config.allow_self_like && message.author == actor {
            return Err(EngineError::CannotLikeOwn {
                message: message.id,
                user: actor,
            });
        }
        self.likes.like(message.id, actor, Utc::now())?;
        Ok(())
    }

    /// Remove a like. Works on tombstoned messages too — the ledger entry
    /// outlives the message so prior references stay resolvable.
    pub async fn unlike(&self, actor: UserId, group: GroupId, seq: Seq) -> Result<()> {
        self.check_user(actor)?;
        self.registry.get_group(group)?;
        let _guard = self.lock_live_group(group, "unlike message").await?;
        self.require_member(group, actor, "unlike messages in this group")?;
        let message = self.store.get_any(group, seq)?;
        self.likes.unlike(message.id, actor)?;
        Ok(())
    }

    pub async fn count_likes(&self, actor: UserId, group: GroupId, seq: Seq) -> Result<u64> {
        self.check_user(actor)?;
        self.require_member(group, actor, "view likes in this group")?;
        let message = self.store.get_any(group, seq)?;
        Ok(self.likes.count(message.id))
    }

    pub async fn has_liked(&self, actor: UserId, group: GroupId, seq: Seq) -> Result<bool> {
        self.check_user(actor)?;
        self.require_member(group, actor, "view likes in this group")?;
        let message = self.store.get_any(group, seq)?;
        Ok(self.likes.has_liked(message.id, actor))
    }

    // -----------------------------------------------------------------------
    // Index recovery
    // -----------------------------------------------------------------------

    /// Rebuild the search index from scratch by replaying every live group
    /// and non-deleted message. The recovery path after indexing failures
    /// or a restart.
    pub async fn rebuild_search_index(&self) -> Result<()> {
        let groups = self.registry.group_names();
        let mut messages = Vec::new();
        for (id, _) in &groups {
            for m in self.store.live_messages(*id) {
                messages.push((m.id, m.body));
            }
        }
        let group_count = groups.len();
        let message_count = messages.len();
        self.index.rebuild(groups, messages)?;
        log::info!("search index rebuilt: {group_count} groups, {message_count} messages");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
