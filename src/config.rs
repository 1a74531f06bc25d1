/// Engine configuration and guardrail constants.
///
/// Policy switches (membership openness, edit policy, self-likes) and
/// resource bounds (body length, page size, operation timeout, index retry
/// budget) live here so the embedding application can tune them without
/// touching engine code.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Max message body length unless overridden.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 500;

/// Max group name length unless overridden.
pub const DEFAULT_MAX_GROUP_NAME_LEN: usize = 64;

/// Largest page a single `list_messages` call will return; larger requested
/// limits are clamped, not rejected.
pub const MAX_PAGE_SIZE: usize = 100;

/// Upper bound on how long any single engine operation may wait on storage
/// before the caller sees `Timeout`.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between retries of a failed search-index update.
pub const DEFAULT_INDEX_RETRY_DELAY: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// IndexMode
// ---------------------------------------------------------------------------

/// How search-index updates are applied relative to the primary mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Updates flow through a background writer task; a just-posted message
    /// may briefly not be searchable (bounded by the retry budget).
    Background,
    /// Updates are applied before the operation returns. Read-your-writes
    /// search at the cost of indexing latency on the primary path.
    Inline,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Tunable engine policy. `Default` is the conservative setting: closed
/// membership, no self-likes, background indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When true, any member may add new members; otherwise only the owner.
    pub open_membership: bool,
    /// Max message body length in characters.
    pub max_message_len: usize,
    /// Max group name length in characters.
    pub max_group_name_len: usize,
    /// When true, editing/deleting your own message also requires current
    /// membership in the group. Default: authorship alone is enough.
    pub edit_requires_membership: bool,
    /// When true, authors may like their own messages.
    pub allow_self_like: bool,
    /// How index updates are applied.
    pub index_mode: IndexMode,
    /// Bounded wait for any single storage operation.
    pub op_timeout: Duration,
    /// How many times a failed index update is retried before being dropped.
    pub index_retry_limit: u32,
    /// Delay between index update retries.
    pub index_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            open_membership: false,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_group_name_len: DEFAULT_MAX_GROUP_NAME_LEN,
            edit_requires_membership: false,
            allow_self_like: false,
            index_mode: IndexMode::Background,
            op_timeout: DEFAULT_OP_TIMEOUT,
            index_retry_limit: 3,
            index_retry_delay: DEFAULT_INDEX_RETRY_DELAY,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
