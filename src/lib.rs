//! # Huddle Core
//!
//! **The group-messaging and membership engine behind Huddle.**
//!
//! Huddle Core is a standalone backend library: users join groups, post,
//! edit, and delete messages, like and unlike them, and search groups and
//! messages. The transport layer (HTTP routing, sessions, login, password
//! handling) lives in the embedding application and talks to this crate
//! through [`MessagingEngine`]; the engine enforces who may see, post, and
//! modify what, keeps message ordering and like counts consistent under
//! concurrent access, and maintains a rebuildable search index.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use huddle_core::{EngineConfig, InMemoryDirectory, MessagingEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), huddle_core::EngineError> {
//! let directory = Arc::new(InMemoryDirectory::new());
//! let alice = directory.register("alice");
//! let bob = directory.register("bob");
//!
//! let engine = MessagingEngine::new(directory, EngineConfig::default());
//! let group = engine.create_group(alice, "eng").await?.id;
//! engine.add_member(alice, group, bob).await?;
//! let message = engine.post_message(bob, group, "hello").await?;
//! engine.like(alice, group, message.id.seq).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`directory`] | Identity directory contract — does a user exist, is the account active |
//! | [`membership`] | Groups, members, and roles; owner/member authorization facts |
//! | [`message`] | Per-group message arenas, sequence numbers, tombstone deletes |
//! | [`like`] | Who liked what, with O(1) counts |
//! | [`search`] | Derived, rebuildable text index over groups and messages |
//! | [`engine`] | The orchestrator: authorization, atomicity, index updates |
//!
//! Errors carry a flat [`ErrorKind`] so the transport layer can map each
//! failure to a precise response without re-deriving intent.

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod ids;
pub mod like;
pub mod membership;
pub mod message;
pub mod search;

pub use config::{EngineConfig, IndexMode};
pub use directory::{IdentityDirectory, InMemoryDirectory};
pub use engine::MessagingEngine;
pub use error::{EngineError, ErrorKind};
pub use ids::{GroupId, MessageId, Seq, UserId};
pub use membership::{GroupRecord, GroupSummary, MemberEntry, Role};
pub use message::{Message, Page};
pub use search::{InMemorySearchIndex, SearchIndex};
