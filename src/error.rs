/// Engine error taxonomy.
///
/// Component errors (`MembershipError`, `MessageError`, `LikeError`,
/// `SearchError`) aggregate into `EngineError` via `#[from]`. Every variant
/// carries the offending entity, and `kind()` flattens the whole tree into
/// the transport-facing `ErrorKind` so the HTTP layer can map a precise
/// status without re-deriving intent.
use serde::Serialize;
use thiserror::Error;

use crate::ids::{MessageId, UserId};
use crate::like::LikeError;
use crate::membership::MembershipError;
use crate::message::MessageError;
use crate::search::SearchError;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Flat error classification for the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    NotAuthorized,
    AlreadyExists,
    AlreadyMember,
    AlreadyLiked,
    CannotRemoveOwner,
    Timeout,
    Unavailable,
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        field: &'static str,
        reason: String,
    },

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("user account is deactivated: {0}")]
    UserInactive(UserId),

    #[error("user {actor} is not authorized to {action}")]
    NotAuthorized {
        actor: UserId,
        action: &'static str,
    },

    #[error("user {user} cannot like their own message {message}")]
    CannotLikeOwn { message: MessageId, user: UserId },

    #[error("operation timed out: {op}")]
    Timeout { op: &'static str },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Like(#[from] LikeError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

impl EngineError {
    /// Flatten to the transport-facing classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput { .. } => ErrorKind::InvalidInput,
            EngineError::UserNotFound(_) => ErrorKind::NotFound,
            EngineError::UserInactive(_) => ErrorKind::NotAuthorized,
            EngineError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            EngineError::CannotLikeOwn { .. } => ErrorKind::InvalidInput,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::Membership(e) => match e {
                MembershipError::GroupNotFound(_) => ErrorKind::NotFound,
                MembershipError::NameTaken(_) => ErrorKind::AlreadyExists,
                MembershipError::AlreadyMember { .. } => ErrorKind::AlreadyMember,
                MembershipError::MemberNotFound { .. } => ErrorKind::NotFound,
                MembershipError::CannotRemoveOwner { .. } => ErrorKind::CannotRemoveOwner,
            },
            EngineError::Message(e) => match e {
                MessageError::GroupNotFound(_) => ErrorKind::NotFound,
                MessageError::NotFound(_) => ErrorKind::NotFound,
            },
            EngineError::Like(e) => match e {
                LikeError::AlreadyLiked { .. } => ErrorKind::AlreadyLiked,
                LikeError::NotLiked { .. } => ErrorKind::NotFound,
            },
            EngineError::Search(SearchError::Unavailable(_)) => ErrorKind::Unavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GroupId;

    #[test]
    fn kinds_flatten_component_errors() {
        let group = GroupId::new();
        let user = UserId::new();
        let message = MessageId::new(group, 1);

        let cases: Vec<(EngineError, ErrorKind)> = vec![
            (
                MembershipError::NameTaken("eng".into()).into(),
                ErrorKind::AlreadyExists,
            ),
            (
                MembershipError::AlreadyMember { group, user }.into(),
                ErrorKind::AlreadyMember,
            ),
            (
                MembershipError::CannotRemoveOwner { group, user }.into(),
                ErrorKind::CannotRemoveOwner,
            ),
            (MessageError::NotFound(message).into(), ErrorKind::NotFound),
            (
                LikeError::AlreadyLiked { message, user }.into(),
                ErrorKind::AlreadyLiked,
            ),
            (LikeError::NotLiked { message, user }.into(), ErrorKind::NotFound),
            (EngineError::Timeout { op: "post" }, ErrorKind::Timeout),
            (
                EngineError::CannotLikeOwn { message, user },
                ErrorKind::InvalidInput,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn messages_name_the_offending_entity() {
        let user = UserId::new();
        let err = EngineError::NotAuthorized {
            actor: user,
            action: "delete group",
        };
        assert!(err.to_string().contains(&user.to_string()));
    }
}
