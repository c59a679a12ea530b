use std::time::Duration;

use thiserror::Error;

use super::types::{ActionKind, ItemId, Platform};

/// Errors that can arise while running economy operations.
#[derive(Debug, Error)]
pub enum EconomyError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around JSON errors raised while loading seed data.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, seed files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A user, item or configuration entry is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user holds no slot for the requested item.
    #[error("item {item_id} is not in the inventory")]
    NotInInventory { item_id: ItemId },

    /// The selected slot holds less than the requested amount.
    #[error("insufficient quantity of item {item_id}: requested {requested}, available {available}")]
    InsufficientQuantity {
        item_id: ItemId,
        requested: u32,
        available: u32,
    },

    /// The gated action was used too recently.
    #[error("{action} is on cooldown for another {}s", remaining.as_secs())]
    OnCooldown {
        action: ActionKind,
        remaining: Duration,
    },

    /// Malformed platform, username or quantity.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store failed to begin, commit or roll back a transaction.
    #[error("transaction failure: {0}")]
    TransactionFailure(String),

    /// Random targeting found nobody recently active.
    #[error("no active targets available")]
    NoActiveTargets,

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// The caller's cancellation signal fired before any store call was issued.
    #[error("operation cancelled")]
    Cancelled,

    /// The store cannot serialize concurrent writers to the same row.
    #[error("store does not provide per-row serialization: {0}")]
    UnsupportedStore(String),

    /// A required collaborator (loot table) could not produce a result.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// Both sides of a merge carry different identities for one platform.
    #[error("both users hold a {platform} identity")]
    PlatformConflict { platform: Platform },
}

impl EconomyError {
    /// Business errors are returned to the caller for messaging and never retried.
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            EconomyError::NotFound(_)
                | EconomyError::NotInInventory { .. }
                | EconomyError::InsufficientQuantity { .. }
                | EconomyError::OnCooldown { .. }
                | EconomyError::InvalidInput(_)
                | EconomyError::NoActiveTargets
                | EconomyError::PlatformConflict { .. }
        )
    }

    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            EconomyError::TransactionFailure(_) | EconomyError::Sled(_) | EconomyError::Bincode(_)
        )
    }

    /// Remaining cooldown, if this is an `OnCooldown` error.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        match self {
            EconomyError::OnCooldown { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_classified() {
        assert!(EconomyError::NoActiveTargets.is_business_error());
        assert!(EconomyError::NotInInventory { item_id: 3 }.is_business_error());
        assert!(!EconomyError::TransactionFailure("commit".into()).is_business_error());
        assert!(EconomyError::TransactionFailure("commit".into()).is_transaction_failure());
        assert!(!EconomyError::Cancelled.is_business_error());
    }

    #[test]
    fn cooldown_message_reports_seconds() {
        let err = EconomyError::OnCooldown {
            action: ActionKind::Search,
            remaining: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "search is on cooldown for another 42s");
        assert_eq!(err.cooldown_remaining(), Some(Duration::from_secs(42)));
    }
}
