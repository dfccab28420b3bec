//! Canonical identity keys for mention targets.

/// Who a mention points at, as far as the transport could tell.
///
/// A numeric account id is authoritative when present; a bare handle is all
/// we have when the platform never resolved the mention to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityHint {
    Account { id: i64, username: Option<String> },
    Handle(String),
}

impl IdentityHint {
    /// The join key stored in `mention_counts.identity`.
    ///
    /// Handles are lowercased so case variants collapse into one entry.
    /// An `id:` entry and a `handle:` entry never merge, even when the
    /// handle matches the account's username lexically; a handle-only
    /// mention followed later by a resolved mention of the same person
    /// counts under two separate identities.
    pub fn canonical(&self) -> String {
        match self {
            IdentityHint::Account { id, .. } => format!("id:{}", id),
            IdentityHint::Handle(handle) => format!("handle:{}", handle.to_lowercase()),
        }
    }

    pub fn account_id(&self) -> Option<i64> {
        match self {
            IdentityHint::Account { id, .. } => Some(*id),
            IdentityHint::Handle(_) => None,
        }
    }

    /// Lowercased handle for the `target_handle` column, when known.
    pub fn handle_lower(&self) -> Option<String> {
        match self {
            IdentityHint::Account { username, .. } => {
                username.as_deref().map(|u| u.to_lowercase())
            }
            IdentityHint::Handle(handle) => Some(handle.to_lowercase()),
        }
    }
}
