use thiserror::Error;

/// Errors reported by store operations.
///
/// Reads never fail: missing keys and unreachable detached paths read as
/// [`Value::Undefined`](crate::Value::Undefined). Writes fail when they cannot
/// be applied to the container they target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Only plain records and plain sequences can become reactive stores.
    #[error("expected a record or a sequence, got {found}")]
    NotAContainer { found: &'static str },

    /// A sequence only accepts numeric indices and `length`.
    #[error("invalid key `{key}` for a sequence")]
    InvalidKey { key: String },

    /// Computed properties have no setter.
    #[error("`{key}` is a computed property and cannot be written")]
    ReadOnly { key: String },

    /// The container was replaced and its original path no longer exists.
    #[error("container at `{path}` was detached and its path is gone")]
    Detached { path: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
