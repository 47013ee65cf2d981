//! Typed configuration errors.

use std::fmt;

/// Errors surfaced from [`BoundedLog::new`](crate::BoundedLog::new).
///
/// Construction is the only fallible operation in this crate; everything
/// past a successful `new` either succeeds or is absorbed (see the append
/// contract on [`BoundedLog`](crate::BoundedLog)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A memory threshold of zero would force a rotation on every append.
    ZeroMemoryThreshold,
    /// The history ring needs at least two slots so a freshly frozen list
    /// and the oldest retained list can coexist.
    HistoryTooShort {
        /// The capacity that was requested.
        capacity: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroMemoryThreshold => {
                write!(f, "memory threshold must be greater than zero")
            }
            ConfigError::HistoryTooShort { capacity } => {
                write!(
                    f,
                    "history capacity {} is below the minimum of 2",
                    capacity
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}
