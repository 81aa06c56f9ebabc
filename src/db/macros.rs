//! Database dispatch macros for reducing code duplication.
//!
//! This module provides declarative macros that generate backend-specific
//! match arms while keeping the call sites linear.

use serde::{Deserialize, Serialize};

/// Database backend type for dispatch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Detect the backend from a connection string.
    ///
    /// Anything that is not a `sqlite:` URL is treated as Postgres, which
    /// covers both `postgres://` URLs and keyword/value strings.
    pub fn from_connection_string(connection_string: &str) -> Self {
        if connection_string
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("sqlite:")
        {
            Self::SQLite
        } else {
            Self::Postgres
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Macro for generating database dispatch match arms.
///
/// Works for any enum in `crate::db` whose variants are named after the
/// backends (`Postgres`, `SQLite`), e.g. `DbPool` or `DbTransaction`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("sqlite::memory:"),
            DatabaseType::SQLite
        );
        assert_eq!(
            DatabaseType::from_connection_string("SQLITE://data.db"),
            DatabaseType::SQLite
        );
        assert_eq!(
            DatabaseType::from_connection_string("postgres://localhost/test"),
            DatabaseType::Postgres
        );
        assert_eq!(
            DatabaseType::from_connection_string("host=localhost database=test"),
            DatabaseType::Postgres
        );
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(DatabaseType::Postgres.to_string(), "PostgreSQL");
        assert_eq!(DatabaseType::SQLite.to_string(), "SQLite");
    }
}
