//! Error types shared by the persistence layer.

use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("watch job {0} not found")]
    NotFound(Uuid),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error while {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbErr,
    },
}

impl RepositoryError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        RepositoryError::Validation(message.into())
    }
}

/// Log a database failure and wrap it with the operation that caused it.
///
/// Unique-constraint violations are reported as [`RepositoryError::Conflict`].
pub fn map_db_err(context: &'static str, err: DbErr) -> RepositoryError {
    if is_unique_violation(&err) {
        tracing::warn!(error = %err, context, "Unique constraint violated");
        return RepositoryError::Conflict(format!("{context}: duplicate entry"));
    }
    tracing::error!(error = ?err, context, "Database operation failed");
    RepositoryError::Database {
        context,
        source: err,
    }
}

/// Whether `error` is a unique-constraint violation on Postgres or SQLite.
pub fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}
