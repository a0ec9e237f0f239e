use thiserror::Error;

/// Errors a storage adapter can return. Mirrors the engine-wide error kinds
/// (`InputError`, `ResolveError`, `StorageError`, `CancelError`) restricted
/// to the subset storage can actually raise.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("empty sensor set")]
    EmptySensorSet,

    #[error("sensor {0} not present in the registry")]
    UnknownSensor(i64),

    #[error("query cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
