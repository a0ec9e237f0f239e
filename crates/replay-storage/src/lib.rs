//! Pluggable historical event storage: the contract every backend
//! implements, plus a Postgres reference adapter.

pub mod contract;
pub mod error;
pub mod postgres;

pub use contract::{EventStream, RangeResult, StorageAdapter};
pub use error::StorageError;
pub use postgres::PostgresStorage;

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_registry::InMemorySensorRegistry;
    use tokio_util::sync::CancellationToken;

    fn empty_registry() -> InMemorySensorRegistry {
        InMemorySensorRegistry::parse("pump-1\npump-2\n").unwrap()
    }

    #[tokio::test]
    async fn warmup_rejects_empty_sensor_set() {
        // No live pool is needed: the empty-set check runs before any query.
        let registry = empty_registry();
        let pool = sqlx::pool::PoolOptions::<sqlx::Postgres>::new()
            .min_connections(0)
            .max_connections(1)
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool construction never touches the network");
        let storage = PostgresStorage::new(pool, registry);
        let cancel = CancellationToken::new();
        let err = storage.warmup(&[], 0, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::EmptySensorSet));
    }

    #[tokio::test]
    async fn warmup_rejects_unknown_sensor() {
        let registry = empty_registry();
        let pool = sqlx::pool::PoolOptions::<sqlx::Postgres>::new()
            .min_connections(0)
            .max_connections(1)
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool construction never touches the network");
        let storage = PostgresStorage::new(pool, registry);
        let cancel = CancellationToken::new();
        let err = storage.warmup(&[999], 0, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownSensor(999)));
    }
}
