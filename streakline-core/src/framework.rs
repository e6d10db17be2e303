use sqlx::PgPool;

/// Executes the query messages defined in the `entities` modules against
/// a Postgres pool.
///
/// All storage contracts (`store::EventStore` and friends) are implemented
/// for this type, so processors that are generic over the store traits can
/// run against Postgres in production and against
/// [`store::memory::MemoryStore`](crate::store::memory::MemoryStore) in tests.
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
