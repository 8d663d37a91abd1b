//! Token store backends. The contract lives in `intake_auth::TokenStore`.

pub mod in_memory;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryTokenStore;
pub use postgres::PostgresTokenStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisTokenStore;
