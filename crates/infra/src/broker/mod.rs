//! Message broker transports.
//!
//! The in-process broker lives in `intake_events::InMemoryMessageBus`; this
//! module holds the networked ones.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBus, RedisStreamsConfig, RedisStreamsError};
