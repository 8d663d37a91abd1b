//! Message broker abstraction (mechanics only).
//!
//! The bus is the only thing the ingestion producer and consumer share. It makes
//! minimal assumptions:
//!
//! - **Queue semantics**: every published message goes to one live subscriber
//!   (competing consumers), not to all of them.
//! - **At-least-once delivery**: a message may be delivered again if it was not
//!   acknowledged; consumers must tolerate duplicates.
//! - **No ordering across publishers**: whatever the transport provides, nothing more.
//!
//! Acknowledgement is explicit. A consumer acks only after its side effect
//! succeeded, so a crash in between leads to redelivery rather than loss.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;

/// Broker-assigned handle for one delivery, used to ack or dead-letter it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message as handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<M> {
    pub tag: DeliveryTag,
    pub payload: M,
    /// 1 on first delivery, incremented by brokers that track redelivery.
    pub attempt: u32,
}

impl<M> Delivery<M> {
    pub fn new(tag: DeliveryTag, payload: M) -> Self {
        Self {
            tag,
            payload,
            attempt: 1,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The broker could not be reached or refused the operation.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Internal lock poisoning (in-process brokers).
    #[error("broker state poisoned")]
    Poisoned,

    /// The broker was shut down.
    #[error("broker closed")]
    Closed,
}

/// A subscription to a queue.
///
/// Designed for single-threaded consumption; start several subscriptions to
/// run several consumers.
///
/// ```ignore
/// let sub = bus.subscribe()?;
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(delivery) => handle(delivery),
///         Err(RecvTimeoutError::Timeout) => continue,       // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,     // bus gone
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<Delivery<M>>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<Delivery<M>>) -> Self {
        Self { receiver }
    }

    /// Block until the next delivery is available.
    pub fn recv(&self) -> Result<Delivery<M>, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delivery without blocking.
    pub fn try_recv(&self) -> Result<Delivery<M>, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a delivery.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Delivery<M>, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic queue.
///
/// ```text
/// API handler → publish → [broker] → Subscription → consumer → ack / dead_letter / release
/// ```
///
/// `publish` returning `Ok` means the broker accepted the message, not that
/// anything downstream has happened. Implementations must be `Send + Sync`;
/// publishers on many threads may share one bus.
pub trait MessageBus<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self) -> Result<Subscription<M>, BusError>;

    /// Mark a delivery as done; the broker will not redeliver it.
    fn ack(&self, tag: &DeliveryTag) -> Result<(), BusError>;

    /// Park a delivery that can never succeed and stop redelivering it.
    fn dead_letter(&self, tag: &DeliveryTag, reason: &str) -> Result<(), BusError>;

    /// Give up on a delivery for now without acking it.
    ///
    /// Brokers that redeliver make it eligible for another consumer; brokers
    /// that cannot redeliver simply stop tracking it.
    fn release(&self, tag: &DeliveryTag) -> Result<(), BusError>;
}

impl<M, B> MessageBus<M> for Arc<B>
where
    B: MessageBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Result<Subscription<M>, BusError> {
        (**self).subscribe()
    }

    fn ack(&self, tag: &DeliveryTag) -> Result<(), BusError> {
        (**self).ack(tag)
    }

    fn dead_letter(&self, tag: &DeliveryTag, reason: &str) -> Result<(), BusError> {
        (**self).dead_letter(tag, reason)
    }

    fn release(&self, tag: &DeliveryTag) -> Result<(), BusError> {
        (**self).release(tag)
    }
}
