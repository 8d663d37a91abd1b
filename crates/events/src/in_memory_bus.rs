//! In-memory message bus for tests/dev.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, mpsc};

use crate::bus::{BusError, Delivery, DeliveryTag, MessageBus, Subscription};

/// Dead letters kept for inspection; older ones are dropped.
pub const RECENT_DEAD_LETTERS: usize = 64;

/// In-process queue.
///
/// - No IO / no async
/// - Round-robin across live subscribers (competing consumers)
/// - Messages published with no subscriber attached wait in a backlog
/// - Acks, dead letters and releases are counted; only the most recent dead
///   letters are kept verbatim
///
/// Deliveries sitting in a dropped subscriber's channel are lost, and a
/// released delivery is forgotten: there is no redelivery here.
#[derive(Debug)]
pub struct InMemoryMessageBus<M> {
    state: Mutex<State<M>>,
}

#[derive(Debug)]
struct State<M> {
    subscribers: Vec<mpsc::Sender<Delivery<M>>>,
    next_subscriber: usize,
    backlog: VecDeque<Delivery<M>>,
    next_tag: u64,
    in_flight: HashSet<DeliveryTag>,
    totals: BusTotals,
    recent_dead_letters: VecDeque<(DeliveryTag, String)>,
    closed: bool,
}

/// Running totals of settled deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusTotals {
    pub acked: u64,
    pub dead_lettered: u64,
    pub released: u64,
}

impl<M> Default for State<M> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            next_subscriber: 0,
            backlog: VecDeque::new(),
            next_tag: 1,
            in_flight: HashSet::new(),
            totals: BusTotals::default(),
            recent_dead_letters: VecDeque::with_capacity(RECENT_DEAD_LETTERS),
            closed: false,
        }
    }
}

impl<M> State<M> {
    fn dispatch(&mut self, mut delivery: Delivery<M>) {
        while !self.subscribers.is_empty() {
            let idx = self.next_subscriber % self.subscribers.len();
            match self.subscribers[idx].send(delivery) {
                Ok(()) => {
                    self.next_subscriber = idx + 1;
                    return;
                }
                Err(mpsc::SendError(back)) => {
                    // Receiver dropped; forget it and try the next one.
                    self.subscribers.remove(idx);
                    delivery = back;
                }
            }
        }
        self.backlog.push_back(delivery);
    }
}

impl<M> InMemoryMessageBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnect every subscriber and refuse further publishes.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.subscribers.clear();
        }
    }

    pub fn totals(&self) -> BusTotals {
        self.state.lock().map(|s| s.totals).unwrap_or_default()
    }

    /// Up to `RECENT_DEAD_LETTERS` tags with their reasons, oldest first.
    pub fn recent_dead_letters(&self) -> Vec<(DeliveryTag, String)> {
        self.state
            .lock()
            .map(|s| s.recent_dead_letters.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of published messages not yet acked, dead-lettered or released.
    pub fn unacknowledged(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Messages waiting for a subscriber.
    pub fn backlog_len(&self) -> usize {
        self.state.lock().map(|s| s.backlog.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryMessageBus<M> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl<M> MessageBus<M> for InMemoryMessageBus<M>
where
    M: Send + 'static,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        if state.closed {
            return Err(BusError::Closed);
        }

        let tag = DeliveryTag::new(state.next_tag.to_string());
        state.next_tag += 1;
        state.in_flight.insert(tag.clone());
        state.dispatch(Delivery::new(tag, message));
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription<M>, BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        if state.closed {
            return Err(BusError::Closed);
        }

        let (tx, rx) = mpsc::channel();
        state.subscribers.push(tx);

        // Hand anything published before the first subscriber showed up.
        let waiting: Vec<_> = state.backlog.drain(..).collect();
        for delivery in waiting {
            state.dispatch(delivery);
        }

        Ok(Subscription::new(rx))
    }

    fn ack(&self, tag: &DeliveryTag) -> Result<(), BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        if state.in_flight.remove(tag) {
            state.totals.acked += 1;
        }
        Ok(())
    }

    fn dead_letter(&self, tag: &DeliveryTag, reason: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        if state.in_flight.remove(tag) {
            state.totals.dead_lettered += 1;
            if state.recent_dead_letters.len() == RECENT_DEAD_LETTERS {
                state.recent_dead_letters.pop_front();
            }
            state
                .recent_dead_letters
                .push_back((tag.clone(), reason.to_string()));
        }
        Ok(())
    }

    fn release(&self, tag: &DeliveryTag) -> Result<(), BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        if state.in_flight.remove(tag) {
            state.totals.released += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn publish_before_subscribe_is_retained() {
        let bus = InMemoryMessageBus::new();
        bus.publish("a".to_string()).unwrap();
        assert_eq!(bus.backlog_len(), 1);

        let sub = bus.subscribe().unwrap();
        let d = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(d.payload, "a");
        assert_eq!(d.attempt, 1);
        assert_eq!(bus.backlog_len(), 0);
    }

    #[test]
    fn each_message_goes_to_one_subscriber() {
        let bus = InMemoryMessageBus::new();
        let s1 = bus.subscribe().unwrap();
        let s2 = bus.subscribe().unwrap();

        bus.publish(1u32).unwrap();
        bus.publish(2u32).unwrap();

        let a = s1.recv_timeout(WAIT).unwrap().payload;
        let b = s2.recv_timeout(WAIT).unwrap().payload;
        assert_eq!((a, b), (1, 2));
        assert!(s1.try_recv().is_err());
        assert!(s2.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriber_is_skipped() {
        let bus = InMemoryMessageBus::new();
        let gone = bus.subscribe().unwrap();
        let live = bus.subscribe().unwrap();
        drop(gone);

        bus.publish(7u8).unwrap();
        assert_eq!(live.recv_timeout(WAIT).unwrap().payload, 7);
    }

    #[test]
    fn ack_dead_letter_and_release_settle_deliveries() {
        let bus = InMemoryMessageBus::new();
        let sub = bus.subscribe().unwrap();
        bus.publish("ok").unwrap();
        bus.publish("bad").unwrap();
        bus.publish("retry").unwrap();

        let ok = sub.recv_timeout(WAIT).unwrap();
        let bad = sub.recv_timeout(WAIT).unwrap();
        let retry = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(bus.unacknowledged(), 3);

        bus.ack(&ok.tag).unwrap();
        bus.dead_letter(&bad.tag, "garbage").unwrap();
        bus.release(&retry.tag).unwrap();
        // Settling twice is a no-op.
        bus.ack(&ok.tag).unwrap();

        assert_eq!(
            bus.totals(),
            BusTotals {
                acked: 1,
                dead_lettered: 1,
                released: 1,
            }
        );
        assert_eq!(bus.recent_dead_letters(), vec![(bad.tag, "garbage".to_string())]);
        assert_eq!(bus.unacknowledged(), 0);
    }

    #[test]
    fn long_running_bus_keeps_bounded_bookkeeping() {
        let bus = InMemoryMessageBus::new();
        let sub = bus.subscribe().unwrap();

        for i in 0..10_000u32 {
            bus.publish(i).unwrap();
            let d = sub.recv_timeout(WAIT).unwrap();
            match i % 3 {
                0 => bus.ack(&d.tag).unwrap(),
                1 => bus.dead_letter(&d.tag, "bad").unwrap(),
                _ => bus.release(&d.tag).unwrap(),
            }
        }

        assert_eq!(bus.unacknowledged(), 0);
        assert_eq!(bus.recent_dead_letters().len(), RECENT_DEAD_LETTERS);
        let totals = bus.totals();
        assert_eq!(totals.acked + totals.dead_lettered + totals.released, 10_000);
        assert_eq!(
            bus.recent_dead_letters().last().map(|(tag, _)| tag.as_str().to_string()),
            Some("9998".to_string())
        );
    }

    #[test]
    fn close_disconnects_and_rejects_publish() {
        let bus: InMemoryMessageBus<u8> = InMemoryMessageBus::new();
        let sub = bus.subscribe().unwrap();
        bus.close();

        assert_eq!(bus.publish(1), Err(BusError::Closed));
        assert!(matches!(
            sub.recv_timeout(WAIT),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected)
        ));
    }
}
