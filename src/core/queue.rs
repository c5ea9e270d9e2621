use keyed_priority_queue::KeyedPriorityQueue;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

use crate::core::error::SimError;
use crate::core::sim::SimEvent;

/// Virtual simulation time. Non-negative, monotone non-decreasing.
pub type SimTime = f64;

/// Priority band of a scheduled event. At equal times, numerically larger
/// priorities fire first.
pub type EventPrio = i32;

/// Job arrivals fire before anything else scheduled at the same instant.
pub const PRIO_ARRIVAL: EventPrio = 100;
pub const PRIO_NORMAL: EventPrio = 0;
/// Machine departures fire after everything else at the same instant.
pub const PRIO_DEPART: EventPrio = -100;
/// The horizon-stop event yields to every same-time event.
pub const PRIO_HORIZON: EventPrio = EventPrio::MIN;

/// Handle returned by [`EventQueue::schedule`]; doubles as the FIFO
/// insertion sequence for tie-breaking.
pub type EventId = u64;

/// Heap key ordering events by (time, priority, insertion order).
// KeyedPriorityQueue is a max-heap, so Ord ranks the event that must fire
// first as the greatest.
#[derive(Debug, Clone, Copy)]
struct QueueKey {
    time: SimTime,
    prio: EventPrio,
    seq: EventId,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .reverse()
            .then_with(|| self.prio.cmp(&other.prio))
            .then_with(|| self.seq.cmp(&other.seq).reverse())
    }
}

/// The pending-event set and the simulation clock.
///
/// Events are min-ordered by (time ascending, priority band, FIFO insertion
/// order). Popping an event advances the clock to its time; the clock never
/// moves backward.
pub struct EventQueue {
    heap: KeyedPriorityQueue<EventId, QueueKey>,
    payloads: FxHashMap<EventId, SimEvent>,
    next_id: EventId,
    now: SimTime,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.heap.len())
            .field("now", &self.now)
            .finish()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            heap: KeyedPriorityQueue::new(),
            payloads: FxHashMap::default(),
            next_id: 0,
            now: 0.0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `event` at `time` within priority band `prio` and returns a
    /// cancellation handle. Scheduling into the past is an error.
    pub fn schedule(
        &mut self,
        time: SimTime,
        prio: EventPrio,
        event: SimEvent,
    ) -> Result<EventId, SimError> {
        if time < self.now {
            return Err(SimError::PastEvent {
                event_time: time,
                now: self.now,
            });
        }

        let id = self.next_id;
        self.next_id += 1;

        self.heap.push(
            id,
            QueueKey {
                time,
                prio,
                seq: id,
            },
        );
        self.payloads.insert(id, event);
        Ok(id)
    }

    /// Removes a scheduled event by handle. A handle that was already popped
    /// or cancelled is silently ignored.
    pub fn cancel(&mut self, id: EventId) {
        self.heap.remove(&id);
        self.payloads.remove(&id);
    }

    /// Pops the next event and advances the clock to its time.
    pub fn pop(&mut self) -> Option<(SimTime, SimEvent)> {
        let (id, key) = self.heap.pop()?;
        debug_assert!(key.time >= self.now, "clock must not move backward");
        self.now = key.time;

        let payload = self
            .payloads
            .remove(&id)
            .expect("popped event missing payload");
        Some((key.time, payload))
    }

    /// Time of the next pending event, if any.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|(_, key)| key.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::workstation::StationId;

    fn probe(station: StationId) -> SimEvent {
        SimEvent::Departure {
            station,
            machine: 0,
        }
    }

    #[test]
    fn pops_in_time_order() {
        let mut q = EventQueue::new();
        q.schedule(2.0, PRIO_NORMAL, probe(2)).unwrap();
        q.schedule(1.0, PRIO_NORMAL, probe(1)).unwrap();
        q.schedule(3.0, PRIO_NORMAL, probe(3)).unwrap();

        let order: Vec<SimTime> = std::iter::from_fn(|| q.pop()).map(|(t, _)| t).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
        assert_eq!(q.now(), 3.0);
    }

    #[test]
    fn same_time_orders_by_priority_band() {
        let mut q = EventQueue::new();
        q.schedule(1.0, PRIO_DEPART, probe(0)).unwrap();
        q.schedule(1.0, PRIO_ARRIVAL, probe(1)).unwrap();
        q.schedule(1.0, PRIO_NORMAL, probe(2)).unwrap();

        let order: Vec<StationId> = std::iter::from_fn(|| q.pop())
            .map(|(_, ev)| match ev {
                SimEvent::Departure { station, .. } => station,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn equal_time_and_priority_is_fifo() {
        let mut q = EventQueue::new();
        for station in 0..5 {
            q.schedule(1.0, PRIO_NORMAL, probe(station)).unwrap();
        }

        let order: Vec<StationId> = std::iter::from_fn(|| q.pop())
            .map(|(_, ev)| match ev {
                SimEvent::Departure { station, .. } => station,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn scheduling_into_the_past_fails() {
        let mut q = EventQueue::new();
        q.schedule(5.0, PRIO_NORMAL, probe(0)).unwrap();
        q.pop().unwrap();

        let err = q.schedule(4.0, PRIO_NORMAL, probe(1)).unwrap_err();
        assert!(matches!(err, SimError::PastEvent { .. }));
    }

    #[test]
    fn cancelled_event_never_fires() {
        let mut q = EventQueue::new();
        let keep = q.schedule(1.0, PRIO_NORMAL, probe(0)).unwrap();
        let drop = q.schedule(2.0, PRIO_NORMAL, probe(1)).unwrap();
        q.cancel(drop);
        // cancelling twice is a no-op
        q.cancel(drop);

        assert_eq!(q.len(), 1);
        let (t, _) = q.pop().unwrap();
        assert_eq!(t, 1.0);
        assert!(q.pop().is_none());
        let _ = keep;
    }
}
