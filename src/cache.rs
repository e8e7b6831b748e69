//! The dataflow cache (C4): per-`(source, attribute)` storage for values in
//! flight between a producing step and the consumers that read them.
//!
//! Measurements are persistent: a write is valid from its step time until
//! the next write, so the cache keeps a short history and serves whichever
//! entry covers a given query time. Events are transient: each is delivered
//! at most once, to whichever step first reaches its `t_event`, then
//! evicted.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::ids::EntityRef;
use crate::time::T;

/// One measurement write, valid from `valid_from` until the next entry's
/// `valid_from`. `valid_from = None` denotes the conceptual `t = -1` seed
/// supplied as `initial_data` on a time-shifted edge — it sorts before every
/// real time and is itself superseded by the first real write.
#[derive(Debug, Clone)]
struct MeasurementEntry {
    valid_from: Option<T>,
    value: Value,
}

fn before(a: Option<T>, b: T) -> bool {
    match a {
        None => true,
        Some(a) => a <= b,
    }
}

#[derive(Debug, Default)]
struct MeasurementHistory {
    entries: VecDeque<MeasurementEntry>,
}

impl MeasurementHistory {
    fn record(&mut self, valid_from: Option<T>, value: Value) {
        self.entries.push_back(MeasurementEntry { valid_from, value });
    }

    /// The value in effect at `t`: the most recent entry with
    /// `valid_from <= t`.
    fn value_at(&self, t: T) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| before(e.valid_from, t))
            .map(|e| &e.value)
    }

    /// Drops history entries no consumer can still need: keeps the latest
    /// entry valid at-or-before `min_consumer_progress`, plus everything
    /// after it.
    fn evict_before(&mut self, min_consumer_progress: T) {
        while self.entries.len() > 1 {
            let second_valid_from = self.entries[1].valid_from;
            if before(second_valid_from, min_consumer_progress) {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
struct EventQueue {
    pending: VecDeque<(T, Value)>,
}

impl EventQueue {
    /// Inserts keeping `pending` sorted ascending by event time (insertion
    /// order broken ties, since events scheduled for the same tick fire in
    /// the order they were raised).
    fn push(&mut self, t_event: T, value: Value) {
        let pos = self
            .pending
            .iter()
            .position(|(t, _)| *t > t_event)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, (t_event, value));
    }

    /// Drains and returns every event with `t_event <= t`, delivering each
    /// at most once.
    fn take_up_to(&mut self, t: T) -> Vec<(T, Value)> {
        let mut taken = Vec::new();
        while let Some((t_event, _)) = self.pending.front() {
            if *t_event <= t {
                taken.push(self.pending.pop_front().unwrap());
            } else {
                break;
            }
        }
        taken
    }

    fn next_time(&self) -> Option<T> {
        self.pending.front().map(|(t, _)| *t)
    }
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Measurement(MeasurementHistory),
    Event(EventQueue),
}

/// The dataflow cache shared by every scheduler task.
#[derive(Debug, Default)]
pub struct DataCache {
    slots: BTreeMap<(EntityRef, String), Slot>,
}

impl DataCache {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Seeds a time-shifted edge's `initial_data`, served at `t = 0` until
    /// the source's first real write.
    pub fn seed_initial(&mut self, src: EntityRef, attr: impl Into<String>, value: Value) {
        let slot = self.slots.entry((src, attr.into())).or_default();
        match slot {
            Slot::Empty => {
                let mut hist = MeasurementHistory::default();
                hist.record(None, value);
                *slot = Slot::Measurement(hist);
            }
            Slot::Measurement(hist) => hist.record(None, value),
            Slot::Event(_) => {
                unreachable!("initial_data seeds a measurement slot, never an event slot")
            }
        }
    }

    pub fn put_measurement(&mut self, src: EntityRef, attr: impl Into<String>, t: T, value: Value) {
        let slot = self.slots.entry((src, attr.into())).or_default();
        match slot {
            Slot::Measurement(hist) => hist.record(Some(t), value),
            Slot::Empty => {
                let mut hist = MeasurementHistory::default();
                hist.record(Some(t), value);
                *slot = Slot::Measurement(hist);
            }
            Slot::Event(_) => panic!("attribute written as both measurement and event"),
        }
    }

    pub fn measurement_at(&self, src: &EntityRef, attr: &str, t: T) -> Option<&Value> {
        match self.slots.get(&(src.clone(), attr.to_string()))? {
            Slot::Measurement(hist) => hist.value_at(t),
            _ => None,
        }
    }

    pub fn evict_measurements_before(
        &mut self,
        src: &EntityRef,
        attr: &str,
        min_consumer_progress: T,
    ) {
        if let Some(Slot::Measurement(hist)) =
            self.slots.get_mut(&(src.clone(), attr.to_string()))
        {
            hist.evict_before(min_consumer_progress);
        }
    }

    pub fn push_event(&mut self, src: EntityRef, attr: impl Into<String>, t_event: T, value: Value) {
        let slot = self.slots.entry((src, attr.into())).or_default();
        match slot {
            Slot::Event(q) => q.push(t_event, value),
            Slot::Empty => {
                let mut q = EventQueue::default();
                q.push(t_event, value);
                *slot = Slot::Event(q);
            }
            Slot::Measurement(_) => panic!("attribute written as both measurement and event"),
        }
    }

    /// Delivers (and evicts) every pending event at-or-before `t`.
    pub fn take_events_up_to(&mut self, src: &EntityRef, attr: &str, t: T) -> Vec<(T, Value)> {
        match self.slots.get_mut(&(src.clone(), attr.to_string())) {
            Some(Slot::Event(q)) => q.take_up_to(t),
            _ => Vec::new(),
        }
    }

    pub fn next_event_time(&self, src: &EntityRef, attr: &str) -> Option<T> {
        match self.slots.get(&(src.clone(), attr.to_string()))? {
            Slot::Event(q) => q.next_time(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EntityId, SimulatorId};

    fn entity(sim: &str, id: &str) -> EntityRef {
        EntityRef::new(
            SimulatorId::new(sim).unwrap(),
            EntityId::new(id).unwrap(),
        )
    }

    #[test]
    fn measurement_value_at_covers_its_interval() {
        let mut cache = DataCache::new();
        let src = entity("A", "e0");
        cache.put_measurement(src.clone(), "p", T::new(0), Value::from(1));
        cache.put_measurement(src.clone(), "p", T::new(5), Value::from(2));
        assert_eq!(cache.measurement_at(&src, "p", T::new(0)), Some(&Value::from(1)));
        assert_eq!(cache.measurement_at(&src, "p", T::new(4)), Some(&Value::from(1)));
        assert_eq!(cache.measurement_at(&src, "p", T::new(5)), Some(&Value::from(2)));
        assert_eq!(cache.measurement_at(&src, "p", T::new(100)), Some(&Value::from(2)));
    }

    #[test]
    fn initial_seed_serves_at_t_zero_until_first_write() {
        let mut cache = DataCache::new();
        let src = entity("A", "e0");
        cache.seed_initial(src.clone(), "p", Value::from(0));
        assert_eq!(cache.measurement_at(&src, "p", T::new(0)), Some(&Value::from(0)));
        cache.put_measurement(src.clone(), "p", T::new(1), Value::from(9));
        assert_eq!(cache.measurement_at(&src, "p", T::new(0)), Some(&Value::from(0)));
        assert_eq!(cache.measurement_at(&src, "p", T::new(1)), Some(&Value::from(9)));
    }

    #[test]
    fn eviction_keeps_floor_entry_for_lagging_consumers() {
        let mut cache = DataCache::new();
        let src = entity("A", "e0");
        cache.put_measurement(src.clone(), "p", T::new(0), Value::from(1));
        cache.put_measurement(src.clone(), "p", T::new(5), Value::from(2));
        cache.put_measurement(src.clone(), "p", T::new(10), Value::from(3));
        // A consumer still at t=3 needs the t=0 entry to remain available.
        cache.evict_measurements_before(&src, "p", T::new(3));
        assert_eq!(cache.measurement_at(&src, "p", T::new(3)), Some(&Value::from(1)));
        // Once every consumer has passed t=5, the t=0 entry can go.
        cache.evict_measurements_before(&src, "p", T::new(7));
        assert_eq!(cache.measurement_at(&src, "p", T::new(7)), Some(&Value::from(2)));
    }

    #[test]
    fn events_are_delivered_once_and_evicted() {
        let mut cache = DataCache::new();
        let src = entity("A", "e0");
        cache.push_event(src.clone(), "ev", T::new(3), Value::from("a"));
        cache.push_event(src.clone(), "ev", T::new(1), Value::from("b"));
        assert_eq!(cache.next_event_time(&src, "ev"), Some(T::new(1)));
        let taken = cache.take_events_up_to(&src, "ev", T::new(2));
        assert_eq!(taken, vec![(T::new(1), Value::from("b"))]);
        assert_eq!(cache.next_event_time(&src, "ev"), Some(T::new(3)));
        let taken = cache.take_events_up_to(&src, "ev", T::new(3));
        assert_eq!(taken, vec![(T::new(3), Value::from("a"))]);
        assert_eq!(cache.next_event_time(&src, "ev"), None);
    }
}
