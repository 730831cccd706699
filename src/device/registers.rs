//! Register cache and accumulator slots for one device

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::accumulator::{Accumulator, Sample};
use crate::config::AccumulateConfig;
use crate::types::{DataType, RegisterKey, Value};

#[derive(Debug)]
pub(crate) struct AccumulatorSlot {
    pub accumulator: Accumulator,
    pub config: AccumulateConfig,
    pub next_due: Instant,
    pub in_flight: bool,
}

/// A read the poller should launch now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DueRead {
    pub key: RegisterKey,
    pub data_type: DataType,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Default)]
pub(crate) struct Registers {
    /// Cacheable registers; `None` until the first successful read
    cache: HashMap<RegisterKey, Option<Value>>,
    accumulated: HashMap<RegisterKey, AccumulatorSlot>,
}

impl Registers {
    /// `Some` for cacheable registers, holding the cached value if there is one.
    pub fn cached(&self, key: RegisterKey) -> Option<Option<&Value>> {
        self.cache.get(&key).map(Option::as_ref)
    }

    pub fn is_cacheable(&self, key: RegisterKey) -> bool {
        self.cache.contains_key(&key)
    }

    pub fn mark_cacheable(&mut self, key: RegisterKey) {
        self.cache.entry(key).or_insert(None);
    }

    /// Store a value for a cacheable register; other registers are left alone.
    pub fn store(&mut self, key: RegisterKey, value: &Value) {
        if let Some(slot) = self.cache.get_mut(&key) {
            *slot = Some(value.clone());
        }
    }

    /// Start accumulating `key`, replacing any previous configuration. The first read is
    /// due immediately unless a read for the old configuration is still in flight.
    pub fn accumulate(&mut self, key: RegisterKey, config: AccumulateConfig, now: Instant) {
        self.mark_cacheable(key);
        let in_flight = self.accumulated.get(&key).is_some_and(|slot| slot.in_flight);
        let accumulator = Accumulator::new(config.depth);
        self.accumulated.insert(key, AccumulatorSlot { accumulator, config, next_due: now, in_flight });
    }

    /// Drop all configuration for `key`.
    pub fn clear(&mut self, key: RegisterKey) {
        self.cache.remove(&key);
        self.accumulated.remove(&key);
    }

    pub fn has_accumulators(&self) -> bool {
        !self.accumulated.is_empty()
    }

    pub fn samples_since(&self, key: RegisterKey, watermark: Option<Instant>) -> Option<Vec<Sample>> {
        self.accumulated.get(&key).map(|slot| slot.accumulator.since(watermark))
    }

    /// Collect every read due at `now`, rescheduling each accumulated register one interval
    /// ahead. Registers with a read still in flight are skipped this round.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueRead> {
        let mut due = Vec::new();
        for (key, slot) in self.accumulated.iter_mut() {
            if slot.next_due > now {
                continue;
            }
            slot.next_due = now + slot.config.interval;
            if slot.in_flight {
                continue;
            }
            slot.in_flight = true;
            due.push(DueRead { key: *key, data_type: slot.config.data_type, ttl: slot.config.ttl });
        }
        due
    }

    /// Earliest time an accumulated register comes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.accumulated.values().map(|slot| slot.next_due).min()
    }

    /// Record the result of a poller read.
    pub fn finish_read(&mut self, key: RegisterKey, sample: Option<(Instant, Value)>) {
        let Some(slot) = self.accumulated.get_mut(&key) else {
            return;
        };
        slot.in_flight = false;
        if let Some((timestamp, value)) = sample {
            self.store(key, &value);
            if let Some(slot) = self.accumulated.get_mut(&key) {
                slot.accumulator.push(timestamp, value);
            }
        }
    }

    #[cfg(test)]
    pub fn in_flight(&self, key: RegisterKey) -> Option<bool> {
        self.accumulated.get(&key).map(|slot| slot.in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(interval_ms: u64) -> AccumulateConfig {
        AccumulateConfig::new(4, Duration::from_millis(interval_ms), DataType::Float)
    }

    #[test]
    fn accumulation_implies_caching() {
        let mut registers = Registers::default();
        let key = RegisterKey::new(0x10, 0);
        registers.accumulate(key, config(100), Instant::now());

        assert!(registers.is_cacheable(key));
        assert_eq!(registers.cached(key), Some(None));

        registers.clear(key);
        assert!(!registers.is_cacheable(key));
        assert!(!registers.has_accumulators());
    }

    #[test]
    fn in_flight_registers_are_skipped() {
        let mut registers = Registers::default();
        let now = Instant::now();
        let slow = RegisterKey::new(0x20, 0);
        let fast = RegisterKey::new(0x21, 0);
        registers.accumulate(slow, config(100), now);
        registers.accumulate(fast, config(100), now);

        assert_eq!(registers.take_due(now).len(), 2);
        registers.finish_read(fast, Some((now, Value::Float(1.0))));

        let later = now + Duration::from_millis(100);
        let due = registers.take_due(later);
        assert_eq!(due.iter().map(|read| read.key).collect::<Vec<_>>(), vec![fast]);
        assert_eq!(registers.in_flight(slow), Some(true));
        assert_eq!(registers.next_due(), Some(later + Duration::from_millis(100)));
    }

    #[test]
    fn reconfiguring_keeps_the_running_read() {
        let mut registers = Registers::default();
        let now = Instant::now();
        let key = RegisterKey::new(0x22, 0);
        registers.accumulate(key, config(100), now);
        assert_eq!(registers.take_due(now).len(), 1);

        registers.accumulate(key, config(50), now);
        assert_eq!(registers.in_flight(key), Some(true));
        assert!(registers.take_due(now).is_empty());

        registers.finish_read(key, Some((now, Value::Float(1.0))));
        let later = now + Duration::from_millis(50);
        assert_eq!(registers.take_due(later).len(), 1);
    }

    #[test]
    fn finished_reads_update_cache_and_history() {
        let mut registers = Registers::default();
        let now = Instant::now();
        let key = RegisterKey::new(0x30, 2);
        registers.accumulate(key, config(50), now);
        registers.take_due(now);

        registers.finish_read(key, Some((now, Value::Float(2.5))));
        assert_eq!(registers.cached(key), Some(Some(&Value::Float(2.5))));
        assert_eq!(registers.samples_since(key, None).map(|s| s.len()), Some(1));

        registers.finish_read(key, None);
        assert_eq!(registers.samples_since(key, Some(now)).map(|s| s.len()), Some(0));
    }
}
