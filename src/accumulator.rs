//! Fixed-depth sample history for one register

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::Value;

/// One time-stamped register reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Local time the response carrying the value was received
    pub timestamp: Instant,
    pub value: Value,
}

/// Ring buffer of the most recent `depth` samples, oldest first.
///
/// Readers keep their own watermark and ask for everything newer; reading never consumes.
#[derive(Debug, Clone)]
pub struct Accumulator {
    depth: usize,
    samples: VecDeque<Sample>,
}

impl Accumulator {
    /// Create an accumulator holding at most `depth` samples (at least one).
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self { depth, samples: VecDeque::with_capacity(depth) }
    }

    /// Append a sample, evicting the oldest once full.
    ///
    /// Timestamps stay strictly increasing: a sample not newer than the newest held one is
    /// stamped one nanosecond after it, so a watermark never hides it.
    pub fn push(&mut self, timestamp: Instant, value: Value) {
        let timestamp = match self.samples.back() {
            Some(last) if last.timestamp >= timestamp => last.timestamp + Duration::from_nanos(1),
            _ => timestamp,
        };
        if self.samples.len() == self.depth {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { timestamp, value });
    }

    /// Samples strictly newer than `watermark`, chronological. `None` returns everything.
    pub fn since(&self, watermark: Option<Instant>) -> Vec<Sample> {
        let start = match watermark {
            Some(watermark) => self.samples.partition_point(|sample| sample.timestamp <= watermark),
            None => 0,
        };
        self.samples.range(start..).cloned().collect()
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_depth() {
        let origin = Instant::now();
        let mut acc = Accumulator::new(3);
        for n in 0..5 {
            acc.push(origin + Duration::from_millis(n), Value::Int32(n as i32));
        }

        let values: Vec<Value> = acc.since(None).into_iter().map(|s| s.value).collect();
        assert_eq!(values, vec![Value::Int32(2), Value::Int32(3), Value::Int32(4)]);
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn since_is_strictly_after_watermark() {
        let origin = Instant::now();
        let mut acc = Accumulator::new(10);
        for n in 0..4 {
            acc.push(origin + Duration::from_millis(n * 10), Value::UInt8(n as u8));
        }

        let newer = acc.since(Some(origin + Duration::from_millis(10)));
        assert_eq!(newer.len(), 2);
        assert_eq!(newer[0].value, Value::UInt8(2));
        assert!(acc.since(Some(origin + Duration::from_secs(1))).is_empty());
        assert_eq!(acc.latest().map(|s| &s.value), Some(&Value::UInt8(3)));
    }

    #[test]
    fn late_samples_stay_visible_past_the_watermark() {
        let origin = Instant::now();
        let mut acc = Accumulator::new(10);
        acc.push(origin + Duration::from_millis(20), Value::UInt8(1));
        let watermark = acc.latest().map(|s| s.timestamp);

        acc.push(origin + Duration::from_millis(10), Value::UInt8(2));
        acc.push(origin + Duration::from_millis(20), Value::UInt8(3));

        let newer: Vec<Value> = acc.since(watermark).into_iter().map(|s| s.value).collect();
        assert_eq!(newer, vec![Value::UInt8(2), Value::UInt8(3)]);
        let stamps: Vec<Instant> = acc.since(None).into_iter().map(|s| s.timestamp).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn zero_depth_is_clamped() {
        let mut acc = Accumulator::new(0);
        acc.push(Instant::now(), Value::Float(1.0));
        acc.push(Instant::now(), Value::Float(2.0));
        assert_eq!(acc.depth(), 1);
        assert_eq!(acc.since(None).len(), 1);
    }
}
