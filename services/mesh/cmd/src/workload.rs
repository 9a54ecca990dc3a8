//! Sensing jobs run by every simulated node.
//!
//! `collect` keeps per-window statistics of periodic readings; `detect`
//! reports sightings urgently and keeps one record per sighting.

use mesh_storage::{Combiner, MapOutput, Record};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

/// Accumulator id of the statistics job
pub const COLLECT_JOB: u8 = 1;
/// Accumulator id of the sighting job
pub const DETECT_JOB: u8 = 2;

/// Sensor type tag carried in collect keys
pub const SENSOR_TEMP: u8 = 1;

/// Collect key: time window, node position, sensor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CollectKey {
    pub window: u16,
    pub x: u8,
    pub y: u8,
    pub sensor: u8,
}

impl CollectKey {
    pub const LEN: usize = 5;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [lo, hi] = self.window.to_le_bytes();
        [lo, hi, self.x, self.y, self.sensor]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match *bytes {
            [lo, hi, x, y, sensor] => Some(Self {
                window: u16::from_le_bytes([lo, hi]),
                x,
                y,
                sensor,
            }),
            _ => None,
        }
    }
}

/// Collect value: running sum of squares, sum, and count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectValue {
    pub sqr_sum: u32,
    pub sum: i32,
    pub count: u16,
}

impl CollectValue {
    pub const LEN: usize = 10;

    pub fn reading(value: i8) -> Self {
        let value = i32::from(value);
        Self {
            sqr_sum: (value * value) as u32,
            sum: value,
            count: 1,
        }
    }

    pub fn merge(&mut self, other: &CollectValue) {
        self.sqr_sum = self.sqr_sum.wrapping_add(other.sqr_sum);
        self.sum = self.sum.wrapping_add(other.sum);
        self.count = self.count.wrapping_add(other.count);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        f64::from(self.sum) / f64::from(self.count)
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        f64::from(self.sqr_sum) / f64::from(self.count) - mean * mean
    }

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&self.sqr_sum.to_le_bytes());
        out[4..8].copy_from_slice(&self.sum.to_le_bytes());
        out[8..].copy_from_slice(&self.count.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut sqr_sum = [0u8; 4];
        let mut sum = [0u8; 4];
        let mut count = [0u8; 2];
        sqr_sum.copy_from_slice(&bytes[..4]);
        sum.copy_from_slice(&bytes[4..8]);
        count.copy_from_slice(&bytes[8..]);
        Some(Self {
            sqr_sum: u32::from_le_bytes(sqr_sum),
            sum: i32::from_le_bytes(sum),
            count: u16::from_le_bytes(count),
        })
    }
}

/// Windowed statistics of periodic readings.
///
/// Sown with key `[sensor]` and value `[reading as i8]`.
pub struct Collect {
    x: u8,
    y: u8,
    started: Instant,
    window: Duration,
}

impl Collect {
    pub fn new(x: u8, y: u8, started: Instant, window: Duration) -> Self {
        Self { x, y, started, window }
    }

    fn current_window(&self) -> u16 {
        let window = self.window.as_secs().max(1);
        (self.started.elapsed().as_secs() / window).min(u64::from(u16::MAX)) as u16
    }
}

impl Combiner for Collect {
    fn map(&self, key: &[u8], value: &[u8], out: &mut MapOutput) {
        let (Some(&sensor), Some(&reading)) = (key.first(), value.first()) else {
            return;
        };
        let key = CollectKey {
            window: self.current_window(),
            x: self.x,
            y: self.y,
            sensor,
        };
        match Record::new(&key.to_bytes(), &CollectValue::reading(reading as i8).to_bytes()) {
            Ok(record) => out.push(record),
            Err(err) => warn!("collect map failed: {}", err),
        }
    }

    fn reduce(&self, existing: &mut Record, incoming: &[u8]) {
        let (Some(mut acc), Some(next)) = (
            CollectValue::from_bytes(existing.value()),
            CollectValue::from_bytes(incoming),
        ) else {
            return;
        };
        acc.merge(&next);
        existing.value_mut().copy_from_slice(&acc.to_bytes());
    }
}

/// A reported sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Detection {
    pub second: u16,
    pub animal: u8,
}

impl Detection {
    pub const LEN: usize = 3;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [lo, hi] = self.second.to_le_bytes();
        [lo, hi, self.animal]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match *bytes {
            [lo, hi, animal] => Some(Self {
                second: u16::from_le_bytes([lo, hi]),
                animal,
            }),
            _ => None,
        }
    }
}

/// Urgent sightings, deduplicated by second and animal.
///
/// Sown with value `[animal id]`; id 0 means nothing was seen.
pub struct Detect {
    started: Instant,
}

impl Detect {
    pub fn new(started: Instant) -> Self {
        Self { started }
    }
}

impl Combiner for Detect {
    fn map(&self, _key: &[u8], value: &[u8], out: &mut MapOutput) {
        let Some(&animal) = value.first().filter(|animal| **animal != 0) else {
            return;
        };
        let detection = Detection {
            second: self.started.elapsed().as_secs().min(u64::from(u16::MAX)) as u16,
            animal,
        };
        if let Ok(record) = Record::new(&detection.to_bytes(), &[]) {
            out.push(record.urgent());
        }
    }

    fn reduce(&self, _existing: &mut Record, _incoming: &[u8]) {}
}
