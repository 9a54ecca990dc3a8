//! Probabilistic backoff for urgent flushes under congestion.

use rand::Rng;
use tracing::debug;

/// Largest overshoot the gate distinguishes
pub const MAX_OVERSHOOT: u8 = 10;

/// How far timeouts have run ahead of confirmed sends, clamped to `0..=MAX_OVERSHOOT`
pub fn overshoot(timed_out: u64, sent: u64) -> u8 {
    timed_out
        .saturating_sub(sent)
        .min(u64::from(MAX_OVERSHOOT)) as u8
}

/// Chance of skipping one urgent flush at the given overshoot.
///
/// Linear in the overshoot and never certain, so an urgent flush always
/// has some chance to go out: `overshoot / (MAX_OVERSHOOT + 1)`.
pub fn skip_probability(overshoot: u8) -> f64 {
    f64::from(overshoot.min(MAX_OVERSHOOT)) / f64::from(MAX_OVERSHOOT + 1)
}

/// Decides whether an urgent flush backs off
#[derive(Debug, Default)]
pub struct CongestionGate {
    /// Flushes skipped so far
    skipped: u64,
}

impl CongestionGate {
    /// Create a new congestion gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw whether to skip, given the tree's cumulative counters
    pub fn should_skip<R: Rng + ?Sized>(&mut self, timed_out: u64, sent: u64, rng: &mut R) -> bool {
        let overshoot = overshoot(timed_out, sent);
        if overshoot == 0 {
            return false;
        }

        let skip = rng.gen_bool(skip_probability(overshoot));
        if skip {
            self.skipped += 1;
            debug!("Congestion backoff (overshoot {}, {} skipped so far)", overshoot, self.skipped);
        }
        skip
    }

    /// Flushes skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_overshoot_clamps() {
        assert_eq!(overshoot(0, 0), 0);
        assert_eq!(overshoot(3, 5), 0);
        assert_eq!(overshoot(7, 2), 5);
        assert_eq!(overshoot(100, 0), MAX_OVERSHOOT);
    }

    #[test]
    fn test_probability_monotonic() {
        assert_eq!(skip_probability(0), 0.0);
        let mut previous = 0.0;
        for o in 0..=MAX_OVERSHOOT {
            let p = skip_probability(o);
            assert!(p >= previous);
            assert!(p < 1.0);
            previous = p;
        }
        assert_eq!(skip_probability(200), skip_probability(MAX_OVERSHOOT));
    }

    #[test]
    fn test_no_skip_without_overshoot() {
        let mut gate = CongestionGate::new();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            assert!(!gate.should_skip(4, 4, &mut rng));
        }
        assert_eq!(gate.skipped(), 0);
    }

    #[test]
    fn test_skip_rate_grows_with_overshoot() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut rate = |timed_out| {
            let mut gate = CongestionGate::new();
            for _ in 0..2000 {
                gate.should_skip(timed_out, 0, &mut rng);
            }
            gate.skipped()
        };
        let low = rate(1);
        let high = rate(10);
        assert!(low > 0);
        assert!(high > low);
        assert!(high < 2000);
    }
}
