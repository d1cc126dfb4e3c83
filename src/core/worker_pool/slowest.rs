//! Bounded ranking of the slowest units.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One entry of the slowest-units ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowUnit {
    /// Identifier of the unit.
    pub identifier: String,
    /// How long it took.
    pub elapsed: Duration,
}

/// Keeps the `capacity` largest durations seen.
///
/// Capacity 0 disables tracking. Once full, a new duration replaces the
/// current smallest entry only if it is larger.
#[derive(Debug, Clone, Default)]
pub struct SlowestUnits {
    capacity: usize,
    entries: Vec<SlowUnit>,
}

impl SlowestUnits {
    /// Ranking of at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Offer a finished unit to the ranking.
    pub fn record(&mut self, identifier: &str, elapsed: Duration) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() < self.capacity {
            self.entries.push(SlowUnit {
                identifier: identifier.to_owned(),
                elapsed,
            });
            return;
        }
        let Some((smallest, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.elapsed)
        else {
            return;
        };
        if elapsed > self.entries[smallest].elapsed {
            self.entries[smallest] = SlowUnit {
                identifier: identifier.to_owned(),
                elapsed,
            };
        }
    }

    /// Entries ordered slowest first.
    #[must_use]
    pub fn ranked(&self) -> Vec<SlowUnit> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));
        ranked
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn keeps_largest_values_and_evicts_smallest() {
        let mut slowest = SlowestUnits::new(2);
        slowest.record("a", ms(10));
        slowest.record("b", ms(30));
        slowest.record("c", ms(20));
        slowest.record("d", ms(5));

        let ranked = slowest.ranked();
        let names: Vec<_> = ranked.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_disables_tracking() {
        let mut slowest = SlowestUnits::new(0);
        slowest.record("a", ms(10));
        assert!(slowest.is_empty());
    }
}
