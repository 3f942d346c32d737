use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Process-wide generation counter, folded into the most significant half so
/// that ids created within the same millisecond stay distinct.
static GENERATION_COUNTER: AtomicU64 = AtomicU64::new(0);

const COUNTER_BITS: u64 = 20;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// A 128-bit object identifier assigned once at creation time.
///
/// Ids are ordered lexicographically over their two halves, most significant
/// half first, and are used only for identity equality and for tie-breaking
/// in ranked answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    msb: u64,
    lsb: u64,
}

impl UniqueId {
    /// Generates a fresh identifier from the wall clock, a process-wide
    /// counter and a random low half.
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let count = GENERATION_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            msb: (millis << COUNTER_BITS) | (count & COUNTER_MASK),
            lsb: rand::random::<u64>(),
        }
    }

    pub fn from_halves(msb: u64, lsb: u64) -> Self {
        Self { msb, lsb }
    }

    pub fn msb(&self) -> u64 {
        self.msb
    }

    pub fn lsb(&self) -> u64 {
        self.lsb
    }

    /// Total order over ids; equal ids compare equal, distinct ids never do.
    pub fn compare(&self, other: &UniqueId) -> Ordering {
        self.msb
            .cmp(&other.msb)
            .then_with(|| self.lsb.cmp(&other.lsb))
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl Hash for UniqueId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Fold each half by XORing its high and low 32-bit pieces.
        let fold = |half: u64| ((half >> 32) as u32) ^ (half as u32);
        state.write_u32(fold(self.msb) ^ fold(self.lsb));
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.msb, self.lsb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn fresh_ids_are_distinct() {
        let ids: HashSet<UniqueId> = (0..1000).map(|_| UniqueId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ordering_is_lexicographic_over_halves() {
        let low = UniqueId::from_halves(1, u64::MAX);
        let high = UniqueId::from_halves(2, 0);
        assert_eq!(low.compare(&high), Ordering::Less);
        assert_eq!(high.compare(&low), Ordering::Greater);
        assert_eq!(low.compare(&low), Ordering::Equal);
        assert!(low < high);
    }

    #[test]
    fn copies_preserve_identity() {
        let id = UniqueId::new();
        let copy = id;
        assert_eq!(id, copy);
        assert_eq!(id.compare(&copy), Ordering::Equal);
    }

    #[test]
    fn ordering_is_total_over_generated_ids() {
        let mut ids: Vec<UniqueId> = (0..100).map(|_| UniqueId::new()).collect();
        ids.sort();
        for pair in ids.windows(2) {
            assert_eq!(pair[0].compare(&pair[1]), Ordering::Less);
        }
    }
}
