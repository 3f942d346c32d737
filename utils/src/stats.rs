//! Per-operation statistics.
//!
//! Counters accumulate in an explicit context owned by the operation and
//! are merged across thread boundaries at join points; there is no
//! thread-local magic involved.

use std::time::Instant;

use metrisch_types::distance::DistanceStats;
use serde::{Deserialize, Serialize};

/// Parameter names under which derived aggregates are recorded after an
/// operation finishes.
pub const STAT_ACCESSED_OBJECTS: &str = "AccessedObjects";
pub const STAT_ANSWER_COUNT: &str = "AnswerCount";
pub const STAT_ANSWER_DISTANCE: &str = "AnswerDistance";
pub const STAT_EXECUTION_MILLIS: &str = "ExecutionMillis";

/// Counters and timers bound to one operation execution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub distances: DistanceStats,
    pub execution_millis: u64,
}

impl OperationStats {
    pub fn merge(&mut self, other: &OperationStats) {
        self.distances.merge(&other.distances);
        self.execution_millis += other.execution_millis;
    }

    pub fn accessed_objects(&self) -> u64 {
        self.distances.accessed_objects()
    }
}

/// Wall-clock timer for one execution scope.
#[derive(Debug)]
pub struct StatTimer {
    start: Instant,
}

impl StatTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_adds_counters() {
        let mut stats = OperationStats::default();
        stats.distances.computations = 3;
        stats.distances.savings = 2;
        stats.execution_millis = 10;

        let mut other = OperationStats::default();
        other.distances.computations = 4;
        other.distances.lower_bounds = 1;
        other.execution_millis = 5;

        stats.merge(&other);
        assert_eq!(stats.distances.computations, 7);
        assert_eq!(stats.distances.lower_bounds, 1);
        assert_eq!(stats.distances.savings, 2);
        assert_eq!(stats.execution_millis, 15);
        assert_eq!(stats.accessed_objects(), 9);
    }
}
