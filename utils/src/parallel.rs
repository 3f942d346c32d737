use parking_lot::{Condvar, Mutex};

/// Contiguous index ranges splitting `count` items over at most `workers`
/// groups of equal size (the last group may be smaller).
pub fn partition_groups(count: usize, workers: usize) -> Vec<std::ops::Range<usize>> {
    if count == 0 || workers == 0 {
        return Vec::new();
    }
    let group_size = count.div_ceil(workers);
    (0..count)
        .step_by(group_size)
        .map(|start| start..(start + group_size).min(count))
        .collect()
}

/// Counting semaphore backed by a condition variable.
///
/// Bounds the number of concurrently running operations; acquiring every
/// permit quiesces the owner for snapshotting.
#[derive(Debug)]
pub struct Semaphore {
    total: usize,
    available: Mutex<usize>,
    signal: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            total: permits,
            available: Mutex::new(permits),
            signal: Condvar::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Blocks until one permit is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.signal.wait(&mut available);
        }
        *available -= 1;
        Permit {
            semaphore: self,
            held: 1,
        }
    }

    /// Blocks until every permit is free, quiescing all other holders.
    pub fn acquire_all(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available < self.total {
            self.signal.wait(&mut available);
        }
        *available = 0;
        Permit {
            semaphore: self,
            held: self.total,
        }
    }

    fn release(&self, count: usize) {
        let mut available = self.available.lock();
        *available += count;
        if count == 1 {
            self.signal.notify_one();
        } else {
            self.signal.notify_all();
        }
    }
}

/// Permits held on a [`Semaphore`], released on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
    held: usize,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn groups_cover_all_indices_contiguously() {
        assert_eq!(partition_groups(10, 4), vec![0..3, 3..6, 6..9, 9..10]);
        assert_eq!(partition_groups(3, 8), vec![0..1, 1..2, 2..3]);
        assert_eq!(partition_groups(0, 4), vec![]);
        assert_eq!(partition_groups(5, 1), vec![0..5]);
    }

    #[test]
    fn semaphore_bounds_concurrent_holders() {
        let semaphore = Arc::new(Semaphore::new(2));
        let first = semaphore.acquire();
        let _second = semaphore.acquire();

        let contender = {
            let semaphore = Arc::clone(&semaphore);
            std::thread::spawn(move || {
                let _permit = semaphore.acquire();
            })
        };
        // The third acquire can only finish after a permit is returned.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!contender.is_finished());
        drop(first);
        contender.join().unwrap();
    }

    #[test]
    fn acquire_all_waits_for_quiescence() {
        let semaphore = Arc::new(Semaphore::new(3));
        let holder = semaphore.acquire();

        let quiescer = {
            let semaphore = Arc::clone(&semaphore);
            std::thread::spawn(move || {
                let permit = semaphore.acquire_all();
                drop(permit);
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!quiescer.is_finished());
        drop(holder);
        quiescer.join().unwrap();
    }
}
