use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::graph::queue::Closable;

/// Counter value meaning "no limit established yet".
pub const UNSET: i64 = -1;

struct Generation {
    value: u64,
    closed: bool,
}

/// Graph-wide notification bumped every time a remaining counter is seeded.
///
/// Runners that found nothing left to do park here instead of spinning.
pub struct SeedSignal {
    generation: Mutex<Generation>,
    changed: Condvar,
}

impl Default for SeedSignal {
    fn default() -> Self {
        SeedSignal {
            generation: Mutex::new(Generation { value: 0, closed: false }),
            changed: Condvar::new(),
        }
    }
}

impl SeedSignal {
    pub fn generation(&self) -> u64 {
        self.generation.lock().value
    }

    pub fn bump(&self) {
        self.generation.lock().value += 1;
        self.changed.notify_all();
    }

    /// Blocks until the generation differs from `seen` or the signal is closed.
    pub fn wait_change(&self, seen: u64) -> Result<()> {
        let mut generation = self.generation.lock();
        while generation.value == seen && !generation.closed {
            self.changed.wait(&mut generation);
        }
        if generation.closed {
            return Err(Error::QueueClosed("seed_signal".to_owned()));
        }
        Ok(())
    }
}

impl Closable for SeedSignal {
    fn name(&self) -> &str {
        "seed_signal"
    }

    fn close(&self) {
        self.generation.lock().closed = true;
        self.changed.notify_all();
    }
}

/// Remaining-total-size register of one Batch or Consumer sizing path.
pub struct RemainingCounter {
    name: String,
    value: Mutex<i64>,
    signal: Arc<SeedSignal>,
}

impl RemainingCounter {
    pub fn new(name: impl Into<String>, signal: Arc<SeedSignal>) -> Self {
        RemainingCounter {
            name: name.into(),
            value: Mutex::new(UNSET),
            signal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> i64 {
        *self.value.lock()
    }

    /// Starts a fresh finite run of `total` items.
    pub fn seed(&self, total: i64) {
        *self.value.lock() = total;
        self.signal.bump();
    }

    /// Sizing protocol: while unset, every call takes the full `requested`
    /// size and leaves the counter alone; otherwise the call takes
    /// `min(remaining, requested)` and stores the decremented remainder.
    pub fn make_size(&self, requested: usize) -> usize {
        let mut value = self.value.lock();
        if *value == UNSET {
            return requested;
        }
        let size = (*value).clamp(0, requested as i64);
        *value -= size;
        size as usize
    }

    /// Subtracts `rows` already handed out, never going below zero.
    pub fn consume(&self, rows: usize) {
        let mut value = self.value.lock();
        if *value != UNSET {
            *value = (*value - rows as i64).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_counter_always_yields_full_batches() {
        let counter = RemainingCounter::new("c", Arc::new(SeedSignal::default()));
        assert_eq!(counter.make_size(16), 16);
        assert_eq!(counter.make_size(16), 16);
        assert_eq!(counter.get(), UNSET);
    }

    #[test]
    fn seeding_bumps_the_generation() {
        let signal = Arc::new(SeedSignal::default());
        let counter = RemainingCounter::new("c", signal.clone());
        let before = signal.generation();
        counter.seed(5);
        assert_ne!(signal.generation(), before);
        assert!(signal.wait_change(before).is_ok());
        assert_eq!(counter.make_size(4), 4);
        assert_eq!(counter.make_size(4), 1);
        assert_eq!(counter.make_size(4), 0);
    }
}
