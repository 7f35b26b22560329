// datacells.rs

use core::cell::Cell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

/// A generic thread-safe container for blackboard-style data sharing
/// between the tick loop and the display/telemetry consumers.
pub struct DataCell<T: Copy> {
    storage: Mutex<CriticalSectionRawMutex, Cell<T>>,
    last_updated_ms: AtomicU32,
}

impl<T: Copy> DataCell<T> {
    /// Create a new cell with an initial value.
    pub const fn new(init: T) -> Self {
        Self {
            storage: Mutex::new(Cell::new(init)),
            last_updated_ms: AtomicU32::new(0),
        }
    }

    /// Update the data in the cell (the "write").
    pub fn update(&self, data: T, now_ms: u32) {
        self.storage.lock(|cell| {
            cell.set(data);
        });
        self.last_updated_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Millisecond timestamp of the last update.
    pub fn last_updated_ms(&self) -> u32 {
        self.last_updated_ms.load(Ordering::Relaxed)
    }

    /// Fetch the latest data from the cell (the "read").
    pub fn read(&self) -> T {
        self.storage.lock(|cell| cell.get())
    }
}
