use parking_lot::{Condvar, Mutex};

/// Counting permit pool bounding concurrent operations.
///
/// `acquire` blocks until a permit is free and hands back an RAII guard that
/// returns the permit on drop. The default capacity of 1 serializes all
/// holders; raising it enables real parallelism without touching callers.
pub struct PermitPool {
    available: Mutex<usize>,
    returned: Condvar,
    capacity: usize,
}

impl PermitPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            available: Mutex::new(capacity),
            returned: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.returned.wait(&mut available);
        }
        *available -= 1;
        Permit { pool: self }
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        self.returned.notify_one();
    }
}

impl Default for PermitPool {
    fn default() -> Self {
        Self::new(1)
    }
}

pub struct Permit<'a> {
    pool: &'a PermitPool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}
