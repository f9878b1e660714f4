//! Exclusive Resource Pool
//!
//! A lock-protected allocator over an integer range `[min, max)`. Synchronized
//! subtasks reserve one token per task (a port, a slot number, ...) and hand it
//! back when they finish or get cancelled.
//!
//! Tokens leave the pool wrapped in a [`Lease`]. Dropping the lease returns the
//! token, so a task that errors or panics halfway through `execute` still frees
//! what it reserved.

use crate::error::{QueueError, Result};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct ResourcePool {
    name: String,
    min: u32,
    max: u32,
    /// Every scan-for-free, allocate and release holds this lock for the whole sequence.
    allocated: Mutex<BTreeSet<u32>>,
}

impl ResourcePool {
    /// Creates a pool handing out tokens in `[min, max)`.
    pub fn new(name: &str, min: u32, max: u32) -> Result<Arc<Self>> {
        if min >= max {
            return Err(QueueError::InvalidConfig(format!(
                "resource pool '{}' has an empty range [{}, {})",
                name, min, max
            )));
        }

        Ok(Arc::new(Self {
            name: name.to_string(),
            min,
            max,
            allocated: Mutex::new(BTreeSet::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `[min, max)` bounds handed out by this pool.
    pub fn range(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    /// Total number of tokens, free or not.
    pub fn capacity(&self) -> usize {
        (self.max - self.min) as usize
    }

    /// Reserves the lowest free token.
    ///
    /// Returns `None` when every token is taken; exhaustion is an expected
    /// outcome and leaves the pool untouched.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Lease> {
        let mut allocated = self.lock();

        let token = (self.min..self.max).find(|token| !allocated.contains(token))?;
        allocated.insert(token);
        drop(allocated);

        tracing::debug!("Pool '{}' allocated token {}", self.name, token);

        Some(Lease {
            pool: self.clone(),
            token,
            released: false,
        })
    }

    /// Like [`ResourcePool::try_acquire`] but maps exhaustion to
    /// [`QueueError::ResourceUnavailable`].
    pub fn acquire(self: &Arc<Self>) -> Result<Lease> {
        self.try_acquire()
            .ok_or_else(|| QueueError::ResourceUnavailable(self.name.clone()))
    }

    /// Returns `token` to the pool.
    ///
    /// Releasing a token that is not currently allocated is a protocol
    /// violation and changes nothing.
    pub fn release(&self, token: u32) -> Result<()> {
        let removed = self.lock().remove(&token);
        if !removed {
            return Err(QueueError::ProtocolViolation(format!(
                "token {} was never reserved from pool '{}'",
                token, self.name
            )));
        }

        tracing::debug!("Pool '{}' released token {}", self.name, token);
        Ok(())
    }

    /// Checks whether `token` is currently held by some lease.
    pub fn is_allocated(&self, token: u32) -> bool {
        self.lock().contains(&token)
    }

    pub fn allocated_count(&self) -> usize {
        self.lock().len()
    }

    /// Tokens still free right now. Stale as soon as the lock is released.
    pub fn available_count(&self) -> usize {
        self.capacity() - self.allocated_count()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        // Each critical section is a single insert or remove, so a poisoned
        // lock still guards a consistent set.
        self.allocated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.name)
            .field("range", &(self.min..self.max))
            .field("allocated", &self.allocated_count())
            .finish()
    }
}

/// A token held by exactly one task. Returned to its pool on drop.
pub struct Lease {
    pool: Arc<ResourcePool>,
    token: u32,
    released: bool,
}

impl Lease {
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Name of the pool the token came from.
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// Returns the token now instead of waiting for the drop.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.pool.release(self.token)
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.name())
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.release(self.token) {
            tracing::error!("Failed to release lease on drop: {}", e);
        }
    }
}
