//! Shared/exclusive lock whose exclusive side can be re-entered by the
//! thread that holds it.
//!
//! A thread holding exclusive access may take the lock again, shared or
//! exclusive, without blocking. A thread holding only shared access must not
//! ask for exclusive access.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::common::errors::{RepositoryError, Result};

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: Option<ThreadId>,
    /// Exclusive holds by `writer`, nested shared ones included
    depth: usize,
}

#[derive(Default)]
pub struct FolderLock {
    state: Mutex<LockState>,
    released: Condvar,
}

enum Hold {
    Shared,
    Exclusive,
}

/// Releases its hold on drop
pub struct FolderLockGuard<'a> {
    lock: &'a FolderLock,
    hold: Hold,
}

impl FolderLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Result<FolderLockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state()?;
        loop {
            match state.writer {
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(self.guard(Hold::Exclusive));
                }
                Some(_) => state = self.wait(state)?,
                None => {
                    state.readers += 1;
                    return Ok(self.guard(Hold::Shared));
                }
            }
        }
    }

    pub fn write(&self) -> Result<FolderLockGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.state()?;
        loop {
            match state.writer {
                Some(owner) if owner == me => break,
                None if state.readers == 0 => break,
                _ => state = self.wait(state)?,
            }
        }
        state.writer = Some(me);
        state.depth += 1;
        Ok(self.guard(Hold::Exclusive))
    }

    /// Whether the current thread holds exclusive access
    pub fn is_held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().map(|state| state.writer == Some(me)).unwrap_or(false)
    }

    fn guard(&self, hold: Hold) -> FolderLockGuard<'_> {
        FolderLockGuard { lock: self, hold }
    }

    fn state(&self) -> Result<MutexGuard<'_, LockState>> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::lock("folder lock state"))
    }

    fn wait<'a>(&self, state: MutexGuard<'a, LockState>) -> Result<MutexGuard<'a, LockState>> {
        self.released
            .wait(state)
            .map_err(|_| RepositoryError::lock("folder lock state"))
    }
}

impl Drop for FolderLockGuard<'_> {
    fn drop(&mut self) {
        // The counters stay consistent even when a holder panicked
        let mut state = match self.lock.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.hold {
            Hold::Shared => state.readers = state.readers.saturating_sub(1),
            Hold::Exclusive => {
                state.depth = state.depth.saturating_sub(1);
                if state.depth == 0 {
                    state.writer = None;
                }
            }
        }
        drop(state);
        self.lock.released.notify_all();
    }
}
