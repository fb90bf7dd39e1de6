// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! An optimistic read/write lock over data owned elsewhere.

use std::{
    sync::atomic::{self, AtomicU64, Ordering},
    thread,
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// A change counter paired with a reentrant mutex.
///
/// Readers never block writers. A reader takes a snapshot with
/// [`read`](ReentrantChangeLock::read), reads the protected data and then asks
/// [`is_consistent`](ReentrantChangeLock::is_consistent) whether a write
/// started in between; if so it reads again. Writers serialize on the mutex
/// and make the counter odd for as long as they write.
///
/// The mutex is reentrant, the counter is not: calling
/// [`write`](ReentrantChangeLock::write) while the same thread holds a
/// [`WriteGuard`] spins forever.
#[derive(Default)]
pub struct ReentrantChangeLock {
    changes: AtomicU64,
    mutex: ReentrantMutex<()>,
}

/// Publishes a write when dropped.
#[must_use = "the write ends when the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a ReentrantChangeLock,
    _mutex: ReentrantMutexGuard<'a, ()>,
}

impl ReentrantChangeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no write is in progress and returns a snapshot id.
    pub fn read(&self) -> u64 {
        loop {
            let changes = self.changes.load(Ordering::Acquire);

            if changes & 1 == 0 {
                return changes;
            }

            thread::yield_now();
        }
    }

    /// Returns true if no write started since `snapshot` was read.
    pub fn is_consistent(&self, snapshot: u64) -> bool {
        // the data reads must not be reordered after the check
        atomic::fence(Ordering::Acquire);

        self.changes.load(Ordering::Relaxed) == snapshot
    }

    /// Runs `func` until it observed no concurrent write and returns its last
    /// result.
    pub fn read_consistent<F: FnMut() -> T, T>(&self, mut func: F) -> T {
        loop {
            let snapshot = self.read();
            let result = func();

            if self.is_consistent(snapshot) {
                return result;
            }
        }
    }

    /// Takes the mutex and marks a write as in progress.
    pub fn write(&self) -> WriteGuard<'_> {
        let mutex = self.mutex.lock();

        loop {
            let changes = self.changes.load(Ordering::Relaxed);

            if changes & 1 == 0
                && self
                    .changes
                    .compare_exchange_weak(
                        changes,
                        changes + 1,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                // the data writes must not become visible before the odd count
                atomic::fence(Ordering::Release);

                return WriteGuard {
                    lock: self,
                    _mutex: mutex,
                };
            }

            thread::yield_now();
        }
    }

    /// The current value of the change counter.
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Acquire)
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.changes.fetch_add(1, Ordering::Release);
    }
}
