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

//! The segment arrays the trie is made of, and the operations that walk them.
//!
//! A segment is `2^bits` pairs of atomic slots. The key slot of a pair holds
//! nothing, a key node, a nested segment (one level deeper) or, on the last
//! level, a linear probing table. A key slot pointer tagged with [`LOCK_TAG`]
//! is owned by the thread that tagged it; everybody else yields until the tag
//! is gone.
//!
//! Writers publish a pair value first and key second, so a reader that sees a
//! key also sees its value. Readers load value, key and value again and only
//! trust the pair if both value loads agree; pointers cannot be recycled while
//! the reader is pinned, so equal loads mean the value belongs to the key.

use std::{
    mem,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use crossbeam_epoch::{Atomic, Guard, Owned, Pointer, Shared};
use tracing::{debug, trace};

use super::{config::FibConfig, Expected};
use crate::{fib, like::LikeEquals};

/// Set on a key slot pointer while a writer owns the slot.
pub(crate) const LOCK_TAG: usize = 0b1;

/// Number of pairs a linear probing table grows by.
pub(crate) const LPT_CHUNK: usize = 8;

pub(crate) struct Pair<K, V> {
    pub(crate) key: Atomic<Node<K, V>>,
    pub(crate) value: Atomic<V>,
}

impl<K, V> Default for Pair<K, V> {
    fn default() -> Self {
        Pair {
            key: Atomic::null(),
            value: Atomic::null(),
        }
    }
}

impl<K, V> Pair<K, V> {
    /// Loads a key slot and a value that is known to belong to it.
    pub(crate) fn load<'g>(&self, guard: &'g Guard) -> (Shared<'g, Node<K, V>>, Shared<'g, V>) {
        loop {
            let value_ptr = self.value.load(Ordering::Acquire, guard);
            let key_ptr = self.key.load(Ordering::Acquire, guard);

            if self.value.load(Ordering::Acquire, guard) == value_ptr {
                return (key_ptr, value_ptr);
            }
        }
    }
}

pub(crate) enum Node<K, V> {
    Key { hash: u32, key: K },
    Segment(Segment<K, V>),
    Lpt(Lpt<K, V>),
}

/// A decoded key slot.
pub(crate) enum SlotRef<'g, K, V> {
    Empty,
    Locked,
    Key { hash: u32, key: &'g K },
    Segment(&'g Segment<K, V>),
    Lpt(&'g Lpt<K, V>),
}

impl<K, V> Node<K, V> {
    /// # Safety
    ///
    /// `ptr` must have been loaded from a key slot under the guard `'g`.
    pub(crate) unsafe fn as_ref(ptr: Shared<'_, Self>) -> SlotRef<'_, K, V> {
        if ptr.tag() & LOCK_TAG != 0 {
            return SlotRef::Locked;
        }

        match ptr.as_ref() {
            None => SlotRef::Empty,
            Some(Node::Key { hash, key }) => SlotRef::Key { hash: *hash, key },
            Some(Node::Segment(segment)) => SlotRef::Segment(segment),
            Some(Node::Lpt(lpt)) => SlotRef::Lpt(lpt),
        }
    }
}

pub(crate) struct Segment<K, V> {
    pub(crate) pairs: Box<[Pair<K, V>]>,
}

/// Linear probing table, the fallback for keys that still collide on the
/// last level of the trie.
pub(crate) struct Lpt<K, V> {
    /// Hash of the key that was displaced when the table was created.
    pub(crate) hash: u32,
    pub(crate) pairs: Box<[Pair<K, V>]>,
}

/// The shared state every operation on one trie needs.
#[derive(Clone, Copy)]
pub(crate) struct TrieRef<'a> {
    pub(crate) config: FibConfig,
    pub(crate) len: &'a AtomicUsize,
}

/// Outcome of [`Segment::put`]. References are valid for the guard's lifetime.
pub(crate) enum RawPut<'g, V> {
    /// The key was absent; it has been inserted, or there was nothing to remove.
    Absent,
    /// The key was present with this value, which has been replaced or removed.
    Previous(&'g V),
    Conflict {
        actual: Option<&'g V>,
        rejected: Option<V>,
    },
}

/// Holds a key slot locked; dropping it puts the original pointer back.
struct SlotLock<'a, 'g, K, V> {
    slot: &'a Atomic<Node<K, V>>,
    restore: Shared<'g, Node<K, V>>,
}

impl<'a, 'g, K, V> SlotLock<'a, 'g, K, V> {
    fn acquire(
        slot: &'a Atomic<Node<K, V>>,
        current: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> Option<Self> {
        assert_eq!(current.tag() & LOCK_TAG, 0);

        slot.compare_exchange(
            current,
            current.with_tag(LOCK_TAG),
            Ordering::AcqRel,
            Ordering::Relaxed,
            guard,
        )
        .ok()
        .map(|_| SlotLock {
            slot,
            restore: current,
        })
    }

    fn release<P: Pointer<Node<K, V>>>(self, with: P) {
        self.slot.store(with, Ordering::Release);
        mem::forget(self);
    }
}

impl<K, V> Drop for SlotLock<'_, '_, K, V> {
    fn drop(&mut self) {
        self.slot.store(self.restore, Ordering::Release);
    }
}

/// The key and value a write may still have to insert.
///
/// The key node is built at most once, either up front from an owned key or
/// on first use from `make_key`, and is freed on drop unless it was published
/// into the trie.
pub(crate) struct Pending<'g, K, V, F> {
    make_key: Option<F>,
    node: Shared<'g, Node<K, V>>,
    value: Option<Owned<V>>,
}

impl<'g, K, V, F: FnOnce() -> K> Pending<'g, K, V, F> {
    pub(crate) fn new(make_key: F, value: Option<V>) -> Self {
        Pending {
            make_key: Some(make_key),
            node: Shared::null(),
            value: value.map(Owned::new),
        }
    }

    fn is_removal(&self) -> bool {
        self.value.is_none()
    }

    fn take_insert(
        &mut self,
        hash: u32,
        guard: &'g Guard,
    ) -> Option<(Shared<'g, Node<K, V>>, Owned<V>)> {
        let value = self.value.take()?;

        if self.node.is_null() {
            match self.make_key.take() {
                Some(make_key) => {
                    self.node = Owned::new(Node::Key {
                        hash,
                        key: make_key(),
                    })
                    .into_shared(guard);
                }
                None => {
                    self.value = Some(value);

                    return None;
                }
            }
        }

        Some((mem::replace(&mut self.node, Shared::null()), value))
    }

    /// Takes back the owned key if it was built but never published.
    pub(crate) fn into_key(mut self) -> Option<K> {
        let node = mem::replace(&mut self.node, Shared::null());

        if node.is_null() {
            return None;
        }

        match *unsafe { node.into_owned() }.into_box() {
            Node::Key { key, .. } => Some(key),
            _ => None,
        }
    }

    fn restore(&mut self, node: Shared<'g, Node<K, V>>, value: Owned<V>) {
        self.node = node;
        self.value = Some(value);
    }

    fn conflict(&mut self, actual: Option<&'g V>) -> RawPut<'g, V> {
        RawPut::Conflict {
            actual,
            rejected: self.value.take().map(|v| *v.into_box()),
        }
    }

    /// Decides a write that found no matching key. `None` means insert.
    fn settle_absent(&mut self, expected: &Expected<'_, V>, create: bool) -> Option<RawPut<'g, V>>
    where
        V: LikeEquals,
    {
        if !expected.accepts(None) {
            Some(self.conflict(None))
        } else if self.is_removal() {
            Some(RawPut::Absent)
        } else if !create {
            Some(self.conflict(None))
        } else {
            None
        }
    }
}

impl<'g, K, V> Pending<'g, K, V, fn() -> K> {
    /// Starts a write with an owned key, which the caller compares against
    /// through [`key`](Pending::key).
    pub(crate) fn with_key(hash: u32, key: K, value: Option<V>, guard: &'g Guard) -> Self {
        Pending {
            make_key: None,
            node: Owned::new(Node::Key { hash, key }).into_shared(guard),
            value: value.map(Owned::new),
        }
    }

    pub(crate) fn removal() -> Self {
        Pending {
            make_key: None,
            node: Shared::null(),
            value: None,
        }
    }

    /// The owned key. Valid until this `Pending` is dropped.
    pub(crate) fn key(&self) -> Option<&'g K> {
        match unsafe { self.node.as_ref() } {
            Some(Node::Key { key, .. }) => Some(key),
            _ => None,
        }
    }
}

impl<K, V, F> Drop for Pending<'_, K, V, F> {
    fn drop(&mut self) {
        if !self.node.is_null() {
            mem::drop(unsafe { self.node.into_owned() });
        }
    }
}

impl<K, V> Segment<K, V> {
    pub(crate) fn new(len: usize) -> Self {
        assert!(len.is_power_of_two());

        Segment {
            pairs: (0..len).map(|_| Pair::default()).collect(),
        }
    }

    fn pair(&self, hash: u32, depth: u32) -> &Pair<K, V> {
        let bits = fib::capacity_bits_of(self.pairs.len());

        &self.pairs[fib::key_index(hash, bits, depth) >> 1]
    }
}

impl<'g, K: 'g, V: 'g> Segment<K, V> {
    pub(crate) fn get<Q: ?Sized>(
        &'g self,
        guard: &'g Guard,
        max_depth: u32,
        hash: u32,
        key: &Q,
    ) -> Option<(&'g K, &'g V)>
    where
        K: LikeEquals<Q>,
    {
        let mut segment = self;
        let mut depth = 0;

        loop {
            assert!(depth < max_depth, "trie deeper than its maximum depth");

            let (key_ptr, value_ptr) = segment.pair(hash, depth).load(guard);

            match unsafe { Node::as_ref(key_ptr) } {
                SlotRef::Locked => thread::yield_now(),
                SlotRef::Empty => return None,
                SlotRef::Segment(next) => {
                    segment = next;
                    depth += 1;
                }
                SlotRef::Lpt(lpt) => return lpt.get(guard, hash, key),
                SlotRef::Key { hash: h, key: k } => {
                    if h != hash || !<K as LikeEquals<Q>>::is_live(k) || !k.is_like(key) {
                        return None;
                    }

                    match unsafe { value_ptr.as_ref() } {
                        Some(v) => return Some((k, v)),
                        None => thread::yield_now(),
                    }
                }
            }
        }
    }

    /// Conditionally inserts, replaces or removes the value of `key`.
    ///
    /// A `pending` without a value removes. The key is only made if a new pair
    /// is actually created.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn put<Q: ?Sized, F: FnOnce() -> K>(
        &'g self,
        trie: TrieRef<'_>,
        guard: &'g Guard,
        hash: u32,
        key: &Q,
        pending: &mut Pending<'g, K, V, F>,
        expected: Expected<'_, V>,
        create: bool,
    ) -> RawPut<'g, V>
    where
        K: LikeEquals<Q>,
        V: LikeEquals,
    {
        let max_depth = trie.config.max_depth();
        let mut segment = self;
        let mut depth = 0;

        loop {
            assert!(depth < max_depth, "trie deeper than its maximum depth");

            let pair = segment.pair(hash, depth);
            let (key_ptr, value_ptr) = pair.load(guard);

            match unsafe { Node::as_ref(key_ptr) } {
                SlotRef::Locked => thread::yield_now(),
                SlotRef::Segment(next) => {
                    segment = next;
                    depth += 1;
                }
                SlotRef::Lpt(lpt) => {
                    if let Some(lock) = SlotLock::acquire(&pair.key, key_ptr, guard) {
                        return lpt.put_locked(
                            lock,
                            trie,
                            guard,
                            hash,
                            key,
                            pending,
                            &expected,
                            create,
                        );
                    }
                }
                SlotRef::Empty => {
                    if let Some(settled) = pending.settle_absent(&expected, create) {
                        return settled;
                    }

                    let Some((node, value)) = pending.take_insert(hash, guard) else {
                        return RawPut::Absent;
                    };

                    match SlotLock::acquire(&pair.key, key_ptr, guard) {
                        Some(lock) => {
                            pair.value.store(value, Ordering::Release);
                            lock.release(node);
                            trie.len.fetch_add(1, Ordering::Relaxed);

                            return RawPut::Absent;
                        }
                        None => pending.restore(node, value),
                    }
                }
                SlotRef::Key { hash: h, key: k } => {
                    if !<K as LikeEquals<Q>>::is_live(k) {
                        reclaim(pair, key_ptr, trie, guard);
                    } else if h == hash && k.is_like(key) {
                        if value_ptr.is_null() {
                            thread::yield_now();
                            continue;
                        }

                        if !expected.accepts(unsafe { value_ptr.as_ref() }) {
                            return pending.conflict(unsafe { value_ptr.as_ref() });
                        }

                        let Some(lock) = SlotLock::acquire(&pair.key, key_ptr, guard) else {
                            continue;
                        };

                        // nobody can change the value while we hold the slot
                        let value_ptr = pair.value.load(Ordering::Acquire, guard);
                        let Some(current) = (unsafe { value_ptr.as_ref() }) else {
                            continue;
                        };

                        if !expected.accepts(Some(current)) {
                            return pending.conflict(Some(current));
                        }

                        match pending.value.take() {
                            Some(value) => {
                                pair.value.store(value, Ordering::Release);
                                lock.release(key_ptr);
                            }
                            None => {
                                pair.value.store(Shared::null(), Ordering::Release);
                                lock.release(Shared::null());
                                unsafe { guard.defer_destroy(key_ptr) };
                                trie.len.fetch_sub(1, Ordering::Relaxed);
                            }
                        }

                        unsafe { guard.defer_destroy(value_ptr) };

                        return RawPut::Previous(current);
                    } else {
                        if let Some(settled) = pending.settle_absent(&expected, create) {
                            return settled;
                        }

                        if depth + 1 < max_depth {
                            split(pair, key_ptr, h, depth + 1, trie.config, guard);
                        } else {
                            spill(pair, key_ptr, h, guard);
                        }
                    }
                }
            }
        }
    }
}

/// Moves the key in `pair` one level down into a fresh segment.
fn split<'g, K, V>(
    pair: &Pair<K, V>,
    key_ptr: Shared<'g, Node<K, V>>,
    hash: u32,
    depth: u32,
    config: FibConfig,
    guard: &'g Guard,
) {
    let Some(lock) = SlotLock::acquire(&pair.key, key_ptr, guard) else {
        return;
    };

    let value_ptr = pair.value.load(Ordering::Acquire, guard);
    let child = Segment::new(config.pairs_per_segment());
    let target = child.pair(hash, depth);
    target.value.store(value_ptr, Ordering::Relaxed);
    target.key.store(key_ptr, Ordering::Relaxed);

    pair.value.store(Shared::null(), Ordering::Release);
    lock.release(Owned::new(Node::Segment(child)));

    trace!(depth, "split a colliding slot into a new segment");
}

/// Replaces the key in `pair` with a linear probing table holding it.
fn spill<'g, K, V>(
    pair: &Pair<K, V>,
    key_ptr: Shared<'g, Node<K, V>>,
    hash: u32,
    guard: &'g Guard,
) {
    let Some(lock) = SlotLock::acquire(&pair.key, key_ptr, guard) else {
        return;
    };

    let value_ptr = pair.value.load(Ordering::Acquire, guard);
    let lpt = Lpt::with_len(hash, LPT_CHUNK);
    lpt.pairs[0].value.store(value_ptr, Ordering::Relaxed);
    lpt.pairs[0].key.store(key_ptr, Ordering::Relaxed);

    pair.value.store(Shared::null(), Ordering::Release);
    lock.release(Owned::new(Node::Lpt(lpt)));

    trace!(hash, "created a linear probing table");
}

/// Empties a slot whose key is no longer live.
fn reclaim<'g, K, V>(
    pair: &Pair<K, V>,
    key_ptr: Shared<'g, Node<K, V>>,
    trie: TrieRef<'_>,
    guard: &'g Guard,
) {
    let Some(lock) = SlotLock::acquire(&pair.key, key_ptr, guard) else {
        return;
    };

    let value_ptr = pair.value.swap(Shared::null(), Ordering::AcqRel, guard);
    lock.release(Shared::null());

    unsafe { defer_destroy_pair(guard, key_ptr, value_ptr) };
    trie.len.fetch_sub(1, Ordering::Relaxed);

    debug!("reclaimed the slot of a dead key");
}

/// # Safety
///
/// Both pointers must have been unlinked from the trie.
unsafe fn defer_destroy_pair<'g, K, V>(
    guard: &'g Guard,
    key_ptr: Shared<'g, Node<K, V>>,
    value_ptr: Shared<'g, V>,
) {
    guard.defer_destroy(key_ptr.with_tag(0));

    if !value_ptr.is_null() {
        guard.defer_destroy(value_ptr);
    }
}

impl<K, V> Lpt<K, V> {
    fn with_len(hash: u32, len: usize) -> Self {
        Lpt {
            hash,
            pairs: (0..len).map(|_| Pair::default()).collect(),
        }
    }
}

impl<'g, K: 'g, V: 'g> Lpt<K, V> {
    fn get<Q: ?Sized>(&'g self, guard: &'g Guard, hash: u32, key: &Q) -> Option<(&'g K, &'g V)>
    where
        K: LikeEquals<Q>,
    {
        let mut i = 0;

        while i < self.pairs.len() {
            let (key_ptr, value_ptr) = self.pairs[i].load(guard);

            if let SlotRef::Key { hash: h, key: k } = unsafe { Node::as_ref(key_ptr) } {
                if h == hash && <K as LikeEquals<Q>>::is_live(k) && k.is_like(key) {
                    match unsafe { value_ptr.as_ref() } {
                        Some(v) => return Some((k, v)),
                        None => {
                            thread::yield_now();
                            continue;
                        }
                    }
                }
            }

            i += 1;
        }

        None
    }

    /// Runs a write while holding the key slot that points to this table.
    #[allow(clippy::too_many_arguments)]
    fn put_locked<Q: ?Sized, F: FnOnce() -> K>(
        &'g self,
        lock: SlotLock<'_, 'g, K, V>,
        trie: TrieRef<'_>,
        guard: &'g Guard,
        hash: u32,
        key: &Q,
        pending: &mut Pending<'g, K, V, F>,
        expected: &Expected<'_, V>,
        create: bool,
    ) -> RawPut<'g, V>
    where
        K: LikeEquals<Q>,
        V: LikeEquals,
    {
        let self_ptr = lock.restore;
        let mut vacant = None;

        for (i, pair) in self.pairs.iter().enumerate() {
            let key_ptr = pair.key.load(Ordering::Acquire, guard);
            let value_ptr = pair.value.load(Ordering::Acquire, guard);

            let (h, k) = match unsafe { Node::as_ref(key_ptr) } {
                SlotRef::Key { hash, key } => (hash, key),
                SlotRef::Empty => {
                    vacant.get_or_insert(i);
                    continue;
                }
                SlotRef::Locked | SlotRef::Segment(_) | SlotRef::Lpt(_) => {
                    unreachable!("linear probing tables only hold keys")
                }
            };

            if !<K as LikeEquals<Q>>::is_live(k) {
                pair.key.store(Shared::null(), Ordering::Release);
                pair.value.store(Shared::null(), Ordering::Release);
                unsafe { defer_destroy_pair(guard, key_ptr, value_ptr) };
                trie.len.fetch_sub(1, Ordering::Relaxed);
                vacant.get_or_insert(i);

                debug!("reclaimed a dead key from a linear probing table");

                continue;
            }

            if h != hash || !k.is_like(key) {
                continue;
            }

            let current = unsafe { value_ptr.as_ref() };

            if !expected.accepts(current) {
                return pending.conflict(current);
            }

            match pending.value.take() {
                Some(value) => {
                    pair.value.store(value, Ordering::Release);

                    if !value_ptr.is_null() {
                        unsafe { guard.defer_destroy(value_ptr) };
                    }
                }
                None => {
                    pair.key.store(Shared::null(), Ordering::Release);
                    pair.value.store(Shared::null(), Ordering::Release);
                    unsafe { defer_destroy_pair(guard, key_ptr, value_ptr) };
                    trie.len.fetch_sub(1, Ordering::Relaxed);
                }
            }

            lock.release(self_ptr);

            return match current {
                Some(current) => RawPut::Previous(current),
                None => RawPut::Absent,
            };
        }

        if let Some(settled) = pending.settle_absent(expected, create) {
            return settled;
        }

        let Some((node, value)) = pending.take_insert(hash, guard) else {
            return RawPut::Absent;
        };

        match vacant {
            Some(i) => {
                self.pairs[i].value.store(value, Ordering::Release);
                self.pairs[i].key.store(node, Ordering::Release);
                lock.release(self_ptr);
            }
            None => {
                let grown = Lpt::with_len(self.hash, self.pairs.len() + LPT_CHUNK);

                for (from, to) in self.pairs.iter().zip(grown.pairs.iter()) {
                    to.key.store(from.key.load(Ordering::Relaxed, guard), Ordering::Relaxed);
                    to.value.store(from.value.load(Ordering::Relaxed, guard), Ordering::Relaxed);
                }

                let last = &grown.pairs[self.pairs.len()];
                last.value.store(value, Ordering::Relaxed);
                last.key.store(node, Ordering::Relaxed);

                trace!(
                    hash = self.hash,
                    len = grown.pairs.len(),
                    "grew a linear probing table"
                );

                lock.release(Owned::new(Node::Lpt(grown)));

                // only the old pair array goes, the keys and values moved over
                unsafe { guard.defer_destroy(self_ptr) };
            }
        }

        trie.len.fetch_add(1, Ordering::Relaxed);

        RawPut::Absent
    }
}

/// Counts the live keys below `pairs`.
pub(crate) fn count<K: LikeEquals<K>, V>(pairs: &[Pair<K, V>], guard: &Guard) -> usize {
    let mut count = 0;
    let mut i = 0;

    while i < pairs.len() {
        let key_ptr = pairs[i].key.load(Ordering::Acquire, guard);

        match unsafe { Node::as_ref(key_ptr) } {
            SlotRef::Locked => {
                thread::yield_now();
                continue;
            }
            SlotRef::Empty => (),
            SlotRef::Key { key, .. } => {
                if <K as LikeEquals>::is_live(key) {
                    count += 1;
                }
            }
            SlotRef::Segment(segment) => count += self::count(&segment.pairs, guard),
            SlotRef::Lpt(lpt) => count += self::count(&lpt.pairs, guard),
        }

        i += 1;
    }

    count
}

/// Frees everything reachable from `pairs`.
///
/// # Safety
///
/// No other thread may access the trie, now or later.
pub(crate) unsafe fn destroy<K, V>(pairs: &[Pair<K, V>], guard: &Guard) {
    for pair in pairs.iter() {
        let value_ptr = pair.value.swap(Shared::null(), Ordering::Relaxed, guard);

        if !value_ptr.is_null() {
            mem::drop(value_ptr.into_owned());
        }

        let key_ptr = pair
            .key
            .swap(Shared::null(), Ordering::Relaxed, guard)
            .with_tag(0);

        match key_ptr.as_ref() {
            None => continue,
            Some(Node::Key { .. }) => (),
            Some(Node::Segment(segment)) => destroy(&segment.pairs, guard),
            Some(Node::Lpt(lpt)) => destroy(&lpt.pairs, guard),
        }

        mem::drop(key_ptr.into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put<'g>(
        root: &'g Segment<String, i32>,
        trie: TrieRef<'_>,
        guard: &'g Guard,
        hash: u32,
        key: &str,
        expected: Expected<'_, i32>,
        value: Option<i32>,
    ) -> RawPut<'g, i32> {
        let mut pending = Pending::new(|| key.to_owned(), value);

        root.put(trie, guard, hash, key, &mut pending, expected, true)
    }

    fn get_value(
        root: &Segment<String, i32>,
        guard: &Guard,
        hash: u32,
        key: &str,
        config: FibConfig,
    ) -> Option<i32> {
        root.get(guard, config.max_depth(), hash, key)
            .map(|(_, v)| *v)
    }

    fn is_absent(result: RawPut<'_, i32>) -> bool {
        matches!(result, RawPut::Absent)
    }

    fn previous(result: RawPut<'_, i32>) -> Option<i32> {
        match result {
            RawPut::Previous(v) => Some(*v),
            _ => None,
        }
    }

    #[test]
    fn get_insert_remove() {
        let config = FibConfig::DEFAULT;
        let len = AtomicUsize::new(0);
        let trie = TrieRef { config, len: &len };
        let root = Segment::new(config.pairs_per_segment());
        let guard = &crossbeam_epoch::pin();

        assert_eq!(get_value(&root, guard, 1, "foo", config), None);

        assert!(is_absent(put(&root, trie, guard, 1, "foo", Expected::Any, Some(5))));
        assert!(is_absent(put(&root, trie, guard, 2, "bar", Expected::Any, Some(10))));
        assert_eq!(len.load(Ordering::Relaxed), 2);

        assert_eq!(get_value(&root, guard, 1, "foo", config), Some(5));
        assert_eq!(get_value(&root, guard, 2, "bar", config), Some(10));
        assert_eq!(get_value(&root, guard, 2, "foo", config), None);

        assert_eq!(previous(put(&root, trie, guard, 1, "foo", Expected::Any, Some(6))), Some(5));
        assert_eq!(previous(put(&root, trie, guard, 1, "foo", Expected::Any, None)), Some(6));
        assert!(is_absent(put(&root, trie, guard, 1, "foo", Expected::Any, None)));
        assert_eq!(len.load(Ordering::Relaxed), 1);
        assert_eq!(count(&root.pairs, guard), 1);

        unsafe { destroy(&root.pairs, guard) };
    }

    #[test]
    fn colliding_hashes_split_segments() {
        let config = FibConfig::DEFAULT;
        let len = AtomicUsize::new(0);
        let trie = TrieRef { config, len: &len };
        let root = Segment::new(config.pairs_per_segment());
        let guard = &crossbeam_epoch::pin();

        // same index on the first level, different below
        let a = 0x0000_0001;
        let b = (0..u32::MAX)
            .find(|&h| {
                h != a
                    && fib::index_of(h, 4, 0) == fib::index_of(a, 4, 0)
                    && fib::index_of(h, 4, 1) != fib::index_of(a, 4, 1)
            })
            .unwrap();

        assert!(is_absent(put(&root, trie, guard, a, "a", Expected::Any, Some(1))));
        assert!(is_absent(put(&root, trie, guard, b, "b", Expected::Any, Some(2))));

        let slot = root.pair(a, 0).key.load(Ordering::Acquire, guard);
        assert!(matches!(unsafe { Node::as_ref(slot) }, SlotRef::Segment(_)));

        assert_eq!(get_value(&root, guard, a, "a", config), Some(1));
        assert_eq!(get_value(&root, guard, b, "b", config), Some(2));
        assert_eq!(count(&root.pairs, guard), 2);

        unsafe { destroy(&root.pairs, guard) };
    }

    #[test]
    fn identical_hashes_fall_back_to_linear_probing() {
        let config = FibConfig::new(4, 2).unwrap();
        let len = AtomicUsize::new(0);
        let trie = TrieRef { config, len: &len };
        let root = Segment::new(config.pairs_per_segment());
        let guard = &crossbeam_epoch::pin();
        let keys: Vec<String> = (0..(3 * LPT_CHUNK)).map(|i| format!("key{}", i)).collect();

        for (i, key) in keys.iter().enumerate() {
            assert!(is_absent(put(&root, trie, guard, 42, key, Expected::Absent, Some(i as i32))));
        }

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(get_value(&root, guard, 42, key, config), Some(i as i32));
        }

        assert_eq!(len.load(Ordering::Relaxed), keys.len());
        assert_eq!(count(&root.pairs, guard), keys.len());

        assert_eq!(previous(put(&root, trie, guard, 42, "key3", Expected::Value(&3), None)), Some(3));
        assert_eq!(get_value(&root, guard, 42, "key3", config), None);
        assert!(is_absent(put(&root, trie, guard, 42, "key3", Expected::Absent, Some(33))));
        assert_eq!(get_value(&root, guard, 42, "key3", config), Some(33));
        assert_eq!(len.load(Ordering::Relaxed), keys.len());

        unsafe { destroy(&root.pairs, guard) };
    }

    #[test]
    fn preconditions() {
        let config = FibConfig::DEFAULT;
        let len = AtomicUsize::new(0);
        let trie = TrieRef { config, len: &len };
        let root = Segment::new(config.pairs_per_segment());
        let guard = &crossbeam_epoch::pin();

        match put(&root, trie, guard, 7, "k", Expected::Value(&1), Some(2)) {
            RawPut::Conflict { actual, rejected } => {
                assert_eq!(actual, None);
                assert_eq!(rejected, Some(2));
            }
            _ => panic!("expected a conflict"),
        }

        assert!(is_absent(put(&root, trie, guard, 7, "k", Expected::Void, Some(1))));

        match put(&root, trie, guard, 7, "k", Expected::Absent, Some(2)) {
            RawPut::Conflict { actual, .. } => assert_eq!(actual, Some(&1)),
            _ => panic!("expected a conflict"),
        }

        let mut pending = Pending::new(|| "x".to_owned(), Some(1));
        let not_created = root.put(trie, guard, 8, "x", &mut pending, Expected::Any, false);
        assert!(matches!(not_created, RawPut::Conflict { actual: None, .. }));
        assert_eq!(get_value(&root, guard, 8, "x", config), None);

        unsafe { destroy(&root.pairs, guard) };
    }

    #[test]
    fn owned_key_is_published_once() {
        let config = FibConfig::DEFAULT;
        let len = AtomicUsize::new(0);
        let trie = TrieRef { config, len: &len };
        let root = Segment::new(config.pairs_per_segment());
        let guard = &crossbeam_epoch::pin();

        let mut unpublished = Vec::new();

        for value in 0..2 {
            let mut pending = Pending::with_key(3, "k".to_owned(), Some(value), guard);
            let key = pending.key().unwrap();
            root.put(trie, guard, 3, key.as_str(), &mut pending, Expected::Any, true);
            unpublished.push(pending.into_key());
        }

        assert_eq!(unpublished, [None, Some("k".to_owned())]);
        assert_eq!(len.load(Ordering::Relaxed), 1);
        assert_eq!(get_value(&root, guard, 3, "k", config), Some(1));

        unsafe { destroy(&root.pairs, guard) };
    }
}
