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

//! A lockfree concurrent hash trie addressed by Fibonacci hashing.

mod config;
mod iter;
pub(crate) mod segment;


pub use config::FibConfig;
pub use iter::{FibMapEntry, Iter};

use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::atomic::{self, AtomicUsize, Ordering},
};

use crossbeam_epoch::{self, Atomic, Guard, Owned, Shared};

use crate::{
    error::{Conflict, ExpectedValue},
    fib,
    like::LikeEquals,
};
use segment::{Pending, RawPut, Segment, TrieRef};

/// Default hasher for `FibMap`.
///
/// This is [aHash]. Its 64-bit output is folded to the 32 bits the trie
/// consumes.
///
/// [aHash]: https://docs.rs/ahash
pub type DefaultHashBuilder = ahash::RandomState;

/// The precondition of a [`FibMap::put`].
pub enum Expected<'a, V> {
    /// Write whatever is stored.
    Any,
    /// Write only if the key is absent or its value is void, see
    /// [`LikeEquals::is_void`].
    Void,
    /// Write only if the key is absent.
    Absent,
    /// Write only if the stored value is like this one.
    Value(&'a V),
}

impl<V> Expected<'_, V> {
    pub(crate) fn accepts(&self, current: Option<&V>) -> bool
    where
        V: LikeEquals,
    {
        match (self, current) {
            (Expected::Any, _) => true,
            (Expected::Absent, current) => current.is_none(),
            (Expected::Void, current) => current.map_or(true, <V as LikeEquals>::is_void),
            (Expected::Value(expected), Some(current)) => current.is_like(expected),
            (Expected::Value(_), None) => false,
        }
    }
}

impl<V: Clone> From<Expected<'_, V>> for ExpectedValue<V> {
    fn from(expected: Expected<'_, V>) -> Self {
        match expected {
            Expected::Any => ExpectedValue::Any,
            Expected::Void => ExpectedValue::Void,
            Expected::Absent => ExpectedValue::Absent,
            Expected::Value(v) => ExpectedValue::Value(v.clone()),
        }
    }
}

impl<V> Clone for Expected<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Expected<'_, V> {}

impl<V: fmt::Debug> fmt::Debug for Expected<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Any => f.write_str("Any"),
            Expected::Void => f.write_str("Void"),
            Expected::Absent => f.write_str("Absent"),
            Expected::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// The outcome of a [`FibMap::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutResult<K, V> {
    /// The key was absent. It is now present, unless the write was a removal.
    Absent,
    /// The key was present with this value, which was replaced or removed.
    Previous(V),
    /// The precondition failed and nothing was written.
    Conflict(Conflict<K, V>),
}

impl<K, V> PutResult<K, V> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, PutResult::Conflict(_))
    }

    /// The value that was replaced or removed, if any.
    pub fn previous(self) -> Option<V> {
        match self {
            PutResult::Previous(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Option<V>, Conflict<K, V>> {
        match self {
            PutResult::Absent => Ok(None),
            PutResult::Previous(v) => Ok(Some(v)),
            PutResult::Conflict(conflict) => Err(conflict),
        }
    }

    fn from_raw(raw: RawPut<'_, V>, key: Option<K>, expected: Expected<'_, V>) -> Self
    where
        V: Clone,
    {
        match raw {
            RawPut::Absent => PutResult::Absent,
            RawPut::Previous(v) => PutResult::Previous(v.clone()),
            RawPut::Conflict { actual, rejected } => PutResult::Conflict(Conflict {
                key,
                expected: expected.into(),
                actual: actual.cloned(),
                rejected,
            }),
        }
    }
}

/// A lockfree concurrent hash trie addressed by Fibonacci hashing.
///
/// Every level of the trie is a segment of `2^bits` key-value pairs. The
/// Fibonacci hash of a key selects a slot at each level, consuming the next
/// `bits` bits of the 32-bit hash per level. Two keys that collide in a slot
/// push it one level down into a fresh segment; keys that still collide on
/// the last level share a linear probing table. The trie never shrinks.
///
/// Reads never block. A write locks exactly one key slot by tagging its
/// pointer and is waited on by other threads that land on the same slot.
/// Memory is reclaimed through [`crossbeam_epoch`], so references handed out
/// under a [`Guard`] stay valid until the guard is dropped.
///
/// Keys are matched with [`LikeEquals`] rather than [`Eq`]. Any borrowed form
/// `Q` of the key can be used to look it up as long as `K: LikeEquals<Q>` and
/// `Q` hashes like `K`.
pub struct FibMap<K, V, S = DefaultHashBuilder> {
    root: Atomic<Segment<K, V>>,
    len: AtomicUsize,
    hash_builder: S,
    config: FibConfig,
}

impl<K, V> FibMap<K, V, DefaultHashBuilder> {
    /// Creates an empty `FibMap`.
    ///
    /// No segment is allocated until the first insertion.
    pub fn new() -> Self {
        Self::with_config_and_hasher(FibConfig::DEFAULT, DefaultHashBuilder::default())
    }

    pub fn with_config(config: FibConfig) -> Self {
        Self::with_config_and_hasher(config, DefaultHashBuilder::default())
    }
}

impl<K, V, S> FibMap<K, V, S> {
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_config_and_hasher(FibConfig::DEFAULT, hash_builder)
    }

    pub fn with_config_and_hasher(config: FibConfig, hash_builder: S) -> Self {
        FibMap {
            root: Atomic::null(),
            len: AtomicUsize::new(0),
            hash_builder,
            config,
        }
    }

    /// Returns the number of pairs whose insertion has completed.
    ///
    /// Keys that died since they were inserted (see
    /// [`LikeEquals::is_live`]) are counted until a write reclaims their slot.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> FibConfig {
        self.config
    }

    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    fn trie(&self) -> TrieRef<'_> {
        TrieRef {
            config: self.config,
            len: &self.len,
        }
    }

    fn root<'g>(&self, guard: &'g Guard) -> Option<&'g Segment<K, V>> {
        unsafe { self.root.load(Ordering::Acquire, guard).as_ref() }
    }

    fn get_or_create_root<'g>(&self, guard: &'g Guard) -> &'g Segment<K, V> {
        let mut root_ptr = self.root.load(Ordering::Acquire, guard);
        let mut maybe_new_root = None;

        loop {
            if let Some(root) = unsafe { root_ptr.as_ref() } {
                return root;
            }

            let new_root = match maybe_new_root.take() {
                Some(r) => r,
                None => Owned::new(Segment::new(self.config.pairs_per_segment())),
            };

            match self.root.compare_exchange_weak(
                Shared::null(),
                new_root,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(new_root) => root_ptr = new_root,
                Err(e) => {
                    maybe_new_root = Some(e.new);
                    root_ptr = e.current;
                }
            }
        }
    }
}

impl<K: LikeEquals, V, S> FibMap<K, V, S> {
    /// Counts the live keys by walking the whole trie.
    ///
    /// Unlike [`len`](FibMap::len) this skips dead keys that have not been
    /// reclaimed yet. It is linear in the size of the map.
    pub fn count(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        self.root(guard)
            .map_or(0, |root| segment::count(&root.pairs, guard))
    }

    /// Returns an iterator over the pairs of this map, valid while `guard` is.
    ///
    /// See [`Iter`] for what concurrent writes do to an iteration.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        Iter::new(
            self.root(guard).map(|root| &root.pairs[..]),
            self.config.max_depth(),
            guard,
        )
    }

    /// Finds the first pair whose value is like `value`.
    ///
    /// With a `start_key`, the search begins after the pair holding that key
    /// and finds nothing if the key is absent. This walks the whole trie.
    /// A pair that is found is also written into `reuse`, if given, so a
    /// caller stepping through matches can keep one entry.
    pub fn search_value<'g, Q: ?Sized>(
        &'g self,
        start_key: Option<&Q>,
        value: &V,
        reuse: Option<&mut FibMapEntry<'g, K, V>>,
        guard: &'g Guard,
    ) -> Option<FibMapEntry<'g, K, V>>
    where
        K: LikeEquals<Q>,
        V: LikeEquals,
    {
        let mut iter = self.iter(guard);

        if let Some(start_key) = start_key {
            iter.by_ref()
                .find(|entry| <K as LikeEquals<Q>>::is_like(entry.key(), start_key))?;
        }

        let (key, value) = iter
            .find(|entry| <V as LikeEquals>::is_like(entry.value(), value))?
            .into_pair();

        match reuse {
            Some(entry) => Some(*entry.with(key, value)),
            None => Some(FibMapEntry::new(key, value)),
        }
    }

    /// Removes every pair, one at a time.
    ///
    /// Pairs inserted concurrently may survive.
    pub fn clear(&self)
    where
        V: LikeEquals,
    {
        let guard = &crossbeam_epoch::pin();
        let mut iter = self.iter(guard);

        while let Some((hash, entry)) = iter.next_hashed() {
            self.put_hashed(
                hash,
                entry.key(),
                &mut Pending::removal(),
                Expected::Any,
                false,
                guard,
            );
        }
    }
}

impl<K: Hash + LikeEquals, V: LikeEquals, S: BuildHasher> FibMap<K, V, S> {
    /// Returns a copy of the value corresponding to `key`.
    ///
    /// `V` must implement [`Clone`], since the value may be removed by another
    /// thread at any moment. Use [`get_and`](FibMap::get_and) or
    /// [`get_with`](FibMap::get_with) otherwise.
    pub fn get<Q: ?Sized + Hash>(&self, key: &Q) -> Option<V>
    where
        K: LikeEquals<Q>,
        V: Clone,
    {
        self.get_and(key, V::clone)
    }

    /// Returns a copy of the key and value corresponding to `key`.
    pub fn get_key_value<Q: ?Sized + Hash>(&self, key: &Q) -> Option<(K, V)>
    where
        K: LikeEquals<Q> + Clone,
        V: Clone,
    {
        self.get_key_value_and(key, |k, v| (k.clone(), v.clone()))
    }

    /// Invokes `func` with a reference to the value corresponding to `key`.
    pub fn get_and<Q: ?Sized + Hash, F: FnOnce(&V) -> T, T>(&self, key: &Q, func: F) -> Option<T>
    where
        K: LikeEquals<Q>,
    {
        self.get_key_value_and(key, move |_, v| func(v))
    }

    /// Invokes `func` with references to the stored key and value
    /// corresponding to `key`.
    pub fn get_key_value_and<Q: ?Sized + Hash, F: FnOnce(&K, &V) -> T, T>(
        &self,
        key: &Q,
        func: F,
    ) -> Option<T>
    where
        K: LikeEquals<Q>,
    {
        let guard = &crossbeam_epoch::pin();

        self.get_with(key, guard)
            .map(move |entry| func(entry.key(), entry.value()))
    }

    /// Returns the pair corresponding to `key`, valid while `guard` is.
    pub fn get_with<'g, Q: ?Sized + Hash>(
        &'g self,
        key: &Q,
        guard: &'g Guard,
    ) -> Option<FibMapEntry<'g, K, V>>
    where
        K: LikeEquals<Q>,
    {
        self.get_hashed(self.hash(key), key, guard)
    }

    pub fn contains_key<Q: ?Sized + Hash>(&self, key: &Q) -> bool
    where
        K: LikeEquals<Q>,
    {
        self.get_and(key, |_| ()).is_some()
    }

    /// Inserts a pair, then returns a copy of the value previously associated
    /// with `key`.
    pub fn insert(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        self.insert_and(key, value, V::clone)
    }

    /// Inserts a pair, then invokes `func` with the value previously
    /// associated with `key`.
    pub fn insert_and<F: FnOnce(&V) -> T, T>(&self, key: K, value: V, func: F) -> Option<T> {
        let guard = &crossbeam_epoch::pin();

        match self.put_owned(key, Expected::Any, Some(value), true, guard).0 {
            RawPut::Previous(v) => Some(func(v)),
            _ => None,
        }
    }

    /// Removes `key`, then returns a copy of the value it was associated with.
    pub fn remove<Q: ?Sized + Hash>(&self, key: &Q) -> Option<V>
    where
        K: LikeEquals<Q>,
        V: Clone,
    {
        self.remove_and(key, V::clone)
    }

    /// Removes `key`, then invokes `func` with the value it was associated
    /// with.
    pub fn remove_and<Q: ?Sized + Hash, F: FnOnce(&V) -> T, T>(&self, key: &Q, func: F) -> Option<T>
    where
        K: LikeEquals<Q>,
    {
        let guard = &crossbeam_epoch::pin();
        let mut pending = Pending::removal();

        match self.put_hashed(self.hash(key), key, &mut pending, Expected::Any, false, guard) {
            RawPut::Previous(v) => Some(func(v)),
            _ => None,
        }
    }

    /// Conditionally inserts, replaces or removes the value of `key`.
    ///
    /// `new_value == None` removes the key. The write only happens if the
    /// stored value satisfies `expected`; otherwise a
    /// [`Conflict`](PutResult::Conflict) is returned that hands back the key,
    /// the precondition, the value found and the rejected new value. If
    /// `create` is false an absent key is not created and the call reports a
    /// conflict instead.
    pub fn put(
        &self,
        key: K,
        expected: Expected<'_, V>,
        new_value: Option<V>,
        create: bool,
    ) -> PutResult<K, V>
    where
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        let (raw, key) = self.put_owned(key, expected, new_value, create, guard);

        PutResult::from_raw(raw, key, expected)
    }

    /// Like [`put`](FibMap::put), but looks the key up by a borrowed form and
    /// only calls `make_key` if a new pair is actually created. A conflict
    /// carries no key unless `make_key` already ran.
    pub fn put_with<Q: ?Sized + Hash, F: FnOnce() -> K>(
        &self,
        key: &Q,
        make_key: F,
        expected: Expected<'_, V>,
        new_value: Option<V>,
        create: bool,
    ) -> PutResult<K, V>
    where
        K: LikeEquals<Q>,
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        let mut pending = Pending::new(make_key, new_value);

        let raw = self.put_hashed(
            self.hash(key),
            key,
            &mut pending,
            expected,
            create,
            guard,
        );

        PutResult::from_raw(raw, pending.into_key(), expected)
    }

    fn put_owned<'g>(
        &'g self,
        key: K,
        expected: Expected<'_, V>,
        new_value: Option<V>,
        create: bool,
        guard: &'g Guard,
    ) -> (RawPut<'g, V>, Option<K>) {
        let hash = self.hash(&key);
        let mut pending = Pending::with_key(hash, key, new_value, guard);

        let raw = match pending.key() {
            Some(key) => self.put_hashed(hash, key, &mut pending, expected, create, guard),
            None => RawPut::Absent,
        };

        (raw, pending.into_key())
    }

    fn hash<Q: ?Sized + Hash>(&self, key: &Q) -> u32 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);

        fib::fold_hash(hasher.finish())
    }
}

impl<K, V, S> FibMap<K, V, S> {
    /// Looks a key up by a hash computed by the caller.
    pub(crate) fn get_hashed<'g, Q: ?Sized>(
        &'g self,
        hash: u32,
        key: &Q,
        guard: &'g Guard,
    ) -> Option<FibMapEntry<'g, K, V>>
    where
        K: LikeEquals<Q>,
    {
        self.root(guard)?
            .get(guard, self.config.max_depth(), hash, key)
            .map(|(k, v)| FibMapEntry::new(k, v))
    }

    /// Writes with a hash computed by the caller.
    pub(crate) fn put_hashed<'g, Q: ?Sized, F: FnOnce() -> K>(
        &'g self,
        hash: u32,
        key: &Q,
        pending: &mut Pending<'g, K, V, F>,
        expected: Expected<'_, V>,
        create: bool,
        guard: &'g Guard,
    ) -> RawPut<'g, V>
    where
        K: LikeEquals<Q>,
        V: LikeEquals,
    {
        self.get_or_create_root(guard)
            .put(self.trie(), guard, hash, key, pending, expected, create)
    }
}

impl<K, V> Default for FibMap<K, V, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: LikeEquals + fmt::Debug, V: fmt::Debug, S> fmt::Debug for FibMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_epoch::pin();

        f.debug_map()
            .entries(self.iter(guard).map(FibMapEntry::into_pair))
            .finish()
    }
}

impl<K, V, S> Drop for FibMap<K, V, S> {
    fn drop(&mut self) {
        // ensure all loads have the most recent data available
        atomic::fence(Ordering::Acquire);

        let guard = unsafe { crossbeam_epoch::unprotected() };
        let root_ptr = self.root.swap(Shared::null(), Ordering::Relaxed, guard);

        if root_ptr.is_null() {
            return;
        }

        unsafe {
            segment::destroy(&root_ptr.deref().pairs, guard);
            drop(root_ptr.into_owned());
        }
    }
}
