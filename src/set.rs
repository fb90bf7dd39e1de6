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

//! A concurrent set of shared values held by weak, soft or strong
//! references.

use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

use crate::{
    fib,
    like::LikeEquals,
    map::{segment::Pending, segment::RawPut, DefaultHashBuilder, Expected, FibConfig, FibMap},
};

/// How strongly a [`FibSet`] holds on to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RefType {
    /// The set does not keep the value alive. Once every other `Arc` is gone
    /// the entry is dead and its slot is reused.
    Weak = 0,
    /// Kept alive until [`FibSet::trim_soft`] is called.
    Soft = 1,
    /// Kept alive until removed.
    Strong = 2,
}

impl RefType {
    fn from_u8(value: u8) -> RefType {
        match value {
            0 => RefType::Weak,
            1 => RefType::Soft,
            _ => RefType::Strong,
        }
    }
}

/// The entry a [`FibSet`] stores for a value.
pub struct FibRef<T: ?Sized> {
    weak: Weak<T>,
    pin: Mutex<Option<Arc<T>>>,
    ref_type: AtomicU8,
}

impl<T: ?Sized> FibRef<T> {
    fn new(value: &Arc<T>, ref_type: RefType) -> Self {
        let pin = match ref_type {
            RefType::Weak => None,
            RefType::Soft | RefType::Strong => Some(Arc::clone(value)),
        };

        FibRef {
            weak: Arc::downgrade(value),
            pin: Mutex::new(pin),
            ref_type: AtomicU8::new(ref_type as u8),
        }
    }

    /// Returns the value, unless it was dropped.
    pub fn get(&self) -> Option<Arc<T>> {
        self.weak.upgrade()
    }

    pub fn ref_type(&self) -> RefType {
        RefType::from_u8(self.ref_type.load(Ordering::Acquire))
    }

    /// Holds `value` at least as strongly as `ref_type`. Never weakens.
    fn raise(&self, value: &Arc<T>, ref_type: RefType) {
        if ref_type <= self.ref_type() {
            return;
        }

        let mut pin = self.pin.lock();

        if ref_type > self.ref_type() {
            pin.get_or_insert_with(|| Arc::clone(value));
            self.ref_type.store(ref_type as u8, Ordering::Release);
        }
    }

    fn trim_soft(&self) -> bool {
        if self.ref_type() != RefType::Soft {
            return false;
        }

        let mut pin = self.pin.lock();

        if self.ref_type() != RefType::Soft {
            return false;
        }

        self.ref_type.store(RefType::Weak as u8, Ordering::Release);
        pin.take().is_some()
    }
}

impl<T: ?Sized + PartialEq> LikeEquals<T> for FibRef<T> {
    fn is_like(&self, other: &T) -> bool {
        self.get().map_or(false, |value| *value == *other)
    }

    fn is_live(&self) -> bool {
        self.weak.strong_count() > 0
    }
}

impl<T: ?Sized + PartialEq> LikeEquals for FibRef<T> {
    fn is_like(&self, other: &Self) -> bool {
        match (self.get(), other.get()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b) || *a == *b,
            _ => false,
        }
    }

    fn is_live(&self) -> bool {
        self.weak.strong_count() > 0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for FibRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibRef")
            .field("value", &self.get())
            .field("ref_type", &self.ref_type())
            .finish()
    }
}

/// A lockfree concurrent set of shared values.
///
/// Adding a value that is already present returns the `Arc` the set knows,
/// so equal values collapse into one allocation. Each entry remembers how
/// strongly it is held; adding it again with a stronger [`RefType`]
/// strengthens it, a weaker one is ignored.
pub struct FibSet<T: ?Sized, S = DefaultHashBuilder> {
    map: FibMap<FibRef<T>, (), S>,
}

impl<T: ?Sized> FibSet<T, DefaultHashBuilder> {
    pub fn new() -> Self {
        FibSet {
            map: FibMap::new(),
        }
    }

    pub fn with_config(config: FibConfig) -> Self {
        FibSet {
            map: FibMap::with_config(config),
        }
    }
}

impl<T: ?Sized, S> FibSet<T, S> {
    pub fn with_config_and_hasher(config: FibConfig, hash_builder: S) -> Self {
        FibSet {
            map: FibMap::with_config_and_hasher(config, hash_builder),
        }
    }

    /// Returns the number of entries, counting dead weak entries until their
    /// slot is reused.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<T: ?Sized + PartialEq, S> FibSet<T, S> {
    /// Counts the entries whose value is still alive.
    pub fn count(&self) -> usize {
        self.map.count()
    }

    /// Lets go of every soft reference, returning how many were released.
    pub fn trim_soft(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        self.map
            .iter(guard)
            .filter(|entry| entry.key().trim_soft())
            .count()
    }

    /// Calls `func` with every value that is still alive.
    pub fn for_each<F: FnMut(&Arc<T>)>(&self, mut func: F) {
        let guard = &crossbeam_epoch::pin();

        for entry in self.map.iter(guard) {
            if let Some(value) = entry.key().get() {
                func(&value);
            }
        }
    }

    pub(crate) fn get_hashed(&self, hash: u32, value: &T) -> Option<Arc<T>> {
        let guard = &crossbeam_epoch::pin();

        self.map
            .get_hashed(hash, value, guard)
            .and_then(|entry| entry.key().get())
    }

    /// Adds `value` under a hash computed by the caller and returns the
    /// canonical `Arc`.
    pub(crate) fn put_hashed(&self, hash: u32, value: Arc<T>, ref_type: RefType) -> Arc<T> {
        let guard = &crossbeam_epoch::pin();

        loop {
            let found = self
                .map
                .get_hashed(hash, &*value, guard)
                .and_then(|entry| entry.key().get().map(|found| (entry, found)));

            if let Some((entry, found)) = found {
                entry.key().raise(&found, ref_type);

                return found;
            }

            let inserted = {
                let mut pending = Pending::new(|| FibRef::new(&value, ref_type), Some(()));

                matches!(
                    self.map
                        .put_hashed(hash, &*value, &mut pending, Expected::Absent, true, guard),
                    RawPut::Absent
                )
            };

            if inserted {
                return value;
            }
        }
    }

    pub(crate) fn remove_hashed(&self, hash: u32, value: &T) -> bool {
        let guard = &crossbeam_epoch::pin();
        let mut pending = Pending::removal();

        let removed = matches!(
            self.map
                .put_hashed(hash, value, &mut pending, Expected::Any, false, guard),
            RawPut::Previous(_)
        );

        removed
    }
}

impl<T: ?Sized + PartialEq + Hash, S: BuildHasher> FibSet<T, S> {
    /// Adds a strongly held value.
    pub fn put(&self, value: Arc<T>) -> Arc<T> {
        self.put_with_ref(value, RefType::Strong)
    }

    pub fn put_soft(&self, value: Arc<T>) -> Arc<T> {
        self.put_with_ref(value, RefType::Soft)
    }

    pub fn put_weak(&self, value: Arc<T>) -> Arc<T> {
        self.put_with_ref(value, RefType::Weak)
    }

    /// Adds `value` held by `ref_type`, or strengthens the entry of an equal
    /// value that is already present. Returns the `Arc` the set holds.
    pub fn put_with_ref(&self, value: Arc<T>, ref_type: RefType) -> Arc<T> {
        self.put_hashed(self.hash(&*value), value, ref_type)
    }

    pub fn get(&self, value: &T) -> Option<Arc<T>> {
        self.get_hashed(self.hash(value), value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// Removes the entry of `value`, returning whether there was one.
    pub fn remove(&self, value: &T) -> bool {
        self.remove_hashed(self.hash(value), value)
    }

    fn hash(&self, value: &T) -> u32 {
        let mut hasher = self.map.hasher().build_hasher();
        value.hash(&mut hasher);

        fib::fold_hash(hasher.finish())
    }
}

impl<T: ?Sized> Default for FibSet<T, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}
