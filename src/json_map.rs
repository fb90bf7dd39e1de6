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

//! A concurrent string-keyed map for JSON-like object graphs.

use std::{fmt, hash::BuildHasher, sync::Arc};

use crossbeam_epoch::Guard;

use crate::{
    like::LikeEquals,
    map::{DefaultHashBuilder, Expected, FibConfig, FibMap, FibMapEntry, Iter, PutResult},
    string_cache::{self, StringCache},
};

/// A concurrent map from interned strings to values.
///
/// Every key is NFKC normalized, and keys written into the map are interned in
/// the process-wide [`StringCache`], so maps with the same field names share
/// their key strings. Lookups normalize too, but never intern.
///
/// Conditional updates ([`compute`](JsonMap::compute),
/// [`merge`](JsonMap::merge) and friends) read the current value, compute a new
/// one and write it only if the stored value is still like the one read,
/// retrying otherwise. Their closures may therefore run more than once.
pub struct JsonMap<V, S = DefaultHashBuilder> {
    map: FibMap<Arc<str>, V, S>,
}

impl<V> JsonMap<V, DefaultHashBuilder> {
    pub fn new() -> Self {
        JsonMap {
            map: FibMap::new(),
        }
    }
}

impl<V, S> JsonMap<V, S> {
    pub fn with_hasher(hash_builder: S) -> Self {
        JsonMap {
            map: FibMap::with_config_and_hasher(FibConfig::DEFAULT, hash_builder),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates the pairs, see [`Iter`] for the guarantees under concurrent
    /// writes.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, Arc<str>, V> {
        self.map.iter(guard)
    }

    pub fn keys<'g>(&'g self, guard: &'g Guard) -> impl Iterator<Item = &'g Arc<str>> + 'g {
        self.map.iter(guard).map(|entry| entry.key())
    }

    pub fn values<'g>(&'g self, guard: &'g Guard) -> impl Iterator<Item = &'g V> + 'g {
        self.map.iter(guard).map(|entry| entry.value())
    }
}

impl<V: LikeEquals, S> JsonMap<V, S> {
    /// Returns the first key mapped to a value like `value`.
    pub fn find_value(&self, value: &V) -> Option<Arc<str>> {
        let guard = &crossbeam_epoch::pin();

        self.map
            .search_value(None::<&str>, value, None, guard)
            .map(|entry| Arc::clone(entry.key()))
    }

    /// Returns the next key after `start_key` mapped to a value like `value`.
    pub fn find_value_after(&self, start_key: &str, value: &V) -> Option<Arc<str>> {
        let guard = &crossbeam_epoch::pin();
        let start_key = string_cache::normalize(start_key);

        self.map
            .search_value(Some(&*start_key), value, None, guard)
            .map(|entry| Arc::clone(entry.key()))
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.find_value(value).is_some()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

impl<V: LikeEquals + Clone, S: BuildHasher> JsonMap<V, S> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.map.get(&*string_cache::normalize(key))
    }

    pub fn get_or_default(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Invokes `func` with the value of `key` without cloning it.
    pub fn get_and<F: FnOnce(&V) -> T, T>(&self, key: &str, func: F) -> Option<T> {
        self.map.get_and(&*string_cache::normalize(key), func)
    }

    /// Returns the pair of `key`, valid while `guard` is.
    pub fn get_with<'g>(&'g self, key: &str, guard: &'g Guard) -> Option<FibMapEntry<'g, Arc<str>, V>> {
        self.map.get_with(&*string_cache::normalize(key), guard)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(&*string_cache::normalize(key))
    }

    /// Writes `value` under `key` unconditionally, returning the previous
    /// value.
    pub fn insert(&self, key: &str, value: V) -> Option<V> {
        self.write(key, Expected::Any, Some(value), true).previous()
    }

    /// Inserts `value` only if `key` is absent. Returns the value already
    /// present otherwise.
    pub fn put_if_absent(&self, key: &str, value: V) -> Option<V> {
        match self.write(key, Expected::Absent, Some(value), true) {
            PutResult::Conflict(conflict) => conflict.actual,
            PutResult::Absent | PutResult::Previous(_) => None,
        }
    }

    /// Replaces the value of `key` only if it is present.
    pub fn replace(&self, key: &str, value: V) -> Option<V> {
        self.write(key, Expected::Any, Some(value), false).previous()
    }

    /// Replaces the value of `key` only if it is like `expected`.
    pub fn replace_if(&self, key: &str, expected: &V, value: V) -> bool {
        !self
            .write(key, Expected::Value(expected), Some(value), false)
            .is_conflict()
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.map.remove(&*string_cache::normalize(key))
    }

    pub fn remove_or_default(&self, key: &str, default: V) -> V {
        self.remove(key).unwrap_or(default)
    }

    /// Removes `key` only if its value is like `expected`.
    pub fn remove_if(&self, key: &str, expected: &V) -> bool {
        matches!(
            self.write(key, Expected::Value(expected), None, false),
            PutResult::Previous(_)
        )
    }

    /// Sets `key` to what `func` makes of its current value, removing it if
    /// `func` returns `None`. Returns the new value.
    pub fn compute<F>(&self, key: &str, mut func: F) -> Option<V>
    where
        F: FnMut(&str, Option<&V>) -> Option<V>,
    {
        let key = string_cache::normalize(key);

        loop {
            let current = self.map.get(&*key);
            let computed = func(&key, current.as_ref());

            if current.is_none() && computed.is_none() {
                return None;
            }

            if self.write_current(&key, current.as_ref(), computed.clone()) {
                return computed;
            }
        }
    }

    /// Inserts what `func` makes for an absent `key`. Returns the value of
    /// `key` afterwards.
    pub fn compute_if_absent<F>(&self, key: &str, func: F) -> Option<V>
    where
        F: FnOnce(&str) -> Option<V>,
    {
        let key = string_cache::normalize(key);

        if let Some(current) = self.map.get(&*key) {
            return Some(current);
        }

        let computed = func(&key)?;

        match self.write(&key, Expected::Absent, Some(computed.clone()), true) {
            PutResult::Conflict(conflict) => conflict.actual,
            PutResult::Absent | PutResult::Previous(_) => Some(computed),
        }
    }

    /// Sets a present `key` to what `func` makes of its value, removing it if
    /// `func` returns `None`. Returns the new value.
    pub fn compute_if_present<F>(&self, key: &str, mut func: F) -> Option<V>
    where
        F: FnMut(&str, &V) -> Option<V>,
    {
        let key = string_cache::normalize(key);

        loop {
            let current = self.map.get(&*key)?;
            let computed = func(&key, &current);

            if self.write_current(&key, Some(&current), computed.clone()) {
                return computed;
            }
        }
    }

    /// Inserts `value` for an absent `key`, or sets `key` to what `func` makes
    /// of the current value and `value`. Returns the new value.
    pub fn merge<F>(&self, key: &str, value: V, mut func: F) -> Option<V>
    where
        F: FnMut(&V, &V) -> Option<V>,
    {
        let key = string_cache::normalize(key);

        loop {
            let current = self.map.get(&*key);
            let merged = match &current {
                Some(current) => func(current, &value),
                None => Some(value.clone()),
            };

            if self.write_current(&key, current.as_ref(), merged.clone()) {
                return merged;
            }
        }
    }

    /// Writes `new_value` if the value of `key` is still `current`.
    fn write_current(&self, key: &str, current: Option<&V>, new_value: Option<V>) -> bool {
        let expected = match current {
            Some(current) => Expected::Value(current),
            None => Expected::Absent,
        };

        !self.write(key, expected, new_value, true).is_conflict()
    }

    fn write(
        &self,
        key: &str,
        expected: Expected<'_, V>,
        new_value: Option<V>,
        create: bool,
    ) -> PutResult<Arc<str>, V> {
        let key = string_cache::normalize(key);

        self.map.put_with(
            &*key,
            || StringCache::global().intern(&key),
            expected,
            new_value,
            create,
        )
    }
}

impl<V> Default for JsonMap<V, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: AsRef<str>, V: LikeEquals + Clone, S: BuildHasher> Extend<(K, V)> for JsonMap<V, S> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key.as_ref(), value);
        }
    }
}

impl<K: AsRef<str>, V: LikeEquals + Clone> FromIterator<(K, V)> for JsonMap<V, DefaultHashBuilder> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = JsonMap::new();
        map.extend(iter);

        map
    }
}

impl<V: fmt::Debug, S> fmt::Debug for JsonMap<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.map, f)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use super::*;

    #[test]
    fn conditional_put_scenario() {
        let map: JsonMap<i32> = JsonMap::new();

        assert_eq!(map.get("a"), None);

        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.get("a"), Some(1));
        assert_eq!(map.len(), 1);

        assert!(!map.replace_if("a", &2, 3));
        assert_eq!(map.get("a"), Some(1));

        assert!(map.replace_if("a", &1, 3));
        assert_eq!(map.get("a"), Some(3));

        assert_eq!(map.remove("a"), Some(3));
        assert_eq!(map.get("a"), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn keys_are_interned() {
        let map = JsonMap::new();
        map.insert("caf\u{e9}", 1);
        map.insert("cafe\u{301}", 2);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("caf\u{e9}"), Some(2));

        let guard = &crossbeam_epoch::pin();
        let keys: Vec<_> = map.keys(guard).collect();
        assert_eq!(keys.len(), 1);
        assert!(Arc::ptr_eq(keys[0], &string_cache::intern("caf\u{e9}")));
    }

    #[test]
    fn put_if_absent_and_replace() {
        let map = JsonMap::new();

        assert_eq!(map.replace("x", 1), None);
        assert!(!map.contains_key("x"));

        assert_eq!(map.put_if_absent("x", 1), None);
        assert_eq!(map.put_if_absent("x", 2), Some(1));
        assert_eq!(map.replace("x", 3), Some(1));
        assert_eq!(map.get_or_default("x", 0), 3);
        assert_eq!(map.get_or_default("y", 0), 0);

        assert!(!map.remove_if("x", &1));
        assert!(map.remove_if("x", &3));
        assert_eq!(map.remove_or_default("x", 7), 7);
        assert!(map.is_empty());
    }

    #[test]
    fn compute_family() {
        let map: JsonMap<i32> = JsonMap::new();

        assert_eq!(map.compute_if_present("n", |_, v| Some(v + 1)), None);
        assert_eq!(map.compute_if_absent("n", |_| Some(1)), Some(1));
        assert_eq!(map.compute_if_absent("n", |_| Some(100)), Some(1));
        assert_eq!(map.compute_if_present("n", |_, v| Some(v + 1)), Some(2));
        assert_eq!(map.compute("n", |_, v| v.map(|v| v * 10)), Some(20));
        assert_eq!(map.merge("n", 5, |old, new| Some(old + new)), Some(25));
        assert_eq!(map.merge("m", 5, |old, new| Some(old + new)), Some(5));
        assert_eq!(map.len(), 2);

        assert_eq!(map.compute("n", |_, _| None), None);
        assert!(!map.contains_key("n"));
        assert_eq!(map.compute("never", |_, _| None), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn find_value() {
        let map: JsonMap<i32> = [("a", 1), ("b", 2), ("c", 1)].iter().copied().collect();

        let first = map.find_value(&1).expect("a key maps to 1");
        assert!(&*first == "a" || &*first == "c");

        let second = map
            .find_value_after(&first, &1)
            .expect("another key maps to 1");
        assert_ne!(first, second);
        assert!(map.find_value_after(&second, &1).is_none());

        assert!(map.find_value_after("missing", &1).is_none());
        assert!(map.contains_value(&2));
        assert!(!map.contains_value(&3));
    }

    #[test]
    fn clear_and_values() {
        let map: JsonMap<String> = (0..100)
            .map(|i| (format!("k{}", i), i.to_string()))
            .collect();

        assert_eq!(map.len(), 100);

        let guard = &crossbeam_epoch::pin();
        let mut values: Vec<_> = map.values(guard).cloned().collect();
        values.sort_unstable_by_key(|v| v.parse::<i32>().unwrap());
        assert_eq!(values, (0..100).map(|i| i.to_string()).collect::<Vec<_>>());

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.keys(guard).count(), 0);
        assert_eq!(map.values(guard).count(), 0);
    }

    #[test]
    fn concurrent_merge_counts_every_update() {
        const NUM_THREADS: usize = 16;
        const NUM_UPDATES: usize = 256;

        let map = Arc::new(JsonMap::new());
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);

                thread::spawn(move || {
                    barrier.wait();

                    for i in 0..NUM_UPDATES {
                        map.merge(&format!("counter-{}", i % 4), 1u64, |a, b| Some(a + b));
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().expect("thread panicked");
        }

        assert_eq!(map.len(), 4);

        let total: u64 = map.values(&crossbeam_epoch::pin()).sum();
        assert_eq!(total, (NUM_THREADS * NUM_UPDATES) as u64);
    }
}
