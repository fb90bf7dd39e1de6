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

//! Process-wide interning of strings.

use std::{
    borrow::Cow,
    sync::{Arc, OnceLock},
};

use tracing::error;
use unicode_normalization::{is_nfkc_quick, IsNormalized, UnicodeNormalization};

use crate::{
    map::FibConfig,
    set::{FibSet, RefType},
};

/// The empty string. [`StringCache::intern`] never stores it.
pub const EMPTY: &str = "";

/// An interning cache of strings.
///
/// Interning returns the same `Arc<str>` for every string with equal content
/// after NFKC normalization, so interned strings can be compared with
/// [`Arc::ptr_eq`]. The cache only holds weak references: a string stays
/// interned for as long as somebody else holds it, after which its slot is
/// reused.
///
/// Strings are addressed by a 31-multiplier hash over their UTF-16 code units,
/// which parsers can compute while they read a string with
/// [`hash_step`](StringCache::hash_step) and hand in through
/// [`intern_hashed`](StringCache::intern_hashed).
pub struct StringCache {
    set: FibSet<str>,
}

impl StringCache {
    pub fn new() -> Self {
        StringCache {
            set: FibSet::with_config(FibConfig::STRING_CACHE),
        }
    }

    /// The process-wide cache.
    pub fn global() -> &'static StringCache {
        static GLOBAL: OnceLock<StringCache> = OnceLock::new();

        GLOBAL.get_or_init(StringCache::new)
    }

    /// The canonical empty string, shared by every cache.
    pub fn empty() -> Arc<str> {
        static EMPTY_STR: OnceLock<Arc<str>> = OnceLock::new();

        Arc::clone(EMPTY_STR.get_or_init(|| Arc::from(EMPTY)))
    }

    /// Feeds one UTF-16 code unit into a string hash. The hash of the empty
    /// string is 0.
    pub const fn hash_step(hash: u32, unit: u16) -> u32 {
        hash.wrapping_mul(31).wrapping_add(unit as u32)
    }

    pub fn hash_of(chars: &str) -> u32 {
        chars.encode_utf16().fold(0, Self::hash_step)
    }

    /// Returns the interned string equal to `chars`.
    pub fn intern(&self, chars: &str) -> Arc<str> {
        if chars.is_empty() {
            return Self::empty();
        }

        let normalized = normalize(chars);
        let hash = Self::hash_of(&normalized);

        self.intern_normalized(&normalized, hash)
    }

    /// Like [`intern`](StringCache::intern) with the hash of `chars` already
    /// computed by the caller.
    ///
    /// A hash that does not match the string is a bug in the caller. It is
    /// logged, and the string is interned under its real hash.
    pub fn intern_hashed(&self, chars: &str, hash: u32) -> Arc<str> {
        if chars.is_empty() {
            return Self::empty();
        }

        match normalize(chars) {
            Cow::Borrowed(chars) => self.intern_normalized(chars, hash),
            Cow::Owned(normalized) => {
                let hash = Self::hash_of(&normalized);

                self.intern_normalized(&normalized, hash)
            }
        }
    }

    fn intern_normalized(&self, chars: &str, mut hash: u32) -> Arc<str> {
        loop {
            if let Some(found) = self.set.get_hashed(hash, chars) {
                return found;
            }

            let actual = Self::hash_of(chars);

            if actual == hash {
                return self.set.put_hashed(hash, Arc::from(chars), RefType::Weak);
            }

            error!(
                given = hash,
                actual,
                "string hash does not match its characters, interning under the actual hash"
            );

            hash = actual;
        }
    }

    /// Returns the interned string equal to `chars` without interning it.
    pub fn get(&self, chars: &str) -> Option<Arc<str>> {
        if chars.is_empty() {
            return Some(Self::empty());
        }

        let normalized = normalize(chars);

        self.set.get_hashed(Self::hash_of(&normalized), &normalized)
    }

    /// Returns the number of slots in use, including strings that were dropped
    /// but whose slot was not reused yet.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Counts the strings that are still alive.
    pub fn count(&self) -> usize {
        self.set.count()
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn normalize(chars: &str) -> Cow<'_, str> {
    match is_nfkc_quick(chars.chars()) {
        IsNormalized::Yes => Cow::Borrowed(chars),
        IsNormalized::No | IsNormalized::Maybe => Cow::Owned(chars.nfkc().collect()),
    }
}

/// Interns `chars` in the process-wide cache.
pub fn intern(chars: &str) -> Arc<str> {
    StringCache::global().intern(chars)
}

/// Looks `chars` up in the process-wide cache without interning it.
pub fn get(chars: &str) -> Option<Arc<str>> {
    StringCache::global().get(chars)
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    #[test]
    fn hash_matches_utf16_string_hash() {
        assert_eq!(StringCache::hash_of(""), 0);
        assert_eq!(StringCache::hash_of("a"), 97);
        assert_eq!(StringCache::hash_of("hello"), 99_162_322);
        assert_eq!(
            StringCache::hash_of("hello"),
            "hello"
                .bytes()
                .fold(0, |h, b| StringCache::hash_step(h, u16::from(b)))
        );
        // one astral code point is two code units
        assert_eq!(
            StringCache::hash_of("\u{1F600}"),
            StringCache::hash_step(StringCache::hash_step(0, 0xD83D), 0xDE00)
        );
    }

    #[test]
    fn intern_is_idempotent() {
        let cache = StringCache::new();
        let a = cache.intern("features");
        let b = cache.intern(&String::from("features"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&*a, "features");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn strings_with_equal_hashes_stay_distinct() {
        // "Aa" and "BB" hash alike, so every string of six such pairs does too
        let mut strings: Vec<String> = (0..64u32)
            .map(|bits| {
                (0..6)
                    .map(|i| if bits & (1 << i) == 0 { "Aa" } else { "BB" })
                    .collect()
            })
            .collect();

        let hash = StringCache::hash_of(&strings[0]);
        assert!(strings.iter().all(|s| StringCache::hash_of(s) == hash));
        assert_eq!(StringCache::hash_of("Aa"), StringCache::hash_of("BB"));

        strings.push("Aa".to_owned());
        strings.push("BB".to_owned());

        let cache = StringCache::new();
        let interned: Vec<_> = strings.iter().map(|s| cache.intern(s)).collect();

        for (string, first) in strings.iter().zip(&interned) {
            assert_eq!(&**first, string.as_str());
            assert!(Arc::ptr_eq(first, &cache.intern(string)));
            assert!(Arc::ptr_eq(first, &cache.get(string).expect("interned")));
        }

        assert_eq!(cache.count(), 66);
    }

    #[test]
    fn intern_normalizes() {
        let cache = StringCache::new();
        let composed = cache.intern("caf\u{e9}");
        let decomposed = cache.intern("cafe\u{301}");

        assert!(Arc::ptr_eq(&composed, &decomposed));
        assert_eq!(&*decomposed, "caf\u{e9}");

        // compatibility forms fold too
        let ligature = cache.intern("\u{fb01}le");
        assert_eq!(&*ligature, "file");
        assert!(Arc::ptr_eq(&ligature, &cache.intern("file")));
    }

    #[test]
    fn empty_string_is_shared() {
        let cache = StringCache::new();

        assert!(Arc::ptr_eq(&cache.intern(""), &StringCache::empty()));
        assert!(Arc::ptr_eq(&cache.intern_hashed("", 42), &StringCache::empty()));
        assert!(cache.get("").is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn get_does_not_intern() {
        let cache = StringCache::new();

        assert!(cache.get("id").is_none());
        assert!(cache.is_empty());

        let id = cache.intern("id");
        let found = cache.get("id").expect("interned string is found");
        assert!(Arc::ptr_eq(&id, &found));
    }

    #[test]
    fn dropped_strings_are_forgotten() {
        let cache = StringCache::new();
        let first = cache.intern("transient");
        drop(first);

        assert!(cache.get("transient").is_none());
        assert_eq!(cache.count(), 0);

        let second = cache.intern("transient");
        assert_eq!(&*second, "transient");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn wrong_hash_heals() {
        let cache = StringCache::new();
        let right = cache.intern("properties");
        let wrong = cache.intern_hashed("properties", 12345);
        let fresh = cache.intern_hashed("geometry", 12345);

        assert!(Arc::ptr_eq(&right, &wrong));
        assert!(Arc::ptr_eq(&fresh, &cache.intern("geometry")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn intern_hashed_accepts_parser_hashes() {
        let cache = StringCache::new();
        let text = "tags";
        let hash = text
            .encode_utf16()
            .fold(0, StringCache::hash_step);

        assert!(Arc::ptr_eq(
            &cache.intern_hashed(text, hash),
            &cache.intern(text)
        ));
    }

    #[test]
    fn global_cache() {
        let a = intern("global-cache-test");
        let b = StringCache::global().intern("global-cache-test");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(get("global-cache-test").is_some());
    }

    #[test]
    fn concurrent_intern() {
        const NUM_THREADS: usize = 32;
        const NUM_STRINGS: usize = 256;

        let cache = Arc::new(StringCache::new());
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);

                thread::spawn(move || {
                    barrier.wait();

                    (0..NUM_STRINGS)
                        .map(|i| cache.intern(&format!("key-{}", i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<_> = threads
            .into_iter()
            .map(|t| t.join().expect("thread panicked"))
            .collect();

        for interned in results.iter() {
            for (a, b) in interned.iter().zip(results[0].iter()) {
                assert!(Arc::ptr_eq(a, b));
            }
        }

        assert_eq!(cache.count(), NUM_STRINGS);
    }
}
