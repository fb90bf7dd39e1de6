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

//! The equality relation used by the trie to match keys and values.

use std::sync::Arc;

/// An equality relation that may be broader than [`PartialEq`].
///
/// The trie never compares keys with `==`. It asks the stored key whether it
/// is like the key being looked up, which lets a stored key type answer for
/// other types (a stored `Arc<str>` for a looked up `str`, a weak string
/// wrapper for a plain `str`). Implementations for the other direction are
/// independent; implement both when the types are used both ways.
///
/// The two provided methods are only consulted for stored keys
/// ([`is_live`](LikeEquals::is_live)) and stored values
/// ([`is_void`](LikeEquals::is_void)) respectively.
pub trait LikeEquals<Rhs: ?Sized = Self> {
    fn is_like(&self, other: &Rhs) -> bool;

    /// Returns `false` once a stored key no longer refers to live data, for
    /// example a weak reference whose referent was dropped. A slot holding a
    /// dead key is vacant: lookups skip it and the next write that lands on
    /// it reclaims it.
    fn is_live(&self) -> bool {
        true
    }

    /// Returns `true` for values that count as null when a write expects
    /// [`Expected::Void`](crate::Expected::Void).
    fn is_void(&self) -> bool {
        false
    }
}

macro_rules! like_by_eq {
    ($($t:ty),* $(,)?) => {
        $(
            impl LikeEquals for $t {
                fn is_like(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

like_by_eq!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    str,
    String,
);

impl LikeEquals<str> for String {
    fn is_like(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl LikeEquals<String> for str {
    fn is_like(&self, other: &String) -> bool {
        self == other.as_str()
    }
}

impl<T: ?Sized + LikeEquals> LikeEquals for Arc<T> {
    fn is_like(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).is_like(&**other)
    }
}

impl LikeEquals<str> for Arc<str> {
    fn is_like(&self, other: &str) -> bool {
        &**self == other
    }
}

impl<T: LikeEquals> LikeEquals for Option<T> {
    fn is_like(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.is_like(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn is_void(&self) -> bool {
        self.is_none()
    }
}

#[cfg(feature = "serde")]
impl LikeEquals for serde_json::Value {
    fn is_like(&self, other: &Self) -> bool {
        self == other
    }

    fn is_void(&self) -> bool {
        self.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_compare_across_types() {
        let owned = String::from("lattice");
        let shared: Arc<str> = Arc::from("lattice");
        let other: Arc<str> = Arc::from("lattice");

        assert!(owned.is_like("lattice"));
        assert!("lattice".is_like(&owned));
        assert!(shared.is_like("lattice"));
        assert!(!shared.is_like("latticE"));
        assert!(shared.is_like(&other));
    }

    #[test]
    fn options_are_void_when_none() {
        assert!(<Option<i32> as LikeEquals>::is_void(&None));
        assert!(!<Option<i32> as LikeEquals>::is_void(&Some(1)));
        assert!(Some(1).is_like(&Some(1)));
        assert!(!Some(1).is_like(&None));
        assert!(None::<i32>.is_like(&None));
    }

    #[test]
    fn plain_keys_are_live() {
        assert!(<u32 as LikeEquals>::is_live(&5));
        assert!(!<u32 as LikeEquals>::is_void(&0));
    }
}
