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

//! Lockfree concurrent maps built on Fibonacci hashing.
//!
//! [`FibMap`] is a hash trie whose levels are fixed-size segments addressed by
//! the Fibonacci hash of a key. Colliding keys push a slot one level down
//! instead of resizing anything, so no operation ever copies the map. On top
//! of it sit [`FibSet`], a set of shared values held by weak, soft or strong
//! references, [`StringCache`], which interns strings, and [`JsonMap`], a
//! string-keyed map whose keys are interned. [`ReentrantChangeLock`] is an
//! optimistic read/write lock for data kept outside of these maps.

pub mod change_lock;
pub mod error;
pub mod fib;
pub mod json_map;
pub mod like;
pub mod map;
pub mod set;
pub mod string_cache;

#[cfg(feature = "serde")]
mod serde_impls;

pub use change_lock::{ReentrantChangeLock, WriteGuard};
pub use error::{Conflict, Error, ExpectedValue};
pub use json_map::JsonMap;
pub use like::LikeEquals;
pub use map::{Expected, FibConfig, FibMap, FibMapEntry, PutResult};
pub use set::{FibRef, FibSet, RefType};
pub use string_cache::StringCache;
