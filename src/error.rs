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

//! Error types.

use thiserror::Error;

/// Rejected configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Segments must select between 1 and 16 bits per level.
    #[error("segment bits must be within 1..=16, got {0}")]
    InvalidSegmentBits(u32),
    /// The trie needs at least one level and cannot consume more than 64 bits.
    #[error("max depth must be within 1..={max}, got {depth}")]
    InvalidMaxDepth { depth: u32, max: u32 },
}

/// The owned form of an [`Expected`](crate::Expected) precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedValue<V> {
    Any,
    Void,
    Absent,
    Value(V),
}

impl<V> ExpectedValue<V> {
    pub fn map<T, F: FnOnce(V) -> T>(self, f: F) -> ExpectedValue<T> {
        match self {
            ExpectedValue::Any => ExpectedValue::Any,
            ExpectedValue::Void => ExpectedValue::Void,
            ExpectedValue::Absent => ExpectedValue::Absent,
            ExpectedValue::Value(v) => ExpectedValue::Value(f(v)),
        }
    }
}

/// A conditional write whose precondition did not hold.
///
/// This is an expected outcome, not a failure of the map: the caller reads the
/// current value again and retries, or gives up. Everything the caller handed
/// in comes back, so a retry needs no copies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting write: the stored value did not match the expected value")]
pub struct Conflict<K, V> {
    /// The owned key of the write. `None` if the write was made with a
    /// borrowed key whose owned form was never built.
    pub key: Option<K>,
    pub expected: ExpectedValue<V>,
    /// The value found, `None` if the key was absent.
    pub actual: Option<V>,
    /// The new value that was not written.
    pub rejected: Option<V>,
}

impl<K, V> Conflict<K, V> {
    /// Maps every value the conflict carries.
    pub fn map<T, F: FnMut(V) -> T>(self, mut f: F) -> Conflict<K, T> {
        Conflict {
            key: self.key,
            expected: self.expected.map(&mut f),
            actual: self.actual.map(&mut f),
            rejected: self.rejected.map(f),
        }
    }
}
