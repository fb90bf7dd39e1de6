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

//! Entries and iteration.

use std::{fmt, thread};

use crossbeam_epoch::Guard;

use super::segment::{Node, Pair, SlotRef};
use crate::like::LikeEquals;

/// A key-value pair borrowed from a [`FibMap`](crate::FibMap).
///
/// The references stay valid for as long as the guard the entry was read
/// under is pinned, even if the pair is removed from the map meanwhile.
pub struct FibMapEntry<'g, K, V> {
    key: &'g K,
    value: &'g V,
}

impl<'g, K, V> FibMapEntry<'g, K, V> {
    pub(crate) fn new(key: &'g K, value: &'g V) -> Self {
        FibMapEntry { key, value }
    }

    /// Points this entry at another pair, reusing it.
    pub fn with(&mut self, key: &'g K, value: &'g V) -> &mut Self {
        self.key = key;
        self.value = value;

        self
    }

    pub fn key(&self) -> &'g K {
        self.key
    }

    pub fn value(&self) -> &'g V {
        self.value
    }

    pub fn into_pair(self) -> (&'g K, &'g V) {
        (self.key, self.value)
    }
}

impl<K, V> Clone for FibMapEntry<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for FibMapEntry<'_, K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for FibMapEntry<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FibMapEntry")
            .field(self.key)
            .field(self.value)
            .finish()
    }
}

/// An iterator over the pairs of a [`FibMap`](crate::FibMap).
///
/// The walk keeps an explicit stack of `(segment, index)` frames, at most one
/// per level of the trie, instead of recursing.
///
/// Iteration is weakly consistent. A key that is present and stays in place
/// for the whole walk is yielded exactly once. Keys inserted or removed
/// concurrently may or may not be yielded, and a key that a concurrent write
/// moves one level down may be yielded twice or not at all. Pairs are never
/// torn: a yielded value always belongs to the yielded key.
pub struct Iter<'g, K, V> {
    guard: &'g Guard,
    stack: Vec<(&'g [Pair<K, V>], usize)>,
    pending: Option<(u32, FibMapEntry<'g, K, V>)>,
}

impl<'g, K: LikeEquals, V> Iter<'g, K, V> {
    pub(crate) fn new(root: Option<&'g [Pair<K, V>]>, max_depth: u32, guard: &'g Guard) -> Self {
        let mut stack = Vec::with_capacity(max_depth as usize + 1);
        stack.extend(root.map(|pairs| (pairs, 0)));

        Iter {
            guard,
            stack,
            pending: None,
        }
    }

    /// Returns `true` if [`next`](Iterator::next) would yield a pair.
    pub fn has_next(&mut self) -> bool {
        self.peek().is_some()
    }

    /// Returns the next pair without consuming it.
    pub fn peek(&mut self) -> Option<FibMapEntry<'g, K, V>> {
        if self.pending.is_none() {
            self.pending = self.advance();
        }

        self.pending.map(|(_, entry)| entry)
    }

    /// Like [`next`](Iterator::next), also returning the hash of the key.
    pub(crate) fn next_hashed(&mut self) -> Option<(u32, FibMapEntry<'g, K, V>)> {
        self.peek();

        self.pending.take()
    }

    fn advance(&mut self) -> Option<(u32, FibMapEntry<'g, K, V>)> {
        loop {
            let &(pairs, index) = self.stack.last()?;

            if index >= pairs.len() {
                self.stack.pop();

                continue;
            }

            let (key_ptr, value_ptr) = pairs[index].load(self.guard);

            let found = match unsafe { Node::as_ref(key_ptr) } {
                SlotRef::Locked => {
                    thread::yield_now();

                    continue;
                }
                SlotRef::Key { hash, key } => match unsafe { value_ptr.as_ref() } {
                    Some(value) => Some((hash, FibMapEntry::new(key, value)))
                        .filter(|_| <K as LikeEquals>::is_live(key)),
                    None => {
                        thread::yield_now();

                        continue;
                    }
                },
                SlotRef::Empty => None,
                SlotRef::Segment(segment) => {
                    self.step();
                    self.stack.push((&segment.pairs[..], 0));

                    continue;
                }
                SlotRef::Lpt(lpt) => {
                    self.step();
                    self.stack.push((&lpt.pairs[..], 0));

                    continue;
                }
            };

            self.step();

            if found.is_some() {
                return found;
            }
        }
    }

    fn step(&mut self) {
        if let Some((_, index)) = self.stack.last_mut() {
            *index += 1;
        }
    }
}

impl<'g, K: LikeEquals, V> Iterator for Iter<'g, K, V> {
    type Item = FibMapEntry<'g, K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_hashed().map(|(_, entry)| entry)
    }
}
