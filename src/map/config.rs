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

use crate::error::Error;

/// The shape of a trie.
///
/// Every segment holds `2^segment_bits` key-value pairs. A key can sink at
/// most `max_depth` levels; a collision on the last level falls back to a
/// linear probing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibConfig {
    segment_bits: u32,
    max_depth: u32,
}

impl FibConfig {
    /// 16 pairs per segment, 8 levels: all 32 hash bits are used once.
    pub const DEFAULT: FibConfig = FibConfig {
        segment_bits: 4,
        max_depth: 8,
    };

    /// 256 pairs per segment, 6 levels. Wide and shallow, used by the
    /// string cache.
    pub const STRING_CACHE: FibConfig = FibConfig {
        segment_bits: 8,
        max_depth: 6,
    };

    pub fn new(segment_bits: u32, max_depth: u32) -> Result<Self, Error> {
        if !(1..=16).contains(&segment_bits) {
            return Err(Error::InvalidSegmentBits(segment_bits));
        }

        let max = 64 / segment_bits;

        if max_depth == 0 || max_depth > max {
            return Err(Error::InvalidMaxDepth {
                depth: max_depth,
                max,
            });
        }

        Ok(FibConfig {
            segment_bits,
            max_depth,
        })
    }

    /// Uses every bit of a 32-bit hash exactly once.
    pub fn with_segment_bits(segment_bits: u32) -> Result<Self, Error> {
        Self::new(segment_bits, (32 / segment_bits.max(1)).max(1))
    }

    pub fn segment_bits(&self) -> u32 {
        self.segment_bits
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub(crate) fn pairs_per_segment(&self) -> usize {
        1 << self.segment_bits
    }
}

impl Default for FibConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
