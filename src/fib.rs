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

//! Fibonacci distribution of hash codes over power-of-two sized segments.
//!
//! This is not a hash function of its own. The hash code is multiplied by
//! 2^32 divided by the golden ratio, and each trie level reads a different
//! window of the product, so a single hash code spreads well across all levels
//! of the trie. See [Fibonacci Hashing] for the background.
//!
//! [Fibonacci Hashing]: https://probablydance.com/2018/06/16/fibonacci-hashing-the-optimization-that-the-world-forgot-or-a-better-alternative-to-integer-modulo/

/// The golden ratio (first 50 digits).
pub const GOLDEN_RATIO: f64 = 1.618_033_988_749_894_848_204_586_834_365_638_117_720_309_179_805_8;

/// The 32-bit multiplier, `2^32 / GOLDEN_RATIO` rounded to the next odd number.
pub const MUL32: u32 = 0b1001_1110_0011_0111_0111_1001_1011_1001;

/// The 64-bit multiplier, `2^64 / GOLDEN_RATIO` rounded to the next odd number.
pub const MUL64: u64 = 0b1001_1110_0011_0111_0111_1001_1011_1001_0111_1111_0100_1010_0111_1100_0001_0101;

/// Returns the index in `0..2^bits` that `hash` selects at trie level `depth`.
///
/// The hash is folded onto itself by `bits`, multiplied by [`MUL32`] and then
/// the `bits` wide window starting `depth * bits` bits below the top of the
/// product is extracted. Levels whose window would run past the low end of the
/// product wrap around to the top again.
pub fn index_of(hash: u32, bits: u32, depth: u32) -> u32 {
    debug_assert!(bits > 0 && bits < 32);

    let hash = hash ^ (hash >> bits);
    let product = hash.wrapping_mul(MUL32);

    product.rotate_left(depth.wrapping_mul(bits)) >> (32 - bits)
}

/// Returns the flat slot index of the key half of the pair selected by
/// [`index_of`]. The lowest bit is always zero; the value half lives at
/// `key_index + 1`.
pub fn key_index(hash: u32, bits: u32, depth: u32) -> usize {
    ((index_of(hash, bits, depth) as usize) << 1) & !1
}

/// Returns the number of selection bits a power-of-two sized segment offers.
///
/// A length of zero yields zero bits.
pub fn capacity_bits_of(len: usize) -> u32 {
    len.trailing_zeros() & 31
}

/// Folds a 64-bit hash into the 32-bit hash the trie consumes.
pub(crate) fn fold_hash(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}
