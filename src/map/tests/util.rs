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

use std::{
    hash::{BuildHasherDefault, Hash, Hasher},
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crossbeam_epoch::Owned;

use crate::like::LikeEquals;

#[derive(Debug)]
pub(crate) struct NoisyDropper<T: ?Sized> {
    parent: Arc<DropNotifier>,
    pub elem: T,
}

impl<T> NoisyDropper<T> {
    pub(crate) fn new(parent: Arc<DropNotifier>, elem: T) -> Self {
        Self { parent, elem }
    }
}

impl<T: ?Sized> Drop for NoisyDropper<T> {
    fn drop(&mut self) {
        assert!(!self.parent.dropped.swap(true, Ordering::Relaxed));
    }
}

impl<T: ?Sized + PartialEq> PartialEq<T> for NoisyDropper<T> {
    fn eq(&self, other: &T) -> bool {
        &self.elem == other
    }
}

impl<T: ?Sized + Hash> Hash for NoisyDropper<T> {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.elem.hash(hasher);
    }
}

impl<T: ?Sized + LikeEquals> LikeEquals for NoisyDropper<T> {
    fn is_like(&self, other: &Self) -> bool {
        self.elem.is_like(&other.elem)
    }
}

impl<T: LikeEquals> LikeEquals<T> for NoisyDropper<T> {
    fn is_like(&self, other: &T) -> bool {
        self.elem.is_like(other)
    }
}

impl<T: ?Sized> Deref for NoisyDropper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.elem
    }
}

#[derive(Debug)]
pub(crate) struct DropNotifier {
    dropped: AtomicBool,
}

impl DropNotifier {
    pub(crate) fn new() -> Self {
        Self {
            dropped: AtomicBool::new(false),
        }
    }

    pub(crate) fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}

/// Hashes everything to the same value.
#[derive(Default)]
pub(crate) struct CollidingHasher;

impl Hasher for CollidingHasher {
    fn finish(&self) -> u64 {
        0x9E37_79B9
    }

    fn write(&mut self, _: &[u8]) {}
}

pub(crate) type BuildCollidingHasher = BuildHasherDefault<CollidingHasher>;

/// A key that dies when its flag is cleared, like a weak reference whose
/// referent was dropped.
#[derive(Debug)]
pub(crate) struct Expiring {
    pub id: u32,
    alive: Arc<AtomicBool>,
}

impl Expiring {
    pub(crate) fn new(id: u32) -> (Self, Arc<AtomicBool>) {
        let alive = Arc::new(AtomicBool::new(true));

        (
            Self {
                id,
                alive: Arc::clone(&alive),
            },
            alive,
        )
    }
}

impl Hash for Expiring {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.id.hash(hasher);
    }
}

impl LikeEquals for Expiring {
    fn is_like(&self, other: &Self) -> bool {
        self.id == other.id
    }

    fn is_live(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl LikeEquals<u32> for Expiring {
    fn is_like(&self, other: &u32) -> bool {
        self.id == *other
    }

    fn is_live(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}
