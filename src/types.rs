use crate::sync::UnsafeCell;
use core::{
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
};
use derive_more::{Deref, DerefMut, Display};
use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Sync`.
///
/// Used internally by the queue to hand payload slots across threads while
/// correctness is ensured by the cell sequence protocol (a slot is written
/// only by the producer that claimed it and read only by the consumer that
/// claimed it afterwards).
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

/// Process-unique identifier of a [`JobManager`](crate::manager::JobManager).
///
/// Used to batch wake-ups per distinct manager when a finished job releases
/// dependents that belong to several managers.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ManagerId(NonZeroU32);

impl ManagerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        let raw = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU32::new(raw).expect("ManagerId::next: [1]"))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// `IndexMap` type with fast hasher.
pub(crate) type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
