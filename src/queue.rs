use crate::{sync::*, types::SyncUnsafeCell};
use core::{cmp::Ordering as CmpOrdering, fmt, mem::MaybeUninit};
use crossbeam_utils::CachePadded;
use thiserror::Error;

/// Error returned by [`BoundedQueue::new`] for an unusable capacity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CapacityError {
    /// Capacity must be a power of two and at least 2.
    #[error("queue capacity must be a power of two >= 2, got {0}")]
    NotPowerOfTwo(usize),
}

pub(crate) fn check_capacity(capacity: usize) -> Result<(), CapacityError> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(CapacityError::NotPowerOfTwo(capacity));
    }
    Ok(())
}

/// Fixed-capacity multi-producer/multi-consumer ring buffer.
///
/// Every cell carries a sequence number. A producer owns the cell when its
/// sequence equals the producer cursor, a consumer owns it when its sequence
/// equals the consumer cursor plus one. Winning the compare-and-swap on the
/// cursor is what grants exclusive access to the payload, so neither side
/// ever takes a lock and neither side ever blocks: a full queue hands the
/// item back, an empty one returns `None`.
///
/// Items pushed by a single producer are popped in the order they were
/// pushed. Nothing is promised about the relative order of different
/// producers.
pub struct BoundedQueue<T> {
    cells: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

struct Cell<T> {
    sequence: AtomicUsize,
    value: SyncUnsafeCell<MaybeUninit<T>>,
}

// SAFETY: a payload is moved in by exactly one producer and moved out by
// exactly one consumer, with the cell sequence (Release/Acquire) ordering the
// two. `T` only ever crosses threads by value.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
// SAFETY: see above; shared access never hands out `&T`.
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a queue with room for exactly `capacity` items.
    ///
    /// # Errors
    /// If `capacity` is not a power of two or is smaller than 2.
    pub fn new(capacity: usize) -> Result<Self, CapacityError> {
        check_capacity(capacity)?;
        let cells = (0..capacity)
            .map(|idx| Cell {
                sequence: AtomicUsize::new(idx),
                value: SyncUnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Ok(Self {
            cells,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Maximum number of items the queue holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of items currently stored.
    ///
    /// Only a snapshot: concurrent producers and consumers may change it
    /// before the caller looks at the result.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Acquire);
        let head = self.dequeue_pos.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.capacity())
    }

    /// Whether the queue looked empty at the time of the call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `item` at the tail.
    ///
    /// # Errors
    /// Gives `item` back if the queue is full. This is a "try again later"
    /// signal, not a failure.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            #[allow(clippy::cast_possible_wrap)]
            let diff = seq.wrapping_sub(pos) as isize;
            match diff.cmp(&0) {
                CmpOrdering::Equal => {
                    match self.enqueue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: winning the CAS at `pos` makes this thread the only
                            // writer of the cell until its sequence is published below.
                            cell.value.get_mut().with(|ptr| unsafe {
                                ptr.write(MaybeUninit::new(item));
                            });
                            cell.sequence.store(pos.wrapping_add(1), Ordering::Release);
                            return Ok(());
                        }
                        Err(actual) => pos = actual,
                    }
                }
                // The cell still holds an item from the previous lap.
                CmpOrdering::Less => return Err(item),
                CmpOrdering::Greater => pos = self.enqueue_pos.load(Ordering::Relaxed),
            }
        }
    }

    /// Pops the item at the head, or `None` if the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            #[allow(clippy::cast_possible_wrap)]
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;
            match diff.cmp(&0) {
                CmpOrdering::Equal => {
                    match self.dequeue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: the Acquire load above observed the producer's
                            // publication, and winning the CAS makes this thread the only
                            // reader of the initialized payload.
                            let item = cell
                                .value
                                .get_mut()
                                .with(|ptr| unsafe { ptr.read().assume_init() });
                            cell.sequence
                                .store(pos.wrapping_add(self.capacity()), Ordering::Release);
                            return Some(item);
                        }
                        Err(actual) => pos = actual,
                    }
                }
                CmpOrdering::Less => return None,
                CmpOrdering::Greater => pos = self.dequeue_pos.load(Ordering::Relaxed),
            }
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
