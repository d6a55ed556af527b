//! cellgrid: a fixed-size thread pool, a chunked parallel-for and a lock-free
//! open-addressing hash map used to bucket points into spatial cells from many workers.
//!
//! The hash map keeps `u32` keys and values in a flat power-of-two array of slots.
//! Writers claim a slot with a single compare-and-swap on its key; nothing is ever
//! relocated or removed while writers run, so readers probe without locks.

mod error;
mod grid;
mod parallel;
mod pool;

pub use error::{GridError, HashmapError, PoolError};
pub use grid::{cell_coord, cell_key, SpatialGrid};
pub use parallel::{chunk_range, parallel_for};
pub use pool::{PoolConfig, ThreadPool, THREADS_ENV};

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Key and value of an unoccupied slot.
pub const EMPTY: u32 = u32::MAX;
/// Slot index returned by [`Hashmap::begin`] / [`Hashmap::next`] when there is no further match.
pub const END: usize = usize::MAX;
pub const MIN_TABLE_LEN: usize = 8;
pub const MAX_TABLE_LEN: usize = 1 << 31;
/// Slots reserved per expected item by [`Hashmap::with_expected_items`].
pub const LOAD_FACTOR: usize = 2;

/// Smallest power of two strictly greater than `min_capacity`, at least
/// `MIN_TABLE_LEN`. `None` if that exceeds `MAX_TABLE_LEN`.
#[inline]
fn calc_table_len(min_capacity: usize) -> Option<usize> {
    let len = min_capacity
        .checked_add(1)?
        .checked_next_power_of_two()?
        .max(MIN_TABLE_LEN);
    (len <= MAX_TABLE_LEN).then_some(len)
}

/// Atomically replaces `*target` with `new` if it currently holds `current`.
///
/// Returns the value observed just before the (possibly skipped) swap, so the
/// swap happened iff the return value equals `current`. Lock-free.
#[inline]
pub fn compare_and_swap(target: &AtomicU32, current: u32, new: u32) -> u32 {
    match target.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) | Err(prev) => prev,
    }
}

#[cfg_attr(feature = "padding", repr(align(64)))]
struct Slot {
    key: AtomicU32,
    value: AtomicU32,
}

impl Slot {
    fn empty() -> Self {
        Self {
            key: AtomicU32::new(EMPTY),
            value: AtomicU32::new(EMPTY),
        }
    }
}

/// Fixed-capacity multimap from `u32` keys to `u32` values with concurrent insert.
///
/// Duplicate keys are allowed; each insert claims its own slot on the linear
/// probe chain that starts at `key mod capacity`. There is no removal and no
/// resize: the table must be sized so it never fills, [`Hashmap::with_expected_items`]
/// does that with a load factor of 2.
pub struct Hashmap {
    slots: Box<[Slot]>,
    mask: usize,
    len: AtomicUsize,
}

impl Hashmap {
    /// Creates a table whose capacity is the smallest power of two strictly
    /// greater than `min_capacity` (and at least 8), with every slot empty.
    ///
    /// # Arguments
    ///
    /// * `min_capacity` - Lower bound (exclusive) for the number of slots.
    ///
    /// # Returns
    ///
    /// * `Err(HashmapError::CapacityTooLarge)` if the rounded capacity exceeds 2^31.
    pub fn create(min_capacity: usize) -> Result<Self, HashmapError> {
        let len = calc_table_len(min_capacity).ok_or(HashmapError::CapacityTooLarge {
            requested: min_capacity,
            max: MAX_TABLE_LEN,
        })?;
        let slots = (0..len).map(|_| Slot::empty()).collect();
        Ok(Self {
            slots,
            mask: len - 1,
            len: AtomicUsize::new(0),
        })
    }

    /// Creates a table large enough for `items` inserts at the default load factor.
    pub fn with_expected_items(items: usize) -> Result<Self, HashmapError> {
        Self::create(items.saturating_mul(LOAD_FACTOR))
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn home(&self, key: u32) -> usize {
        key as usize & self.mask
    }

    /// Inserts `(key, value)` into the first free slot of the key's probe chain.
    ///
    /// Safe to call from any number of threads at once. The table must not be
    /// full: a full table makes this loop forever in release builds and trips a
    /// debug assertion in debug builds. Use [`try_insert`](Self::try_insert)
    /// when that cannot be ruled out.
    ///
    /// `key` must not be [`EMPTY`]. Debug builds assert this; release builds
    /// leave the table untouched and return [`END`].
    ///
    /// # Returns
    ///
    /// * `usize` - The slot that now holds the pair.
    pub fn insert(&self, key: u32, value: u32) -> usize {
        debug_assert_ne!(key, EMPTY, "EMPTY is reserved as the unoccupied-slot key");
        if key == EMPTY {
            return END;
        }
        let mut slot = self.home(key);
        let mut probes = 0usize;
        loop {
            if let Some(claimed) = self.claim(slot, key, value) {
                return claimed;
            }
            probes += 1;
            debug_assert!(
                probes < self.capacity(),
                "hash map of capacity {} is full",
                self.capacity()
            );
            slot = (slot + 1) & self.mask;
        }
    }

    /// Like [`insert`](Self::insert) but gives up after one full wrap of the table.
    pub fn try_insert(&self, key: u32, value: u32) -> Result<usize, HashmapError> {
        if key == EMPTY {
            return Err(HashmapError::ReservedKey(key));
        }
        let mut slot = self.home(key);
        for _ in 0..self.capacity() {
            if let Some(claimed) = self.claim(slot, key, value) {
                return Ok(claimed);
            }
            slot = (slot + 1) & self.mask;
        }
        Err(HashmapError::Full {
            capacity: self.capacity(),
        })
    }

    #[inline]
    fn claim(&self, slot: usize, key: u32, value: u32) -> Option<usize> {
        let s = &self.slots[slot];
        // Losing the race (to this key or any other) means probing on.
        if compare_and_swap(&s.key, EMPTY, key) != EMPTY {
            return None;
        }
        s.value.store(value, Ordering::Release);
        self.len.fetch_add(1, Ordering::Relaxed);
        Some(slot)
    }

    /// First slot holding `key`, or [`END`].
    pub fn begin(&self, key: u32) -> usize {
        if key == EMPTY {
            return END;
        }
        self.probe(key, self.home(key), self.capacity())
    }

    /// Next slot holding `key` after `slot` on the same probe chain, or [`END`].
    ///
    /// # Arguments
    ///
    /// * `key` - The key passed to the `begin` call that started the walk.
    /// * `slot` - A slot previously returned by `begin` or `next` for `key`.
    pub fn next(&self, key: u32, slot: usize) -> usize {
        if key == EMPTY || slot >= self.capacity() {
            return END;
        }
        // Reads are bounded to one wrap from the home slot so a full table terminates.
        let walked = slot.wrapping_sub(self.home(key)) & self.mask;
        let remaining = self.capacity() - walked - 1;
        self.probe(key, (slot + 1) & self.mask, remaining)
    }

    #[inline]
    pub fn end(&self) -> usize {
        END
    }

    fn probe(&self, key: u32, mut slot: usize, mut remaining: usize) -> usize {
        while remaining > 0 {
            let k = self.slots[slot].key.load(Ordering::Acquire);
            if k == key {
                return slot;
            }
            if k == EMPTY {
                return END;
            }
            slot = (slot + 1) & self.mask;
            remaining -= 1;
        }
        END
    }

    /// Value stored in `slot`.
    ///
    /// A slot read while its insert is still in flight may show the key and an
    /// `EMPTY` value; after a barrier both are settled.
    ///
    /// # Panics
    ///
    /// If `slot >= capacity()`.
    #[inline]
    pub fn get(&self, slot: usize) -> u32 {
        self.slots[slot].value.load(Ordering::Acquire)
    }

    /// Key stored in `slot`, `EMPTY` if unoccupied.
    #[inline]
    pub fn key_at(&self, slot: usize) -> u32 {
        self.slots[slot].key.load(Ordering::Acquire)
    }

    /// First slot holding `key`, if any.
    pub fn find(&self, key: u32) -> Option<usize> {
        match self.begin(key) {
            END => None,
            slot => Some(slot),
        }
    }

    /// All values inserted under `key`, in probe order.
    pub fn values(&self, key: u32) -> Values<'_> {
        Values {
            map: self,
            key,
            cursor: None,
        }
    }

    /// Occupied `(key, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots.iter().filter_map(|s| {
            let key = s.key.load(Ordering::Acquire);
            (key != EMPTY).then(|| (key, s.value.load(Ordering::Acquire)))
        })
    }

    /// Resets every slot to empty and the item count to zero.
    ///
    /// Takes `&mut self`, so no insert can be in flight.
    pub fn clear(&mut self) {
        for s in self.slots.iter_mut() {
            *s.key.get_mut() = EMPTY;
            *s.value.get_mut() = EMPTY;
        }
        *self.len.get_mut() = 0;
    }
}

impl fmt::Debug for Hashmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hashmap")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Iterator over the values stored under one key, see [`Hashmap::values`].
pub struct Values<'a> {
    map: &'a Hashmap,
    key: u32,
    cursor: Option<usize>,
}

impl Iterator for Values<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let slot = match self.cursor {
            None => self.map.begin(self.key),
            Some(END) => return None,
            Some(prev) => self.map.next(self.key, prev),
        };
        self.cursor = Some(slot);
        (slot != END).then(|| self.map.get(slot))
    }
}
