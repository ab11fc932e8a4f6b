//! Shared arena holding every per-word slot of the active slice.
//!
//! The arena is a flat run of `AtomicU32` cells. A slot occupies
//! [`cells_for`]`(capacity)` cells starting at the offset the
//! [`AliasTableIndex`](crate::index::AliasTableIndex) assigned to its word:
//!
//! ```text
//! [height][mass bits][threshold bits, primary, alternate] * capacity
//! ```
//!
//! Each slot is written by exactly one worker and read by all workers only
//! after the phased barrier, so every access uses `Relaxed` ordering.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::walker::{AliasBin, AliasSlot};

pub(crate) const HEADER_CELLS: usize = 2;
pub(crate) const BIN_CELLS: usize = 3;

/// Number of cells a slot with room for `capacity` bins occupies.
#[inline]
pub const fn cells_for(capacity: usize) -> usize {
    HEADER_CELLS + BIN_CELLS * capacity
}

#[derive(Debug, Default)]
pub struct SlotPool {
    cells: Box<[AtomicU32]>,
}

impl SlotPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the arena to at least `cells` cells. Never shrinks, so a pool sized
    /// for the largest slice is reused by every later slice.
    pub fn reserve(&mut self, cells: usize) {
        if self.cells.len() < cells {
            self.cells = (0..cells).map(|_| AtomicU32::new(0)).collect();
        }
    }

    pub fn release(&mut self) {
        self.cells = Box::new([]);
    }

    pub fn len_cells(&self) -> usize {
        self.cells.len()
    }

    /// Store `bins` and `mass` at `offset`.
    ///
    /// # Panics
    /// If the slot would run past the arena; callers check the reserved
    /// capacity first.
    pub(crate) fn write_slot(&self, offset: usize, bins: &[AliasBin], mass: f32) {
        let cells = &self.cells[offset..offset + cells_for(bins.len())];
        cells[0].store(bins.len() as u32, Ordering::Relaxed);
        cells[1].store(mass.to_bits(), Ordering::Relaxed);
        for (bin, chunk) in bins.iter().zip(cells[HEADER_CELLS..].chunks_exact(BIN_CELLS)) {
            chunk[0].store(bin.threshold.to_bits(), Ordering::Relaxed);
            chunk[1].store(bin.primary, Ordering::Relaxed);
            chunk[2].store(bin.alternate, Ordering::Relaxed);
        }
    }

    /// Borrow the slot stored at `offset` with room for `capacity` bins.
    pub fn slot(&self, offset: usize, capacity: usize) -> PooledSlot<'_> {
        PooledSlot {
            cells: &self.cells[offset..offset + cells_for(capacity)],
        }
    }
}

/// Read view of one slot inside the [`SlotPool`].
#[derive(Debug, Clone, Copy)]
pub struct PooledSlot<'a> {
    pub(crate) cells: &'a [AtomicU32],
}

impl PooledSlot<'_> {
    #[inline]
    pub(crate) fn load_height(&self) -> usize {
        self.cells[0].load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub(crate) fn load_mass(&self) -> f32 {
        f32::from_bits(self.cells[1].load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn load_bin(&self, i: usize) -> AliasBin {
        let base = HEADER_CELLS + BIN_CELLS * i;
        AliasBin {
            threshold: f32::from_bits(self.cells[base].load(Ordering::Relaxed)),
            primary: self.cells[base + 1].load(Ordering::Relaxed),
            alternate: self.cells[base + 2].load(Ordering::Relaxed),
        }
    }

    /// Copy the slot out of the arena.
    pub fn to_slot(&self) -> AliasSlot {
        let bins = (0..self.load_height()).map(|i| self.load_bin(i)).collect();
        AliasSlot::from_parts(bins, self.load_mass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TopicSampler;

    #[test]
    fn write_then_read_back() {
        let mut pool = SlotPool::new();
        pool.reserve(cells_for(2) + cells_for(3));
        let bins = [
            AliasBin {
                threshold: 0.25,
                primary: 3,
                alternate: 8,
            },
            AliasBin::solid(8),
        ];
        pool.write_slot(cells_for(2), &bins, 4.5);

        let slot = pool.slot(cells_for(2), 3);
        assert_eq!(slot.height(), 2);
        assert_eq!(slot.mass(), 4.5);
        assert_eq!(slot.bin(0), bins[0]);
        assert_eq!(slot.to_slot().bins(), &bins);

        // neighbouring slot untouched
        assert_eq!(pool.slot(0, 2).height(), 0);
    }

    #[test]
    fn reserve_only_grows() {
        let mut pool = SlotPool::new();
        pool.reserve(40);
        pool.reserve(10);
        assert_eq!(pool.len_cells(), 40);
        pool.release();
        assert_eq!(pool.len_cells(), 0);
    }
}
