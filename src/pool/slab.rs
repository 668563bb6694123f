//! Dedicated storage for full-screen bitmaps.
//!
//! Full-screen backgrounds are the largest and most frequently swapped
//! bitmaps; keeping them out of the compact arenas stops one of them from
//! fragmenting a whole scene's arena. The slab holds `slots` buffers of exactly
//! one screen each, allocated together on first use.

use serde::Serialize;

/// Fixed set of screen-sized buffers.
#[derive(Debug)]
pub struct ScreenSlab {
    slot_size: usize,
    slot_count: usize,
    slots: Vec<Box<[u8]>>,
    in_use: Vec<bool>,
}

/// Occupancy of the slab for reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlabStats {
    /// Bytes per slot (one 16-bit screen).
    pub slot_size: usize,
    /// Configured slot count.
    pub slots: usize,
    /// Slots currently holding a bitmap.
    pub in_use: usize,
    /// Whether the slot buffers have been allocated yet.
    pub allocated: bool,
}

impl ScreenSlab {
    /// Creates an empty slab; no memory is taken until the first take.
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        Self {
            slot_size,
            slot_count,
            slots: Vec::new(),
            in_use: vec![false; slot_count],
        }
    }

    /// True when `size` is exactly one slot and the slab is enabled.
    pub fn fits(&self, size: usize) -> bool {
        self.slot_size != 0 && self.slot_count != 0 && size == self.slot_size
    }

    /// Bytes per slot.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// True when a slot is free.
    pub fn has_free(&self) -> bool {
        self.in_use.iter().any(|used| !used)
    }

    /// Claims a free slot.
    pub fn take(&mut self) -> Option<usize> {
        let slot = self.in_use.iter().position(|used| !used)?;
        if self.slots.is_empty() {
            log::debug!(
                "allocating screen slab: {} x {} bytes",
                self.slot_count,
                self.slot_size
            );
            self.slots = (0..self.slot_count)
                .map(|_| vec![0u8; self.slot_size].into_boxed_slice())
                .collect();
        }
        self.in_use[slot] = true;
        Some(slot)
    }

    /// Returns a slot to the slab.
    pub fn give_back(&mut self, slot: usize) {
        if let Some(used) = self.in_use.get_mut(slot) {
            *used = false;
        }
    }

    /// The first `len` bytes of a slot.
    pub fn bytes(&self, slot: usize, len: usize) -> Option<&[u8]> {
        self.slots.get(slot).and_then(|s| s.get(..len))
    }

    /// The first `len` bytes of a slot, writable.
    pub fn bytes_mut(&mut self, slot: usize, len: usize) -> Option<&mut [u8]> {
        self.slots.get_mut(slot).and_then(|s| s.get_mut(..len))
    }

    /// Bytes held by the slab.
    pub fn footprint(&self) -> usize {
        self.slots.len() * self.slot_size
    }

    /// Occupancy report.
    pub fn stats(&self) -> SlabStats {
        SlabStats {
            slot_size: self.slot_size,
            slots: self.slot_count,
            in_use: self.in_use.iter().filter(|u| **u).count(),
            allocated: !self.slots.is_empty(),
        }
    }
}
