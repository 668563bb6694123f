//! Runtime configuration of a [`CacheContext`](crate::CacheContext).
//!
//! All knobs have defaults suited to a 16-bit embedded display; a simulator
//! usually only sets the screen geometry. The struct is serde-friendly so it can
//! be loaded from the same JSON project file the simulator already reads.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Tunables for pools, the compact packer, the handle cache and catalog access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of concurrently open resource file sets.
    pub max_open_sets: usize,
    /// Payload alignment for every pool. Must be a power of two.
    pub alignment: usize,
    /// Byte budget of the bitmap pool (heap blocks plus compact arenas).
    pub bitmap_pool_capacity: usize,
    /// Byte budget of the text pool.
    pub text_pool_capacity: usize,
    /// Byte budget of the scene pool.
    pub scene_pool_capacity: usize,
    /// Header charge taken from a compact arena for every block carved from it.
    pub block_overhead: usize,
    /// Slack added on top of a new compact arena.
    pub compact_margin: usize,
    /// Upper bound for a single compact arena.
    pub max_compact_block_size: usize,
    /// Screen width in pixels. Zero disables the full-screen slab.
    pub screen_width: u32,
    /// Screen height in pixels. Zero disables the full-screen slab.
    pub screen_height: u32,
    /// Number of pre-sized full-screen blocks in the slab.
    pub screen_slab_slots: usize,
    /// Number of lettered picture partitions probed on open.
    pub max_partitions: usize,
    /// Memory-map catalogs and serve uncompressed bitmaps straight from the map.
    pub use_mmap: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_open_sets: 6,
            alignment: 4,
            bitmap_pool_capacity: 32 * 1024 * 1024,
            text_pool_capacity: 1024 * 1024,
            scene_pool_capacity: 64 * 1024,
            block_overhead: 32,
            compact_margin: 64,
            max_compact_block_size: 1024 * 1024,
            screen_width: 0,
            screen_height: 0,
            screen_slab_slots: 2,
            max_partitions: 4,
            use_mmap: true,
        }
    }
}

impl CacheConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidFormat` on malformed JSON or an invalid value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidFormat(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the screen geometry used to detect full-screen bitmaps.
    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.screen_width = width;
        self.screen_height = height;
        self
    }

    /// Size in bytes of one full-screen 16-bit bitmap, or 0 when disabled.
    pub fn screen_bitmap_size(&self) -> usize {
        self.screen_width as usize * self.screen_height as usize * 2
    }

    /// Rounds `size` up to the pool alignment.
    pub fn align(&self, size: usize) -> usize {
        let mask = self.alignment.max(1) - 1;
        (size + mask) & !mask
    }

    /// Checks the invariants the pools rely on.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidFormat` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(CacheError::InvalidFormat(format!(
                "config: alignment {} is not a power of two",
                self.alignment
            )));
        }
        if self.max_open_sets == 0 {
            return Err(CacheError::InvalidFormat(
                "config: max_open_sets must be at least 1".into(),
            ));
        }
        if self.max_partitions == 0 || self.max_partitions > 26 {
            return Err(CacheError::InvalidFormat(format!(
                "config: max_partitions {} outside 1..=26",
                self.max_partitions
            )));
        }
        if self.max_compact_block_size <= self.block_overhead + self.compact_margin {
            return Err(CacheError::InvalidFormat(
                "config: max_compact_block_size too small for block overhead".into(),
            ));
        }
        Ok(())
    }
}
