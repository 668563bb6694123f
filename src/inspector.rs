//! Cache statistics: pools, arenas, blocks and peak memory.
//!
//! A [`CacheStats`] is a snapshot taken under the cache mutex. It serializes
//! to JSON for tooling and renders as a tree for logs.

use std::fmt;

use serde::Serialize;

use crate::error::{CacheError, Result};
use crate::fileset::FileSetInfo;
use crate::pool::compact::ArenaInfo;
use crate::pool::slab::SlabStats;
use crate::pool::{BlockInfo, PoolStats};
use crate::preload::{PreloadStats, WorkerState};

/// A loaded scene in the report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SceneInfo {
    /// Scene id.
    pub id: u32,
    /// References on the scene record.
    pub refs: u32,
    /// Bitmap references held on behalf of the scene by preloads.
    pub held: usize,
}

/// Snapshot of a whole cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Per-pool occupancy.
    pub pools: Vec<PoolStats>,
    /// Compact arenas.
    pub arenas: Vec<ArenaInfo>,
    /// Live blocks of every pool.
    pub blocks: Vec<BlockInfo>,
    /// Full-screen slab.
    pub slab: SlabStats,
    /// Open file sets.
    pub open_sets: Vec<FileSetInfo>,
    /// Loaded scenes.
    pub scenes: Vec<SceneInfo>,
    /// Preload counters.
    pub preload: PreloadStats,
    /// Units still queued.
    pub preload_pending: usize,
    /// Worker lifecycle.
    pub worker: WorkerState,
    /// Decoder invocations.
    pub decodes: u64,
    /// Bytes held now.
    pub footprint: usize,
    /// Highest footprint seen.
    pub peak_memory: usize,
}

impl CacheStats {
    /// Compact JSON rendering.
    ///
    /// # Errors
    /// `Internal` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Internal(format!("stats json: {e}")))
    }

    /// Indented JSON rendering.
    ///
    /// # Errors
    /// `Internal` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CacheError::Internal(format!("stats json: {e}")))
    }

    /// Live blocks of one pool.
    pub fn blocks_in(&self, pool: crate::pool::PoolKind) -> impl Iterator<Item = &BlockInfo> {
        self.blocks.iter().filter(move |b| b.pool == pool)
    }
}

fn branch(last: bool) -> &'static str {
    if last { "└── " } else { "├── " }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== RESCACHE STATS ===")?;
        writeln!(
            f,
            "Footprint: {}b | Peak: {}b | Decodes: {}",
            self.footprint, self.peak_memory, self.decodes
        )?;

        writeln!(f, "\n[POOLS]")?;
        for (i, pool) in self.pools.iter().enumerate() {
            writeln!(
                f,
                "{}{}: {}/{}b used, peak {}b, {} blocks",
                branch(i + 1 == self.pools.len()),
                pool.kind.name(),
                pool.used,
                pool.capacity,
                pool.peak,
                pool.blocks
            )?;
        }

        writeln!(f, "\n[ARENAS]")?;
        for (i, arena) in self.arenas.iter().enumerate() {
            let released = if arena.scene_released { " (scene gone)" } else { "" };
            writeln!(
                f,
                "{}scene {:#x}: {}/{}b carved, {}b free, {} blocks{}",
                branch(i + 1 == self.arenas.len()),
                arena.scene,
                arena.offset,
                arena.capacity,
                arena.free_size,
                arena.blocks,
                released
            )?;
        }

        writeln!(f, "\n[BLOCKS]")?;
        for (i, block) in self.blocks.iter().enumerate() {
            let pinned = if block.regular { " pinned" } else { "" };
            writeln!(
                f,
                "{}{} {}: {}b {} refs {}{}",
                branch(i + 1 == self.blocks.len()),
                block.pool.name(),
                block.id,
                block.size,
                block.storage,
                block.refs,
                pinned
            )?;
        }

        writeln!(
            f,
            "\n[SLAB] {}/{} slots of {}b in use",
            self.slab.in_use, self.slab.slots, self.slab.slot_size
        )?;
        writeln!(f, "[FILE SETS] {} open", self.open_sets.len())?;
        for (i, set) in self.open_sets.iter().enumerate() {
            writeln!(
                f,
                "{}{} refs {} reads {}",
                branch(i + 1 == self.open_sets.len()),
                set.style_path,
                set.refs,
                set.payload_reads
            )?;
        }
        write!(
            f,
            "[PRELOAD] {:?}, {} pending, {} processed, {} canceled, {} failed",
            self.worker,
            self.preload_pending,
            self.preload.processed,
            self.preload.canceled,
            self.preload.failed
        )
    }
}
