//! Per-scene compact arenas.
//!
//! A scene typically needs dozens of small bitmaps. Instead of one pool block
//! each, scene-owned bitmaps are carved out of a few large arenas tagged with
//! the scene. Carving is a bump allocation: every carve consumes
//! `block_overhead + aligned payload` (or only the overhead when the payload
//! lives in the screen slab) and freed space is not reused. An arena goes away
//! when it held exactly one block and that block is freed, or when its scene
//! is unloaded and no block inside it is still alive.

use serde::Serialize;

use super::id::{ArenaId, BlockId};
use super::slots::Slots;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::model::SceneKey;

/// One arena. `offset + free_size == capacity` always holds.
#[derive(Debug)]
pub struct CompactBuffer {
    scene: SceneKey,
    capacity: usize,
    offset: usize,
    free_size: usize,
    data: Vec<u8>,
    blocks: Vec<BlockId>,
    scene_released: bool,
}

impl CompactBuffer {
    fn new(scene: SceneKey, capacity: usize) -> Self {
        Self {
            scene,
            capacity,
            offset: 0,
            free_size: capacity,
            data: vec![0u8; capacity],
            blocks: Vec::new(),
            scene_released: false,
        }
    }

    /// Scene this arena belongs to.
    pub fn scene(&self) -> SceneKey {
        self.scene
    }

    /// Total bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bump pointer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left behind the bump pointer.
    pub fn free_size(&self) -> usize {
        self.free_size
    }

    /// Live blocks carved from this arena.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// True once the owning scene has been unloaded.
    pub fn scene_released(&self) -> bool {
        self.scene_released
    }
}

/// Arena description for reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArenaInfo {
    /// Owning scene id.
    pub scene: u32,
    /// Total bytes.
    pub capacity: usize,
    /// Bump pointer.
    pub offset: usize,
    /// Bytes left.
    pub free_size: usize,
    /// Live blocks inside.
    pub blocks: usize,
    /// Scene already unloaded (arena kept alive by pinned blocks).
    pub scene_released: bool,
}

/// All compact arenas of a cache.
#[derive(Debug)]
pub struct CompactPacker {
    arenas: Slots<CompactBuffer>,
    overhead: usize,
    margin: usize,
    max_block: usize,
}

impl CompactPacker {
    /// Creates an empty packer with the arena constants of `config`.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            arenas: Slots::new(),
            overhead: config.block_overhead,
            margin: config.compact_margin,
            max_block: config.max_compact_block_size,
        }
    }

    /// Bytes a carve of an `aligned` payload consumes. Slab-backed payloads
    /// only pay for the header.
    pub fn charge_for(&self, aligned: usize, header_only: bool) -> usize {
        if header_only {
            self.overhead
        } else {
            self.overhead + aligned
        }
    }

    /// Per-block header charge.
    pub fn overhead(&self) -> usize {
        self.overhead
    }

    /// Capacity of a fresh arena for one `charge`, or `None` when even a
    /// dedicated arena would exceed the maximum block size.
    pub fn arena_size_for(&self, charge: usize) -> Option<usize> {
        let size = charge + self.margin;
        (size <= self.max_block).then_some(size)
    }

    /// Splits a running total of charges into arena capacities, each at most
    /// the maximum block size. Charges too large for any arena are left out;
    /// they are served by the general pool.
    pub fn plan_reservation(&self, charges: &[usize]) -> Vec<usize> {
        let limit = self.max_block - self.margin;
        let mut plan = Vec::new();
        let mut running = 0usize;
        for &charge in charges {
            if charge > limit {
                continue;
            }
            if running + charge > limit {
                plan.push(running + self.margin);
                running = 0;
            }
            running += charge;
        }
        if running > 0 {
            plan.push(running + self.margin);
        }
        plan
    }

    /// First live arena of `scene` with at least `charge` bytes free.
    pub fn find_fit(&self, scene: SceneKey, charge: usize) -> Option<ArenaId> {
        self.arenas
            .iter()
            .find(|(_, a)| a.scene == scene && !a.scene_released && a.free_size >= charge)
            .map(|(k, _)| ArenaId(k))
    }

    /// Creates an arena of `capacity` bytes for `scene`.
    pub fn create(&mut self, scene: SceneKey, capacity: usize) -> ArenaId {
        let id = ArenaId(self.arenas.insert(CompactBuffer::new(scene, capacity)));
        log::debug!("compact arena {id} for scene {:#x}: {capacity} bytes", scene.id);
        id
    }

    /// Carves `charge` bytes. Returns the payload offset, which sits right
    /// after the block header. The block is recorded with [`Self::attach`]
    /// once it has an id.
    pub fn carve(&mut self, arena: ArenaId, charge: usize) -> Result<usize> {
        let overhead = self.overhead;
        let a = self
            .arenas
            .get_mut(arena.0)
            .ok_or_else(|| CacheError::Internal(format!("stale arena {arena:?}")))?;
        if a.free_size < charge {
            return Err(CacheError::OutOfSpace {
                pool: "compact",
                requested: charge,
                available: a.free_size,
            });
        }
        let payload = a.offset + overhead;
        a.offset += charge;
        a.free_size -= charge;
        Ok(payload)
    }

    /// Records `block` as living in `arena`.
    pub fn attach(&mut self, arena: ArenaId, block: BlockId) {
        if let Some(a) = self.arenas.get_mut(arena.0) {
            a.blocks.push(block);
        }
    }

    /// Detaches a freed block. Returns the capacity of the arena when the
    /// arena was released as a consequence.
    pub fn release_block(
        &mut self,
        arena: ArenaId,
        block: BlockId,
        charge: usize,
    ) -> Option<usize> {
        let margin = self.margin;
        let a = self.arenas.get_mut(arena.0)?;
        a.blocks.retain(|b| *b != block);
        let sole_occupant = a.offset == charge && a.free_size <= margin;
        let abandoned = a.scene_released && a.blocks.is_empty();
        if sole_occupant || abandoned {
            return self.arenas.remove(arena.0).map(|a| a.capacity);
        }
        None
    }

    /// Drops an arena that holds no blocks. Returns its capacity.
    pub fn discard(&mut self, arena: ArenaId) -> Option<usize> {
        if !self.arenas.get(arena.0)?.blocks.is_empty() {
            return None;
        }
        self.arenas.remove(arena.0).map(|a| a.capacity)
    }

    /// Marks every arena of `scene` released and drops the empty ones.
    /// Returns the total capacity freed.
    pub fn release_scene(&mut self, scene: SceneKey) -> usize {
        let mut freed = 0;
        for key in self.arenas.keys() {
            let Some(a) = self.arenas.get_mut(key) else {
                continue;
            };
            if a.scene != scene {
                continue;
            }
            a.scene_released = true;
            if a.blocks.is_empty()
                && let Some(gone) = self.arenas.remove(key)
            {
                freed += gone.capacity;
            }
        }
        freed
    }

    /// Drops every arena without live blocks. Returns the capacity freed.
    pub fn release_empty(&mut self) -> usize {
        let mut freed = 0;
        for key in self.arenas.keys() {
            if self.arenas.get(key).is_some_and(|a| a.blocks.is_empty())
                && let Some(gone) = self.arenas.remove(key)
            {
                freed += gone.capacity;
            }
        }
        freed
    }

    /// Arena by id.
    pub fn get(&self, arena: ArenaId) -> Option<&CompactBuffer> {
        self.arenas.get(arena.0)
    }

    /// Payload bytes inside an arena.
    pub fn bytes(&self, arena: ArenaId, offset: usize, len: usize) -> Option<&[u8]> {
        self.arenas.get(arena.0)?.data.get(offset..offset + len)
    }

    /// Writable payload bytes inside an arena.
    pub fn bytes_mut(&mut self, arena: ArenaId, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.arenas.get_mut(arena.0)?.data.get_mut(offset..offset + len)
    }

    /// Number of live arenas.
    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    /// True when no arena is alive.
    pub fn is_empty(&self) -> bool {
        self.arenas.len() == 0
    }

    /// All arenas with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaId, &CompactBuffer)> {
        self.arenas.iter().map(|(k, a)| (ArenaId(k), a))
    }

    /// Arenas of `scene`.
    pub fn arenas_of(&self, scene: SceneKey) -> Vec<ArenaId> {
        self.iter()
            .filter(|(_, a)| a.scene == scene)
            .map(|(id, _)| id)
            .collect()
    }

    /// Report rows for every arena.
    pub fn infos(&self) -> Vec<ArenaInfo> {
        self.iter()
            .map(|(_, a)| ArenaInfo {
                scene: a.scene.id,
                capacity: a.capacity,
                offset: a.offset,
                free_size: a.free_size,
                blocks: a.blocks.len(),
                scene_released: a.scene_released,
            })
            .collect()
    }
}
