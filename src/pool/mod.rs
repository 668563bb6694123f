//! The three buffer pools and the storage behind bitmap blocks.
//!
//! Each pool is a generational arena of [`BufferBlock`]s plus an index by
//! `(source, id)`, so a live key is unique per pool and a repeated request is a
//! reference bump instead of a disk read. Pools only do accounting against a
//! byte budget; the bytes themselves live on the heap, in a compact arena, in
//! the screen slab or in a read-only file mapping.
//!
//! [`Pools`] bundles the bitmap, text and scene pools with the compact packer
//! and the screen slab, and is the only place where bitmap storage is chosen
//! and given back.

pub mod compact;
pub mod id;
pub mod slab;
pub(crate) mod slots;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use memmap2::Mmap;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::model::SceneKey;
use crate::regular::RegularSetId;
use compact::{ArenaInfo, CompactPacker};
use id::{ArenaId, BlockId, BlockKey, SourceId};
use slab::{ScreenSlab, SlabStats};
use slots::Slots;

/// Which pool a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PoolKind {
    /// Decoded pictures.
    Bitmap,
    /// NUL-terminated strings.
    Text,
    /// Scene records.
    Scene,
}

impl PoolKind {
    /// Lowercase name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bitmap => "bitmap",
            Self::Text => "text",
            Self::Scene => "scene",
        }
    }
}

/// Storage of a block's payload.
#[derive(Debug)]
pub enum Payload {
    /// Owned allocation charged to the pool.
    Heap(Box<[u8]>),
    /// Carved from a compact arena.
    Arena {
        /// Arena holding the bytes.
        arena: ArenaId,
        /// Payload offset inside the arena.
        offset: usize,
    },
    /// A full-screen slab slot.
    Slab(usize),
    /// Served straight from a catalog mapping.
    Mapped {
        /// The mapping.
        map: Arc<Mmap>,
        /// Payload range inside the mapping.
        range: Range<usize>,
    },
}

impl Payload {
    /// Short storage name for reports.
    pub fn storage(&self) -> &'static str {
        match self {
            Self::Heap(_) => "heap",
            Self::Arena { .. } => "arena",
            Self::Slab(_) => "slab",
            Self::Mapped { .. } => "mapped",
        }
    }
}

/// Space a block took from a compact arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Carve {
    /// Arena the header (and maybe the payload) was carved from.
    pub arena: ArenaId,
    /// Bytes consumed in the arena.
    pub charge: usize,
}

/// A reference-counted pool entry.
#[derive(Debug)]
pub struct BufferBlock {
    key: BlockKey,
    size: usize,
    len: usize,
    refs: u32,
    payload: Payload,
    carve: Option<Carve>,
    regular: Option<RegularSetId>,
    scene: Option<SceneKey>,
}

impl BufferBlock {
    fn new(key: BlockKey, size: usize, len: usize, payload: Payload) -> Self {
        Self {
            key,
            size,
            len,
            refs: 1,
            payload,
            carve: None,
            regular: None,
            scene: None,
        }
    }

    /// Pool key.
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Aligned size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reference count.
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Storage.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Arena carve, if packed.
    pub fn carve(&self) -> Option<Carve> {
        self.carve
    }

    /// Regular set pinning this block.
    pub fn regular(&self) -> Option<RegularSetId> {
        self.regular
    }

    /// Scene the block was packed for.
    pub fn scene(&self) -> Option<SceneKey> {
        self.scene
    }
}

/// Occupancy of one pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool.
    pub kind: PoolKind,
    /// Byte budget.
    pub capacity: usize,
    /// Bytes charged now.
    pub used: usize,
    /// Highest charge seen.
    pub peak: usize,
    /// Live blocks.
    pub blocks: usize,
}

/// One row of the block list in reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlockInfo {
    /// Pool.
    pub pool: PoolKind,
    /// File set.
    pub source: SourceId,
    /// Resource id.
    pub id: u32,
    /// Aligned size.
    pub size: usize,
    /// Reference count.
    pub refs: u32,
    /// Storage kind.
    pub storage: &'static str,
    /// Pinned by a regular set.
    pub regular: bool,
    /// Scene it was packed for.
    pub scene: Option<u32>,
}

/// A byte-budgeted pool of blocks keyed by `(source, id)`.
#[derive(Debug)]
pub struct BufferPool {
    kind: PoolKind,
    capacity: usize,
    used: usize,
    peak: usize,
    blocks: Slots<BufferBlock>,
    index: HashMap<BlockKey, BlockId>,
}

impl BufferPool {
    /// Creates an empty pool with a byte budget.
    pub fn new(kind: PoolKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            used: 0,
            peak: 0,
            blocks: Slots::new(),
            index: HashMap::new(),
        }
    }

    /// Which pool this is.
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Live block for `key`, without touching its count.
    pub fn lookup(&self, key: BlockKey) -> Option<BlockId> {
        self.index.get(&key).copied()
    }

    /// Live block for `key` with its count bumped.
    pub fn acquire(&mut self, key: BlockKey) -> Option<BlockId> {
        let id = self.lookup(key)?;
        let block = self.blocks.get_mut(id.0)?;
        block.refs += 1;
        log::debug!(
            "{} pool hit for {}: refs {}",
            self.kind.name(),
            key.id,
            block.refs
        );
        Some(id)
    }

    /// Block by id.
    pub fn get(&self, id: BlockId) -> Option<&BufferBlock> {
        self.blocks.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut BufferBlock> {
        self.blocks.get_mut(id.0)
    }

    pub(crate) fn charge(&mut self, bytes: usize) -> Result<()> {
        let available = self.capacity.saturating_sub(self.used);
        if bytes > available {
            return Err(CacheError::OutOfSpace {
                pool: self.kind.name(),
                requested: bytes,
                available,
            });
        }
        self.used += bytes;
        self.peak = self.peak.max(self.used);
        Ok(())
    }

    pub(crate) fn refund(&mut self, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
    }

    fn insert(&mut self, block: BufferBlock) -> BlockId {
        let key = block.key;
        let id = BlockId(self.blocks.insert(block));
        self.index.insert(key, id);
        id
    }

    /// Drops one reference. Returns the remaining count, `None` for a stale id.
    fn unref(&mut self, id: BlockId) -> Option<u32> {
        let block = self.blocks.get_mut(id.0)?;
        block.refs = block.refs.saturating_sub(1);
        Some(block.refs)
    }

    fn take(&mut self, id: BlockId) -> Option<BufferBlock> {
        let block = self.blocks.remove(id.0)?;
        if self.index.get(&block.key) == Some(&id) {
            self.index.remove(&block.key);
        }
        Some(block)
    }

    /// Copies `bytes` into a new charged heap block of `len` payload bytes
    /// (zero padded).
    pub(crate) fn insert_heap(
        &mut self,
        key: BlockKey,
        bytes: &[u8],
        len: usize,
        aligned: usize,
    ) -> Result<BlockId> {
        self.charge(aligned)?;
        let mut buf = vec![0u8; aligned].into_boxed_slice();
        let n = bytes.len().min(len);
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(self.insert(BufferBlock::new(key, aligned, len, Payload::Heap(buf))))
    }

    /// Drops a reference on a heap block, freeing it at zero.
    pub(crate) fn release_heap(&mut self, id: BlockId) -> bool {
        if self.unref(id) != Some(0) {
            return false;
        }
        match self.take(id) {
            Some(block) => {
                self.refund(block.size);
                true
            }
            None => false,
        }
    }

    /// Payload bytes of a heap block.
    pub fn heap_bytes(&self, id: BlockId) -> Option<&[u8]> {
        let block = self.get(id)?;
        match &block.payload {
            Payload::Heap(buf) => buf.get(..block.len),
            _ => None,
        }
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no block is live.
    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 0
    }

    /// Bytes charged.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Byte budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live blocks with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BufferBlock)> {
        self.blocks.iter().map(|(k, b)| (BlockId(k), b))
    }

    /// Ids of every live block.
    pub fn ids(&self) -> Vec<BlockId> {
        self.blocks.keys().into_iter().map(BlockId).collect()
    }

    /// Occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            kind: self.kind,
            capacity: self.capacity,
            used: self.used,
            peak: self.peak,
            blocks: self.blocks.len(),
        }
    }

    fn infos(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.blocks.iter().map(|(_, b)| BlockInfo {
            pool: self.kind,
            source: b.key.source,
            id: b.key.id,
            size: b.size,
            refs: b.refs,
            storage: b.payload.storage(),
            regular: b.regular.is_some(),
            scene: b.scene.map(|s| s.id),
        })
    }
}

/// Geometry and key of a bitmap about to be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapRequest {
    /// Pool key.
    pub key: BlockKey,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Decoded payload size.
    pub size: usize,
}

/// Where a new bitmap block should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A block of its own (or a slab slot for full-screen bitmaps).
    Heap,
    /// Packed into the compact arenas of a scene.
    Compact(SceneKey),
}

/// Bitmap, text and scene pools plus bitmap storage.
#[derive(Debug)]
pub struct Pools {
    alignment: usize,
    screen_size: usize,
    /// Decoded pictures.
    pub bitmap: BufferPool,
    /// Strings.
    pub text: BufferPool,
    /// Scene records.
    pub scene: BufferPool,
    /// Per-scene arenas.
    pub packer: CompactPacker,
    /// Full-screen slots.
    pub slab: ScreenSlab,
    peak_footprint: usize,
}

impl Pools {
    /// Creates empty pools sized by `config`.
    pub fn new(config: &CacheConfig) -> Self {
        let screen_size = config.screen_bitmap_size();
        Self {
            alignment: config.alignment.max(1),
            screen_size,
            bitmap: BufferPool::new(PoolKind::Bitmap, config.bitmap_pool_capacity),
            text: BufferPool::new(PoolKind::Text, config.text_pool_capacity),
            scene: BufferPool::new(PoolKind::Scene, config.scene_pool_capacity),
            packer: CompactPacker::new(config),
            slab: ScreenSlab::new(config.align(screen_size), config.screen_slab_slots),
            peak_footprint: 0,
        }
    }

    /// Rounds `size` up to the pool alignment.
    pub fn align(&self, size: usize) -> usize {
        let mask = self.alignment - 1;
        (size + mask) & !mask
    }

    /// True for a 16-bit full-screen bitmap that a slab slot can hold.
    pub fn is_full_screen(&self, width: u16, height: u16, size: usize) -> bool {
        self.screen_size != 0
            && usize::from(width) * usize::from(height) * 2 == self.screen_size
            && self.slab.fits(self.align(size))
    }

    fn charge_bitmap(&mut self, bytes: usize) -> Result<()> {
        if let Err(e) = self.bitmap.charge(bytes) {
            self.log_occupancy();
            return Err(e);
        }
        Ok(())
    }

    /// Finds or creates an arena of `scene` and carves `charge` bytes.
    /// `None` when the charge is too large for any arena.
    fn carve(&mut self, scene: SceneKey, charge: usize) -> Result<Option<(ArenaId, usize)>> {
        let arena = match self.packer.find_fit(scene, charge) {
            Some(arena) => arena,
            None => {
                let Some(capacity) = self.packer.arena_size_for(charge) else {
                    return Ok(None);
                };
                self.charge_bitmap(capacity)?;
                self.packer.create(scene, capacity)
            }
        };
        let offset = self.packer.carve(arena, charge)?;
        Ok(Some((arena, offset)))
    }

    /// Allocates storage for a bitmap that is not cached yet. The block starts
    /// with one reference and zeroed bytes ready for the decoder.
    ///
    /// Full-screen bitmaps take a slab slot while one is free (in compact
    /// mode only their header is carved from the arena) and fall back to a
    /// heap block once the slab is exhausted. Other compact requests are
    /// packed into the scene's arenas unless they exceed the arena limit.
    ///
    /// # Errors
    /// `OutOfSpace` when the bitmap budget cannot cover the block or arena.
    pub fn alloc_bitmap(
        &mut self,
        request: BitmapRequest,
        placement: Placement,
    ) -> Result<BlockId> {
        let aligned = self.align(request.size);
        let screen = self.is_full_screen(request.width, request.height, request.size);
        let use_slab = screen && self.slab.has_free();
        let compact_scene = match placement {
            Placement::Compact(scene) if !screen || use_slab => Some(scene),
            _ => None,
        };

        let mut carve = None;
        let mut arena_offset = 0;
        if let Some(scene) = compact_scene {
            let charge = self.packer.charge_for(aligned, use_slab);
            if let Some((arena, offset)) = self.carve(scene, charge)? {
                carve = Some(Carve { arena, charge });
                arena_offset = offset;
            }
        }

        let payload = if use_slab {
            let slot = self
                .slab
                .take()
                .ok_or_else(|| CacheError::Internal("screen slab lost its free slot".into()))?;
            Payload::Slab(slot)
        } else if let Some(c) = carve {
            Payload::Arena {
                arena: c.arena,
                offset: arena_offset,
            }
        } else {
            self.charge_bitmap(aligned)?;
            Payload::Heap(vec![0u8; aligned].into_boxed_slice())
        };

        let mut block = BufferBlock::new(request.key, aligned, request.size, payload);
        block.carve = carve;
        block.scene = carve.and(compact_scene);
        let id = self.bitmap.insert(block);
        if let Some(c) = carve {
            self.packer.attach(c.arena, id);
        }
        log::debug!(
            "bitmap {} allocated: {aligned} bytes in {}",
            request.key.id,
            self.bitmap
                .get(id)
                .map_or("?", |b| b.payload.storage())
        );
        self.note_peak();
        Ok(id)
    }

    /// Registers a bitmap served straight from a catalog mapping.
    pub fn insert_mapped(&mut self, key: BlockKey, map: Arc<Mmap>, range: Range<usize>) -> BlockId {
        let len = range.len();
        let size = self.align(len);
        self.bitmap
            .insert(BufferBlock::new(key, size, len, Payload::Mapped { map, range }))
    }

    /// Pre-creates the arenas a batch of compact loads will need: the charges
    /// are summed and split so no arena exceeds the maximum block size.
    ///
    /// # Errors
    /// `OutOfSpace` when the bitmap budget cannot cover an arena. Arenas
    /// created by the failed call are dropped and refunded.
    pub fn reserve_compact(&mut self, scene: SceneKey, charges: &[usize]) -> Result<usize> {
        let plan = self.packer.plan_reservation(charges);
        let mut created = Vec::with_capacity(plan.len());
        for &capacity in &plan {
            if let Err(e) = self.charge_bitmap(capacity) {
                for arena in created {
                    if let Some(freed) = self.packer.discard(arena) {
                        self.bitmap.refund(freed);
                    }
                }
                return Err(e);
            }
            created.push(self.packer.create(scene, capacity));
        }
        self.note_peak();
        Ok(plan.len())
    }

    /// Decoded bytes of a bitmap block.
    pub fn bitmap_bytes(&self, id: BlockId) -> Option<&[u8]> {
        let block = self.bitmap.get(id)?;
        match &block.payload {
            Payload::Heap(buf) => buf.get(..block.len),
            Payload::Arena { arena, offset } => self.packer.bytes(*arena, *offset, block.len),
            Payload::Slab(slot) => self.slab.bytes(*slot, block.len),
            Payload::Mapped { map, range } => map.get(range.clone()),
        }
    }

    /// Writable bytes of a bitmap block. `None` for mapped blocks.
    pub fn bitmap_bytes_mut(&mut self, id: BlockId) -> Option<&mut [u8]> {
        let block = self.bitmap.get(id)?;
        let len = block.len;
        match block.payload {
            Payload::Arena { arena, offset } => self.packer.bytes_mut(arena, offset, len),
            Payload::Slab(slot) => self.slab.bytes_mut(slot, len),
            Payload::Heap(_) => match &mut self.bitmap.get_mut(id)?.payload {
                Payload::Heap(buf) => buf.get_mut(..len),
                _ => None,
            },
            Payload::Mapped { .. } => None,
        }
    }

    /// Drops a reference on a bitmap block. At zero the block is freed unless
    /// a regular set pins it. Returns whether storage was freed.
    pub fn release_bitmap(&mut self, id: BlockId) -> bool {
        match self.bitmap.unref(id) {
            None => {
                log::debug!("release of stale bitmap block {id}");
                false
            }
            Some(0) => {
                if self.bitmap.get(id).is_some_and(|b| b.regular.is_some()) {
                    log::debug!("bitmap block {id} unreferenced but pinned");
                    return false;
                }
                self.free_bitmap(id)
            }
            Some(_) => false,
        }
    }

    /// Frees a bitmap block regardless of its count.
    pub fn free_bitmap(&mut self, id: BlockId) -> bool {
        let Some(block) = self.bitmap.take(id) else {
            return false;
        };
        match block.payload {
            Payload::Heap(_) => self.bitmap.refund(block.size),
            Payload::Slab(slot) => self.slab.give_back(slot),
            Payload::Arena { .. } | Payload::Mapped { .. } => {}
        }
        if let Some(c) = block.carve
            && let Some(capacity) = self.packer.release_block(c.arena, id, c.charge)
        {
            log::debug!("compact arena {} released with its last block", c.arena);
            self.bitmap.refund(capacity);
        }
        true
    }

    /// Pins the live block of `key` to `set`.
    pub fn pin(&mut self, key: BlockKey, set: RegularSetId) -> bool {
        let Some(id) = self.bitmap.lookup(key) else {
            return false;
        };
        match self.bitmap.get_mut(id) {
            Some(block) => {
                block.regular = Some(set);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_regular(&mut self, id: BlockId, set: Option<RegularSetId>) {
        if let Some(block) = self.bitmap.get_mut(id) {
            block.regular = set;
        }
    }

    /// Unpins every block of `sets`, freeing the unreferenced ones. Returns
    /// the number of blocks freed.
    pub fn unpin(&mut self, sets: &[RegularSetId]) -> usize {
        let pinned: Vec<(BlockId, u32)> = self
            .bitmap
            .iter()
            .filter(|(_, b)| b.regular.is_some_and(|r| sets.contains(&r)))
            .map(|(id, b)| (id, b.refs))
            .collect();
        let mut freed = 0;
        for (id, refs) in pinned {
            self.set_regular(id, None);
            if refs == 0 && self.free_bitmap(id) {
                freed += 1;
            }
        }
        freed
    }

    /// Marks the arenas of an unloaded scene and frees the empty ones.
    pub fn release_scene_arenas(&mut self, scene: SceneKey) {
        let freed = self.packer.release_scene(scene);
        self.bitmap.refund(freed);
    }

    /// Frees every unpinned bitmap, every text and every arena left empty.
    /// Scene records stay. Returns the number of blocks freed.
    pub fn clear_unpinned(&mut self) -> usize {
        let mut freed = 0;
        for id in self.bitmap.ids() {
            if self.bitmap.get(id).is_some_and(|b| b.regular.is_none()) && self.free_bitmap(id) {
                freed += 1;
            }
        }
        for id in self.text.ids() {
            if let Some(block) = self.text.take(id) {
                self.text.refund(block.size);
                freed += 1;
            }
        }
        let arenas = self.packer.release_empty();
        self.bitmap.refund(arenas);
        freed
    }

    /// Copies a NUL-terminated string into the text pool.
    ///
    /// # Errors
    /// `OutOfSpace` when the text budget is exhausted.
    pub fn alloc_text(&mut self, key: BlockKey, bytes: &[u8]) -> Result<BlockId> {
        let len = bytes.len() + 1;
        let aligned = self.align(len);
        let id = match self.text.insert_heap(key, bytes, len, aligned) {
            Ok(id) => id,
            Err(e) => {
                self.log_occupancy();
                return Err(e);
            }
        };
        self.note_peak();
        Ok(id)
    }

    /// Copies a scene record into the scene pool.
    ///
    /// # Errors
    /// `OutOfSpace` when the scene budget is exhausted.
    pub fn alloc_scene(&mut self, key: BlockKey, record: &[u8]) -> Result<BlockId> {
        let aligned = self.align(record.len());
        let id = match self.scene.insert_heap(key, record, record.len(), aligned) {
            Ok(id) => id,
            Err(e) => {
                self.log_occupancy();
                return Err(e);
            }
        };
        self.note_peak();
        Ok(id)
    }

    /// Bytes held right now by every pool and the slab.
    pub fn footprint(&self) -> usize {
        self.bitmap.used() + self.text.used() + self.scene.used() + self.slab.footprint()
    }

    /// Highest footprint seen.
    pub fn peak_memory(&self) -> usize {
        self.peak_footprint
    }

    fn note_peak(&mut self) {
        self.peak_footprint = self.peak_footprint.max(self.footprint());
    }

    /// Per-pool occupancy.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        vec![self.bitmap.stats(), self.text.stats(), self.scene.stats()]
    }

    /// Every live block of every pool.
    pub fn block_infos(&self) -> Vec<BlockInfo> {
        self.bitmap
            .infos()
            .chain(self.text.infos())
            .chain(self.scene.infos())
            .collect()
    }

    /// Every live arena.
    pub fn arena_infos(&self) -> Vec<ArenaInfo> {
        self.packer.infos()
    }

    /// Slab occupancy.
    pub fn slab_stats(&self) -> SlabStats {
        self.slab.stats()
    }

    /// Logs one line per pool after an allocation failure.
    pub fn log_occupancy(&self) {
        for pool in [&self.bitmap, &self.text, &self.scene] {
            let stats = pool.stats();
            log::error!(
                "{} pool: {} / {} bytes used, peak {}, {} blocks",
                stats.kind.name(),
                stats.used,
                stats.capacity,
                stats.peak,
                stats.blocks
            );
        }
        let slab = self.slab.stats();
        log::error!(
            "compact arenas: {}, screen slab: {}/{} slots in use",
            self.packer.len(),
            slab.in_use,
            slab.slots
        );
    }
}
