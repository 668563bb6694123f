//! The public facade: one [`CacheContext`] owns every pool, the file-set
//! cache, the regular registry and the preload scheduler.
//!
//! Every entry point takes the cache mutex for the duration of its pool work
//! only. Decoding happens under that mutex, straight into the block the pool
//! just handed out, so no caller ever sees a half-filled block. The preload
//! worker goes through the same entry points and competes for the same mutex;
//! callers never wait for the worker.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::catalog::{DescriptorBody, StyleCatalog};
use crate::config::CacheConfig;
use crate::decode::DecoderRegistry;
use crate::error::{CacheError, Result};
use crate::fileset::{FileSetCache, FileSetHandle, ResourceFileSet};
use crate::format::{DescriptorKind, FLAG_REGULAR, RegionBody, TextBody};
use crate::inspector::{CacheStats, SceneInfo};
use crate::model::{
    Group, GroupLevel, Picture, PictureDesc, PictureRegion, Rect, Scene, SceneKey, Scope, Text,
};
use crate::pool::id::{BlockId, BlockKey, SourceId};
use crate::pool::{BitmapRequest, Placement, Pools};
use crate::preload::{
    CancelFilter, PreloadScheduler, PreloadSink, PreloadStats, PreloadUnit, StatusCallback,
};
use crate::regular::{RegularRegistry, RegularScope, RegularSetId};

/// Scenes hold groups, groups hold subgroups; nothing nests deeper.
const MAX_DEPTH: u8 = 2;

/// How a preload batch runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreloadMode {
    /// Queued for the background worker.
    #[default]
    Async,
    /// Drained on the calling thread before returning.
    Serial,
}

/// Options of a preload batch.
#[derive(Clone, Default)]
pub struct PreloadOptions {
    /// Background or inline.
    pub mode: PreloadMode,
    /// Pack the bitmaps into the scene's compact arenas.
    pub compact: bool,
    /// Called with `Loading` before and `Finished` after the batch.
    pub callback: Option<StatusCallback>,
}

impl PreloadOptions {
    /// Background batch without packing or callback.
    pub fn background() -> Self {
        Self::default()
    }

    /// Inline batch without packing or callback.
    pub fn serial() -> Self {
        Self {
            mode: PreloadMode::Serial,
            ..Self::default()
        }
    }

    /// Enables compact packing.
    pub fn compact(mut self) -> Self {
        self.compact = true;
        self
    }

    /// Sets the status callback.
    pub fn with_callback(mut self, callback: StatusCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for PreloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadOptions")
            .field("mode", &self.mode)
            .field("compact", &self.compact)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct SceneState {
    block: BlockId,
    fileset: FileSetHandle,
    /// Bitmap references taken by preloads on behalf of the scene.
    held: Vec<BlockId>,
}

#[derive(Debug)]
struct CacheState {
    files: FileSetCache,
    pools: Pools,
    regular: RegularRegistry,
    scenes: HashMap<SceneKey, SceneState>,
    decodes: u64,
}

#[derive(Debug)]
struct CacheInner {
    config: CacheConfig,
    decoders: DecoderRegistry,
    state: Mutex<CacheState>,
    scheduler: PreloadScheduler,
}

impl CacheInner {
    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| CacheError::poisoned("cache"))
    }
}

impl PreloadSink for CacheInner {
    fn preload_picture(&self, scene: SceneKey, picture: &PictureDesc, compact: bool) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if !state.scenes.contains_key(&scene) {
            log::debug!("skipping preload of {} for unloaded {scene:?}", picture.id);
            return Ok(());
        }
        let placement = if compact {
            Placement::Compact(scene)
        } else {
            Placement::Heap
        };
        let block =
            state.materialize(&self.config, &self.decoders, Some(scene), picture, placement)?;
        if let Some(s) = state.scenes.get_mut(&scene) {
            s.held.push(block);
        }
        Ok(())
    }
}

// --- CATALOG WALKS ---

fn is_pinned(flags: u8) -> bool {
    flags & FLAG_REGULAR != 0
}

/// Position and catalog pin of picture `id` among a child chain, including
/// the frames of picture regions.
fn find_picture(
    catalog: &StyleCatalog,
    (count, offset): (u32, u32),
    id: u32,
) -> Result<Option<(i16, i16, bool)>> {
    for desc in catalog.children(offset, count) {
        let desc = desc?;
        match desc.body {
            DescriptorBody::Picture(body) if desc.header.id == id => {
                return Ok(Some((body.x, body.y, is_pinned(desc.header.flags))));
            }
            DescriptorBody::Region(region)
                if id >= desc.header.id && id - desc.header.id < region.frame_count =>
            {
                return Ok(Some((region.x, region.y, false)));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Ids of a region's frames. A run whose end does not fit a `u32` is corrupt.
fn frame_range(first: u32, region: &RegionBody) -> Result<Range<u32>> {
    let end = first.checked_add(region.frame_count).ok_or_else(|| {
        CacheError::InvalidFormat(format!(
            "picture region {first}: {} frames overflow the id space",
            region.frame_count
        ))
    })?;
    Ok(first..end)
}

/// Every picture below a child chain as `(id, x, y, pinned)`, groups and
/// region frames included.
fn collect_pictures(
    catalog: &StyleCatalog,
    (count, offset): (u32, u32),
    depth: u8,
    out: &mut Vec<(u32, i16, i16, bool)>,
) -> Result<()> {
    for desc in catalog.children(offset, count) {
        let desc = desc?;
        match desc.body {
            DescriptorBody::Picture(body) => {
                out.push((desc.header.id, body.x, body.y, is_pinned(desc.header.flags)));
            }
            DescriptorBody::Region(region) => out.extend(
                frame_range(desc.header.id, &region)?.map(|id| (id, region.x, region.y, false)),
            ),
            DescriptorBody::Container(c) if depth < MAX_DEPTH => {
                collect_pictures(catalog, (c.child_count, c.child_offset), depth + 1, out)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn scope_depth(scope: &Scope<'_>) -> u8 {
    match scope {
        Scope::Scene(_) => 0,
        Scope::Group(g) => match g.level {
            GroupLevel::Group => 1,
            GroupLevel::Subgroup => 2,
        },
    }
}

fn describe(
    set: &ResourceFileSet,
    fileset: FileSetHandle,
    (id, x, y, pinned): (u32, i16, i16, bool),
) -> Result<PictureDesc> {
    Ok(PictureDesc {
        id,
        x,
        y,
        pinned,
        fileset,
        location: set.pictures().locate(id)?,
    })
}

impl CacheState {
    fn resolve_picture(&self, scope: &Scope<'_>, id: u32) -> Result<PictureDesc> {
        let set = self.files.get(scope.fileset())?;
        let (x, y, pinned) = find_picture(set.catalog(), scope.children(), id)?.ok_or_else(
            || CacheError::NotFound(format!("picture {id} in {:?}", scope.scene_key())),
        )?;
        describe(&set, scope.fileset(), (id, x, y, pinned))
    }

    fn resolve_text(&self, scope: &Scope<'_>, id: u32) -> Result<TextBody> {
        let set = self.files.get(scope.fileset())?;
        let (count, offset) = scope.children();
        for desc in set.catalog().children(offset, count) {
            let desc = desc?;
            if let DescriptorBody::Text(body) = desc.body
                && desc.header.id == id
            {
                return Ok(body);
            }
        }
        Err(CacheError::NotFound(format!(
            "text {id} in {:?}",
            scope.scene_key()
        )))
    }

    /// Returns the block of `picture` with one more reference, reading and
    /// decoding it on a miss.
    fn materialize(
        &mut self,
        config: &CacheConfig,
        decoders: &DecoderRegistry,
        scene: Option<SceneKey>,
        picture: &PictureDesc,
        placement: Placement,
    ) -> Result<BlockId> {
        let key = BlockKey {
            source: picture.fileset.source(),
            id: picture.id,
        };
        if let Some(block) = self.pools.bitmap.acquire(key) {
            return Ok(block);
        }

        let set = self.files.get(picture.fileset)?;
        let location = picture.location;
        let size = location.decoded_size();
        let mapped = if config.use_mmap && location.format.is_raw() {
            set.pictures().mapped_payload(&location)
        } else {
            None
        };
        let block = match mapped {
            Some((map, range)) => {
                if range.len() != size {
                    return Err(CacheError::DecodeFailed(format!(
                        "picture {}: {} stored bytes for a {size}-byte bitmap",
                        picture.id,
                        range.len()
                    )));
                }
                self.pools.insert_mapped(key, map, range)
            }
            None => {
                let src = set.pictures().read_payload(&location)?;
                let request = BitmapRequest {
                    key,
                    width: location.width,
                    height: location.height,
                    size,
                };
                let block = self.pools.alloc_bitmap(request, placement)?;
                let decoded = match self.pools.bitmap_bytes_mut(block) {
                    Some(dst) => decoders.decode_into(
                        location.format,
                        &src,
                        dst,
                        location.width,
                        location.height,
                    ),
                    None => Err(CacheError::Internal(format!(
                        "bitmap block {block} has no writable storage"
                    ))),
                };
                if let Err(e) = decoded {
                    self.pools.free_bitmap(block);
                    return Err(e);
                }
                self.decodes += 1;
                block
            }
        };
        log::debug!("picture {} materialized as {block}", picture.id);

        if let Some(scene) = scene
            && let Some(set_id) = self.regular.lookup(scene, picture.id)
        {
            self.pools.set_regular(block, Some(set_id));
        }
        Ok(block)
    }

    fn load_text_block(&mut self, fileset: FileSetHandle, id: u32) -> Result<BlockId> {
        let key = BlockKey {
            source: fileset.source(),
            id,
        };
        if let Some(block) = self.pools.text.acquire(key) {
            return Ok(block);
        }
        let set = self.files.get(fileset)?;
        let entry = set.texts().locate(id)?;
        let bytes = set.texts().read(&entry)?;
        self.pools.alloc_text(key, &bytes)
    }

    fn pin(&mut self, scope: RegularScope, ids: &[u32]) -> RegularSetId {
        let set = self.regular.insert(scope, ids.iter().copied());
        for &id in ids {
            self.pools.pin(
                BlockKey {
                    source: scope.scene.source,
                    id,
                },
                set,
            );
        }
        set
    }

    /// Releases what a fully unloaded scene still holds.
    fn tear_down(&mut self, key: SceneKey) {
        if let Some(scene) = self.scenes.remove(&key) {
            for block in scene.held {
                self.pools.release_bitmap(block);
            }
        }
        self.pools.release_scene_arenas(key);
    }

    /// Compact charges of the pictures in `descs` that are not cached yet.
    fn compact_charges(&self, config: &CacheConfig, descs: &[PictureDesc]) -> Vec<usize> {
        descs
            .iter()
            .filter(|d| !(config.use_mmap && d.format().is_raw()))
            .filter(|d| {
                self.pools
                    .bitmap
                    .lookup(BlockKey {
                        source: d.fileset.source(),
                        id: d.id,
                    })
                    .is_none()
            })
            .map(|d| {
                let size = d.decoded_size();
                let screen = self.pools.is_full_screen(d.width(), d.height(), size);
                self.pools
                    .packer
                    .charge_for(self.pools.align(size), screen)
            })
            .collect()
    }
}

/// The resource cache.
///
/// Not `Clone`: dropping the context stops its preload worker. Share it
/// behind an `Arc` when several threads need it.
#[derive(Debug)]
pub struct CacheContext {
    inner: Arc<CacheInner>,
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        self.inner.scheduler.stop();
    }
}

impl CacheContext {
    /// Creates an empty cache with the built-in decoders.
    ///
    /// # Errors
    /// `InvalidFormat` when the configuration is inconsistent.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_decoders(config, DecoderRegistry::new())
    }

    /// Creates an empty cache with a custom decoder registry.
    ///
    /// # Errors
    /// `InvalidFormat` when the configuration is inconsistent.
    pub fn with_decoders(config: CacheConfig, decoders: DecoderRegistry) -> Result<Self> {
        config.validate()?;
        let state = CacheState {
            files: FileSetCache::new(config.max_open_sets),
            pools: Pools::new(&config),
            regular: RegularRegistry::new(),
            scenes: HashMap::new(),
            decodes: 0,
        };
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                decoders,
                state: Mutex::new(state),
                scheduler: PreloadScheduler::new(),
            }),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // --- FILE SETS ---

    /// Opens (or shares) the file set of a style/picture/text trio.
    ///
    /// # Errors
    /// `NotFound` for a missing file, `InvalidFormat` for a corrupt one,
    /// `TooManyOpenSets` when no slot can be freed.
    pub fn open<P: AsRef<Path>>(&self, style: P, picture: P, text: P) -> Result<FileSetHandle> {
        let mut state = self.inner.lock()?;
        state.files.open(
            style.as_ref(),
            picture.as_ref(),
            text.as_ref(),
            &self.inner.config,
        )
    }

    /// Drops a reference on a file set; `force` closes it once unreferenced.
    /// Returns whether the set was closed.
    ///
    /// # Errors
    /// `Internal` for a stale handle.
    pub fn close(&self, handle: FileSetHandle, force: bool) -> Result<bool> {
        self.inner.lock()?.files.close(handle, force)
    }

    /// Picture payload reads served by a file set.
    ///
    /// # Errors
    /// `Internal` for a stale handle.
    pub fn payload_reads(&self, handle: FileSetHandle) -> Result<u64> {
        Ok(self.inner.lock()?.files.get(handle)?.payload_reads())
    }

    /// Number of open file sets.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn open_sets(&self) -> Result<usize> {
        Ok(self.inner.lock()?.files.open_count())
    }

    // --- SCENES & GROUPS ---

    /// Loads scene `id`. A scene already loaded is shared with one more
    /// reference. Pictures the catalog flags as regular are pinned on first
    /// load.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `OutOfSpace` when the scene pool is full.
    pub fn load_scene(&self, fileset: FileSetHandle, id: u32) -> Result<Scene> {
        let mut guard = self.inner.lock()?;
        let state = &mut *guard;
        let set = state.files.get(fileset)?;
        let record = set.catalog().find_scene(id)?;
        let key = SceneKey {
            source: fileset.source(),
            id,
        };
        let block_key = BlockKey {
            source: key.source,
            id,
        };

        let block = match state.pools.scene.acquire(block_key) {
            Some(block) => block,
            None => {
                let mut pictures = Vec::new();
                collect_pictures(
                    set.catalog(),
                    (record.child_count, record.child_offset),
                    0,
                    &mut pictures,
                )?;
                let block = state.pools.alloc_scene(block_key, &record.to_bytes())?;
                let pinned: Vec<u32> = pictures
                    .iter()
                    .filter(|p| p.3)
                    .map(|p| p.0)
                    .collect();
                if !pinned.is_empty() {
                    state.pin(RegularScope::scene(key), &pinned);
                }
                state.scenes.insert(
                    key,
                    SceneState {
                        block,
                        fileset,
                        held: Vec::new(),
                    },
                );
                log::info!("scene {id:#x} loaded ({} pinned pictures)", pinned.len());
                block
            }
        };

        Ok(Scene {
            key,
            fileset,
            block,
            rect: Rect {
                x: record.x,
                y: record.y,
                width: record.width,
                height: record.height,
            },
            background: record.background,
            opacity: record.opacity,
            child_count: record.child_count,
            child_offset: record.child_offset,
        })
    }

    /// Gives a scene back. When the last reference goes, queued preloads of
    /// the scene are cancelled, the bitmap references preloads took for it are
    /// dropped and its compact arenas are released. Pinned bitmaps and
    /// bitmaps still referenced by callers survive.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn unload_scene(&self, scene: Scene) -> Result<()> {
        let key = scene.key;
        let gone = {
            let mut guard = self.inner.lock()?;
            let state = &mut *guard;
            let gone = state.pools.scene.release_heap(scene.block);
            if gone {
                state.tear_down(key);
                log::info!("scene {:#x} unloaded", key.id);
            }
            gone
        };
        if gone {
            self.inner.scheduler.cancel(CancelFilter::Scene(key))?;
        }
        Ok(())
    }

    /// True while scene `key` is loaded.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn is_scene_loaded(&self, key: SceneKey) -> Result<bool> {
        Ok(self.inner.lock()?.scenes.contains_key(&key))
    }

    /// Materializes group `id` under a scene, or subgroup `id` under a group.
    ///
    /// # Errors
    /// `NotFound` when the scope has no such container.
    pub fn load_group(&self, scope: Scope<'_>, id: u32) -> Result<Group> {
        let (kind, level, parent) = match scope {
            Scope::Scene(_) => (DescriptorKind::Group, GroupLevel::Group, None),
            Scope::Group(g) if g.level == GroupLevel::Group => {
                (DescriptorKind::Subgroup, GroupLevel::Subgroup, Some(g.id))
            }
            Scope::Group(g) => {
                return Err(CacheError::NotFound(format!(
                    "subgroup {:#x} cannot contain groups",
                    g.id
                )));
            }
        };
        let state = self.inner.lock()?;
        let set = state.files.get(scope.fileset())?;
        let (count, offset) = scope.children();
        for desc in set.catalog().children(offset, count) {
            let desc = desc?;
            if let DescriptorBody::Container(body) = desc.body
                && desc.header.kind == kind
                && desc.header.id == id
            {
                return Ok(Group {
                    scene: scope.scene_key(),
                    fileset: scope.fileset(),
                    id,
                    level,
                    rect: Rect {
                        x: body.x,
                        y: body.y,
                        width: body.width,
                        height: body.height,
                    },
                    parent,
                    child_count: body.child_count,
                    child_offset: body.child_offset,
                });
            }
        }
        Err(CacheError::NotFound(format!(
            "group {id:#x} in {:?}",
            scope.scene_key()
        )))
    }

    /// Materializes subgroup `id` of `group`.
    ///
    /// # Errors
    /// `NotFound` when the group has no such subgroup.
    pub fn load_subgroup(&self, group: &Group, id: u32) -> Result<Group> {
        self.load_group(Scope::Group(group), id)
    }

    /// Releases a group. Groups hold no cache resources.
    pub fn unload_group(&self, group: Group) {
        log::debug!("group {:#x} released", group.id);
    }

    /// Materializes the picture region whose first frame is `id`.
    ///
    /// # Errors
    /// `NotFound` when the scope has no such region.
    pub fn load_picregion(&self, scope: Scope<'_>, id: u32) -> Result<PictureRegion> {
        let state = self.inner.lock()?;
        let set = state.files.get(scope.fileset())?;
        let (count, offset) = scope.children();
        for desc in set.catalog().children(offset, count) {
            let desc = desc?;
            if let DescriptorBody::Region(body) = desc.body
                && desc.header.id == id
            {
                frame_range(id, &body)?;
                return Ok(PictureRegion {
                    scene: scope.scene_key(),
                    fileset: scope.fileset(),
                    first_id: id,
                    frame_count: body.frame_count,
                    rect: Rect {
                        x: body.x,
                        y: body.y,
                        width: body.width,
                        height: body.height,
                    },
                });
            }
        }
        Err(CacheError::NotFound(format!(
            "picture region {id} in {:?}",
            scope.scene_key()
        )))
    }

    /// Releases a region handle. Frames loaded through it are released with
    /// [`Self::unload_picture`].
    pub fn unload_picregion(&self, region: PictureRegion) {
        log::debug!("picture region {} released", region.first_id);
    }

    // --- PICTURES ---

    /// Resolves picture `id` in `scope` without loading it.
    ///
    /// # Errors
    /// `NotFound` when neither the scope nor its regions hold the id.
    pub fn describe_picture(&self, scope: Scope<'_>, id: u32) -> Result<PictureDesc> {
        self.inner.lock()?.resolve_picture(&scope, id)
    }

    /// Loads picture `id` from `scope`. A cached picture only gains a
    /// reference; a miss reads and decodes it into a block of its own (or a
    /// slab slot for full-screen bitmaps).
    ///
    /// # Errors
    /// `NotFound`, `OutOfSpace`, `ShortRead` or `DecodeFailed`.
    pub fn load_picture(&self, scope: Scope<'_>, id: u32) -> Result<Picture> {
        let inner = &*self.inner;
        let mut guard = inner.lock()?;
        let state = &mut *guard;
        let desc = state.resolve_picture(&scope, id)?;
        let block = state.materialize(
            &inner.config,
            &inner.decoders,
            Some(scope.scene_key()),
            &desc,
            Placement::Heap,
        )?;
        Ok(Picture { desc, block })
    }

    /// Loads several pictures. On failure the pictures already loaded by this
    /// call are released before the error is returned.
    ///
    /// # Errors
    /// The first error of any picture.
    pub fn load_pictures(&self, scope: Scope<'_>, ids: &[u32]) -> Result<Vec<Picture>> {
        let inner = &*self.inner;
        let mut guard = inner.lock()?;
        let state = &mut *guard;
        let mut loaded = Vec::with_capacity(ids.len());
        for &id in ids {
            let outcome = state.resolve_picture(&scope, id).and_then(|desc| {
                state
                    .materialize(
                        &inner.config,
                        &inner.decoders,
                        Some(scope.scene_key()),
                        &desc,
                        Placement::Heap,
                    )
                    .map(|block| Picture { desc, block })
            });
            match outcome {
                Ok(picture) => loaded.push(picture),
                Err(e) => {
                    log::warn!(
                        "picture batch failed at {id}, releasing {} loaded",
                        loaded.len()
                    );
                    for picture in loaded {
                        state.pools.release_bitmap(picture.block);
                    }
                    return Err(e);
                }
            }
        }
        Ok(loaded)
    }

    /// Loads picture `id` straight from a file set, outside any scene.
    ///
    /// # Errors
    /// `NotFound`, `OutOfSpace`, `ShortRead` or `DecodeFailed`.
    pub fn load_picture_by_id(&self, fileset: FileSetHandle, id: u32) -> Result<Picture> {
        let inner = &*self.inner;
        let mut guard = inner.lock()?;
        let state = &mut *guard;
        let set = state.files.get(fileset)?;
        let desc = describe(&set, fileset, (id, 0, 0, false))?;
        let block =
            state.materialize(&inner.config, &inner.decoders, None, &desc, Placement::Heap)?;
        Ok(Picture { desc, block })
    }

    /// Gives a picture back. Returns whether its storage was freed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn unload_picture(&self, picture: Picture) -> Result<bool> {
        Ok(self.inner.lock()?.pools.release_bitmap(picture.block))
    }

    /// Runs `f` over the decoded bytes of `picture`.
    ///
    /// # Errors
    /// `Internal` when the block no longer exists (e.g. after `force_clear`).
    pub fn with_picture_data<R>(&self, picture: &Picture, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.inner.lock()?;
        let bytes = state.pools.bitmap_bytes(picture.block).ok_or_else(|| {
            CacheError::Internal(format!("picture {} is no longer cached", picture.id()))
        })?;
        Ok(f(bytes))
    }

    /// Current reference count of a picture's block.
    ///
    /// # Errors
    /// `Internal` when the block no longer exists.
    pub fn picture_refs(&self, picture: &Picture) -> Result<u32> {
        let state = self.inner.lock()?;
        state
            .pools
            .bitmap
            .get(picture.block)
            .map(|b| b.refs())
            .ok_or_else(|| {
                CacheError::Internal(format!("picture {} is no longer cached", picture.id()))
            })
    }

    /// Reference count of the cached bitmap `id` of a file set, if cached.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn bitmap_refs(&self, source: SourceId, id: u32) -> Result<Option<u32>> {
        let state = self.inner.lock()?;
        let key = BlockKey { source, id };
        Ok(state
            .pools
            .bitmap
            .lookup(key)
            .and_then(|b| state.pools.bitmap.get(b))
            .map(|b| b.refs()))
    }

    // --- TEXT ---

    /// Loads text `id` from `scope`.
    ///
    /// # Errors
    /// `NotFound` or `OutOfSpace`.
    pub fn load_text(&self, scope: Scope<'_>, id: u32) -> Result<Text> {
        let mut guard = self.inner.lock()?;
        let state = &mut *guard;
        let body = state.resolve_text(&scope, id)?;
        let block = state.load_text_block(scope.fileset(), id)?;
        Ok(Text {
            id,
            rect: Rect {
                x: body.x,
                y: body.y,
                width: body.width,
                height: body.height,
            },
            color: body.color,
            background: body.background,
            align: body.align,
            block,
        })
    }

    /// Loads several texts, releasing the loaded ones if any fails.
    ///
    /// # Errors
    /// The first error of any text.
    pub fn load_texts(&self, scope: Scope<'_>, ids: &[u32]) -> Result<Vec<Text>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.load_text(scope, id) {
                Ok(text) => loaded.push(text),
                Err(e) => {
                    log::warn!("text batch failed at {id}, releasing {} loaded", loaded.len());
                    for text in loaded {
                        self.unload_text(text)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(loaded)
    }

    /// Loads text `id` straight from a file set, outside any scene.
    ///
    /// # Errors
    /// `NotFound` or `OutOfSpace`.
    pub fn load_text_by_id(&self, fileset: FileSetHandle, id: u32) -> Result<Text> {
        let block = self.inner.lock()?.load_text_block(fileset, id)?;
        Ok(Text {
            id,
            rect: Rect::default(),
            color: 0,
            background: 0,
            align: 0,
            block,
        })
    }

    /// Gives a text back. Returns whether its storage was freed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn unload_text(&self, text: Text) -> Result<bool> {
        Ok(self.inner.lock()?.pools.text.release_heap(text.block))
    }

    /// The string of a loaded text, without its terminating NUL.
    ///
    /// # Errors
    /// `Internal` when the block no longer exists.
    pub fn text_string(&self, text: &Text) -> Result<String> {
        let state = self.inner.lock()?;
        let bytes = state
            .pools
            .text
            .heap_bytes(text.block)
            .ok_or_else(|| CacheError::Internal(format!("text {} is no longer cached", text.id)))?;
        let body = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        Ok(String::from_utf8_lossy(body).into_owned())
    }

    // --- PRELOAD ---

    /// Preloads pictures of `scope`: the listed ids, or every picture below
    /// the scope when `ids` is `None`. The references taken belong to the
    /// scene and are dropped when it unloads. Returns the number of pictures
    /// scheduled.
    ///
    /// # Errors
    /// `NotFound` when the scene is not loaded or an id is unknown;
    /// `OutOfSpace` when compact arenas cannot be reserved.
    pub fn preload(
        &self,
        scope: Scope<'_>,
        ids: Option<&[u32]>,
        options: PreloadOptions,
    ) -> Result<usize> {
        let scene = scope.scene_key();
        let descs = {
            let mut guard = self.inner.lock()?;
            let state = &mut *guard;
            if !state.scenes.contains_key(&scene) {
                return Err(CacheError::NotFound(format!("{scene:?} is not loaded")));
            }
            let descs = match ids {
                Some(ids) => ids
                    .iter()
                    .map(|&id| state.resolve_picture(&scope, id))
                    .collect::<Result<Vec<_>>>()?,
                None => {
                    let set = state.files.get(scope.fileset())?;
                    let mut found = Vec::new();
                    collect_pictures(
                        set.catalog(),
                        scope.children(),
                        scope_depth(&scope),
                        &mut found,
                    )?;
                    found
                        .into_iter()
                        .map(|p| describe(&set, scope.fileset(), p))
                        .collect::<Result<Vec<_>>>()?
                }
            };
            if options.compact {
                let charges = state.compact_charges(&self.inner.config, &descs);
                state.pools.reserve_compact(scene, &charges)?;
            }
            descs
        };
        self.submit(scene, descs, options)
    }

    /// Preloads every frame of a picture region.
    ///
    /// # Errors
    /// As [`Self::preload`].
    pub fn preload_picregion(
        &self,
        region: &PictureRegion,
        options: PreloadOptions,
    ) -> Result<usize> {
        let descs = {
            let mut guard = self.inner.lock()?;
            let state = &mut *guard;
            if !state.scenes.contains_key(&region.scene) {
                return Err(CacheError::NotFound(format!(
                    "{:?} is not loaded",
                    region.scene
                )));
            }
            let set = state.files.get(region.fileset)?;
            let descs = region
                .frame_ids()
                .map(|id| describe(&set, region.fileset, (id, region.rect.x, region.rect.y, false)))
                .collect::<Result<Vec<_>>>()?;
            if options.compact {
                let charges = state.compact_charges(&self.inner.config, &descs);
                state.pools.reserve_compact(region.scene, &charges)?;
            }
            descs
        };
        self.submit(region.scene, descs, options)
    }

    fn submit(
        &self,
        scene: SceneKey,
        descs: Vec<PictureDesc>,
        options: PreloadOptions,
    ) -> Result<usize> {
        let count = descs.len();
        let mut units = Vec::with_capacity(count + 2);
        if let Some(callback) = &options.callback {
            units.push(PreloadUnit::BeginCallback {
                scene: Some(scene),
                callback: Arc::clone(callback),
            });
        }
        units.extend(descs.into_iter().map(|picture| {
            if options.compact {
                PreloadUnit::NormalCompact { scene, picture }
            } else {
                PreloadUnit::Normal { scene, picture }
            }
        }));
        if let Some(callback) = options.callback {
            units.push(PreloadUnit::EndCallback {
                scene: Some(scene),
                callback,
            });
        }
        match options.mode {
            PreloadMode::Serial => {
                let failed = PreloadScheduler::run_serial(units, &*self.inner);
                if failed > 0 {
                    log::warn!("serial preload of {scene:?}: {failed} of {count} failed");
                }
            }
            PreloadMode::Async => self.enqueue_preload(units)?,
        }
        Ok(count)
    }

    /// Queues prepared units for the background worker.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock or when the worker cannot start.
    pub fn enqueue_preload(&self, units: Vec<PreloadUnit>) -> Result<()> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.enqueue(units, weak)
    }

    /// Removes queued preloads. Units already taken by the worker finish.
    /// Returns the number removed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn cancel_preload(&self, filter: CancelFilter) -> Result<usize> {
        self.inner.scheduler.cancel(filter)
    }

    /// Stops the worker from taking new units.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn pause_preload(&self) -> Result<()> {
        self.inner.scheduler.pause()
    }

    /// Lets the worker continue.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn resume_preload(&self) -> Result<()> {
        self.inner.scheduler.resume()
    }

    /// Waits until every queued preload has run. Returns `false` on timeout.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn wait_for_preload(&self, timeout: Duration) -> Result<bool> {
        self.inner.scheduler.wait_idle(timeout)
    }

    /// Scene tag and picture id of every queued unit, in queue order.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn pending_preloads(&self) -> Result<Vec<(Option<SceneKey>, Option<u32>)>> {
        self.inner.scheduler.snapshot()
    }

    /// Scheduler counters.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn preload_stats(&self) -> Result<PreloadStats> {
        self.inner.scheduler.stats()
    }

    // --- REGULAR ---

    /// Pins pictures of `scope`. Cached bitmaps are pinned immediately, the
    /// others when they are loaded for this scene.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn set_regular(&self, scope: Scope<'_>, ids: &[u32]) -> Result<RegularSetId> {
        Ok(self.inner.lock()?.pin(scope.regular_scope(), ids))
    }

    /// Drops the regular sets of `scope` and its nested scopes. Unreferenced
    /// bitmaps they pinned are freed. Returns the number of blocks freed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn clear_regular(&self, scope: RegularScope) -> Result<usize> {
        let mut state = self.inner.lock()?;
        let sets = state.regular.clear(&scope);
        let freed = state.pools.unpin(&sets);
        log::debug!(
            "cleared {} regular set(s) of {:?}, {freed} block(s) freed",
            sets.len(),
            scope.scene
        );
        Ok(freed)
    }

    // --- STATUS ---

    /// True when every picture below the scene (groups and region frames
    /// included) is cached.
    ///
    /// # Errors
    /// `InvalidFormat` on a corrupt catalog.
    pub fn is_scene_resident(&self, scene: &Scene) -> Result<bool> {
        let state = self.inner.lock()?;
        let set = state.files.get(scene.fileset)?;
        let mut pictures = Vec::new();
        collect_pictures(
            set.catalog(),
            (scene.child_count, scene.child_offset),
            0,
            &mut pictures,
        )?;
        Ok(pictures.iter().all(|&(id, ..)| {
            state
                .pools
                .bitmap
                .lookup(BlockKey {
                    source: scene.key.source,
                    id,
                })
                .is_some()
        }))
    }

    /// Number of decoder invocations so far.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn decodes(&self) -> Result<u64> {
        Ok(self.inner.lock()?.decodes)
    }

    /// Snapshot of pools, arenas, blocks, file sets and the scheduler.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn stats(&self) -> Result<CacheStats> {
        let state = self.inner.lock()?;
        let scheduler = &self.inner.scheduler;
        let mut scenes: Vec<SceneInfo> = state
            .scenes
            .iter()
            .map(|(key, s)| SceneInfo {
                id: key.id,
                refs: state.pools.scene.get(s.block).map_or(0, |b| b.refs()),
                held: s.held.len(),
            })
            .collect();
        scenes.sort_by_key(|s| s.id);
        Ok(CacheStats {
            pools: state.pools.pool_stats(),
            arenas: state.pools.arena_infos(),
            blocks: state.pools.block_infos(),
            slab: state.pools.slab_stats(),
            open_sets: state.files.infos(),
            scenes,
            preload: scheduler.stats()?,
            preload_pending: scheduler.pending()?,
            worker: scheduler.state()?,
            decodes: state.decodes,
            footprint: state.pools.footprint(),
            peak_memory: state.pools.peak_memory(),
        })
    }

    /// Logs [`Self::stats`] at info level.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn dump_stats(&self) -> Result<()> {
        let stats = self.stats()?;
        for line in stats.to_string().lines() {
            log::info!("{line}");
        }
        Ok(())
    }

    /// Cancels every queued preload, then frees every unpinned bitmap, every
    /// text and every arena left empty. Scenes stay loaded; handles to freed
    /// pictures and texts go stale. Returns the number of blocks freed.
    ///
    /// # Errors
    /// `Internal` on a poisoned lock.
    pub fn force_clear(&self) -> Result<usize> {
        self.inner.scheduler.cancel(CancelFilter::All)?;
        let mut guard = self.inner.lock()?;
        let state = &mut *guard;
        for scene in state.scenes.values_mut() {
            for block in scene.held.drain(..) {
                state.pools.release_bitmap(block);
            }
        }
        let freed = state.pools.clear_unpinned();
        log::info!("force clear freed {freed} block(s)");
        Ok(freed)
    }
}
