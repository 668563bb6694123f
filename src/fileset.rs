//! Resource file sets and the bounded cache of open sets.
//!
//! A file set is the trio of style, picture and text catalogs behind one style
//! path. Opening one parses the style catalog and the entry tables of every
//! picture partition, so sets are kept open and shared by reference count.
//! At most `max_open_sets` are open at a time; a new path takes an empty slot,
//! or else evicts the least recently used set nobody references.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{PictureIndex, StyleCatalog, TextIndex};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::hash::hash_path;
use crate::pool::id::SourceId;

/// The open catalogs of one style path.
#[derive(Debug)]
pub struct ResourceFileSet {
    source: SourceId,
    style_path: PathBuf,
    catalog: StyleCatalog,
    pictures: PictureIndex,
    texts: TextIndex,
}

impl ResourceFileSet {
    /// Opens the trio. Nothing stays open when one of the files fails.
    ///
    /// # Errors
    /// `NotFound` for a missing file, `InvalidFormat` for a corrupt header.
    pub fn open(style: &Path, picture: &Path, text: &Path, config: &CacheConfig) -> Result<Self> {
        let catalog = StyleCatalog::open(style, config.use_mmap)?;
        let pictures = PictureIndex::open(picture, config.max_partitions, config.use_mmap)?;
        let texts = TextIndex::open(text, config.use_mmap)?;
        Ok(Self {
            source: hash_path(style),
            style_path: style.to_path_buf(),
            catalog,
            pictures,
            texts,
        })
    }

    /// Identity used in pool keys.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Path the set was opened from.
    pub fn style_path(&self) -> &Path {
        &self.style_path
    }

    /// Parsed style catalog.
    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    /// Picture partitions.
    pub fn pictures(&self) -> &PictureIndex {
        &self.pictures
    }

    /// Text table.
    pub fn texts(&self) -> &TextIndex {
        &self.texts
    }

    /// Picture payload reads served so far.
    pub fn payload_reads(&self) -> u64 {
        self.pictures.payload_reads()
    }
}

/// Reference to an open file set. Goes stale once the slot is closed or
/// reused; stale handles are rejected rather than aliasing the new set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSetHandle {
    slot: usize,
    generation: u64,
    source: SourceId,
}

impl FileSetHandle {
    /// Identity of the set.
    pub fn source(&self) -> SourceId {
        self.source
    }
}

#[derive(Debug)]
struct Slot {
    set: Arc<ResourceFileSet>,
    refs: u32,
    last_used: u64,
    generation: u64,
}

/// One open set, for reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileSetInfo {
    /// Slot position.
    pub slot: usize,
    /// Style path.
    pub style_path: String,
    /// Reference count.
    pub refs: u32,
    /// Picture partitions found.
    pub partitions: usize,
    /// Payload reads served.
    pub payload_reads: u64,
}

/// Bounded set of open file sets.
#[derive(Debug)]
pub struct FileSetCache {
    slots: Vec<Option<Slot>>,
    tick: u64,
    generation: u64,
}

impl FileSetCache {
    /// Creates a cache with room for `bound` sets.
    pub fn new(bound: usize) -> Self {
        Self {
            slots: (0..bound).map(|_| None).collect(),
            tick: 0,
            generation: 0,
        }
    }

    /// Maximum number of open sets.
    pub fn bound(&self) -> usize {
        self.slots.len()
    }

    /// Opens the set behind `style`, or shares the one already open.
    ///
    /// # Errors
    /// `TooManyOpenSets` when every slot is taken by a referenced set, or any
    /// error from opening the files.
    pub fn open(
        &mut self,
        style: &Path,
        picture: &Path,
        text: &Path,
        config: &CacheConfig,
    ) -> Result<FileSetHandle> {
        self.tick += 1;
        let source = hash_path(style);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(s) = slot
                && s.set.source == source
            {
                s.refs += 1;
                s.last_used = self.tick;
                log::debug!("file set {} shared, refs {}", style.display(), s.refs);
                return Ok(FileSetHandle {
                    slot: index,
                    generation: s.generation,
                    source,
                });
            }
        }

        let index = self.free_slot()?;
        let set = Arc::new(ResourceFileSet::open(style, picture, text, config)?);
        if let Some(old) = self.slots.get_mut(index).and_then(Option::take) {
            log::info!("evicting file set {}", old.set.style_path.display());
        }
        self.generation += 1;
        let generation = self.generation;
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(Slot {
                set,
                refs: 1,
                last_used: self.tick,
                generation,
            });
        }
        log::info!("opened file set {} in slot {index}", style.display());
        Ok(FileSetHandle {
            slot: index,
            generation,
            source,
        })
    }

    /// An empty slot, else the least recently used unreferenced one.
    fn free_slot(&self) -> Result<usize> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return Ok(index);
        }
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.refs == 0).map(|s| (i, s.last_used)))
            .min_by_key(|&(_, used)| used)
            .map(|(i, _)| i)
            .ok_or(CacheError::TooManyOpenSets(self.slots.len()))
    }

    fn slot(&self, handle: FileSetHandle) -> Result<&Slot> {
        self.slots
            .get(handle.slot)
            .and_then(Option::as_ref)
            .filter(|s| s.generation == handle.generation)
            .ok_or_else(|| CacheError::Internal(format!("stale file set handle {handle:?}")))
    }

    /// The set behind `handle`.
    ///
    /// # Errors
    /// `Internal` for a stale handle.
    pub fn get(&self, handle: FileSetHandle) -> Result<Arc<ResourceFileSet>> {
        self.slot(handle).map(|s| Arc::clone(&s.set))
    }

    /// Drops one reference. With `force` and no references left the slot is
    /// closed. Returns whether the set was closed.
    ///
    /// # Errors
    /// `Internal` for a stale handle.
    pub fn close(&mut self, handle: FileSetHandle, force: bool) -> Result<bool> {
        self.slot(handle)?;
        let Some(entry) = self.slots.get_mut(handle.slot) else {
            return Ok(false);
        };
        let refs = match entry {
            Some(s) => {
                s.refs = s.refs.saturating_sub(1);
                s.refs
            }
            None => return Ok(false),
        };
        if force && refs == 0 {
            if let Some(s) = entry.take() {
                log::info!("closed file set {}", s.set.style_path.display());
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Number of open sets.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Reference count of `handle`.
    ///
    /// # Errors
    /// `Internal` for a stale handle.
    pub fn refs(&self, handle: FileSetHandle) -> Result<u32> {
        self.slot(handle).map(|s| s.refs)
    }

    /// Report rows for every open set.
    pub fn infos(&self) -> Vec<FileSetInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref().map(|s| FileSetInfo {
                    slot: i,
                    style_path: s.set.style_path.display().to_string(),
                    refs: s.refs,
                    partitions: s.set.pictures.partition_count(),
                    payload_reads: s.set.payload_reads(),
                })
            })
            .collect()
    }
}
