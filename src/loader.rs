//! Name-based resource loading on top of [`CacheContext`].
//!
//! A [`ResourceLoader`] hands out opaque handles per caller context and
//! resolves resource names to owned bytes. [`CatalogLoader`] is the
//! implementation backed by the cache: the context string is hashed into the
//! handle, the style path selects the file set, and names look like
//! `picture:7`, `text:3` or `scene:0xA1` (`scene:main` hashes the name).
//! Bytes stored with `put` shadow the catalog for that handle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cache::CacheContext;
use crate::error::{CacheError, Result};
use crate::fileset::FileSetHandle;
use crate::format::SceneRecord;
use crate::hash::hash_name;

/// Loads named resources for a caller context.
pub trait ResourceLoader {
    /// Opaque per-context handle.
    type Handle: Copy;

    /// Opens the resources at `path` for context `ctx`.
    fn load(&mut self, path: &Path, ctx: &str) -> Result<Self::Handle>;

    /// Bytes of resource `name`.
    fn get(&self, handle: Self::Handle, name: &str) -> Result<Vec<u8>>;

    /// Stores `data` under `name`, shadowing the catalog.
    fn put(&mut self, handle: Self::Handle, name: &str, data: Vec<u8>) -> Result<()>;

    /// Releases the context.
    fn unload(&mut self, handle: Self::Handle) -> Result<()>;

    /// Releases every context.
    fn clear(&mut self) -> Result<()>;
}

/// Handle of a [`CatalogLoader`] context: the hash of the context string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u32);

/// A parsed resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceName {
    /// `picture:<id>`: decoded bitmap bytes.
    Picture(u32),
    /// `text:<id>`: string bytes without the terminator.
    Text(u32),
    /// `scene:<id or name>`: the 28-byte scene record.
    Scene(u32),
}

fn parse_id(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

impl ResourceName {
    /// Parses `kind:id`.
    ///
    /// # Errors
    /// `NotFound` for an unknown kind or a malformed id.
    pub fn parse(name: &str) -> Result<Self> {
        let bad = || CacheError::NotFound(format!("resource name {name:?}"));
        let (kind, raw) = name.split_once(':').ok_or_else(bad)?;
        match kind {
            "picture" => parse_id(raw).map(Self::Picture).ok_or_else(bad),
            "text" => parse_id(raw).map(Self::Text).ok_or_else(bad),
            "scene" if !raw.is_empty() => {
                Ok(Self::Scene(parse_id(raw).unwrap_or_else(|| hash_name(raw))))
            }
            _ => Err(bad()),
        }
    }
}

#[derive(Debug)]
struct LoaderEntry {
    style: PathBuf,
    fileset: FileSetHandle,
    overrides: HashMap<String, Vec<u8>>,
}

/// Picture and text paths derived from a style path: `<stem>.pic` and
/// `<stem>.txt` beside it.
pub fn sibling_paths(style: &Path) -> (PathBuf, PathBuf) {
    (style.with_extension("pic"), style.with_extension("txt"))
}

/// [`ResourceLoader`] backed by a [`CacheContext`].
#[derive(Debug)]
pub struct CatalogLoader<'a> {
    cache: &'a CacheContext,
    entries: HashMap<u32, LoaderEntry>,
}

impl<'a> CatalogLoader<'a> {
    /// Creates a loader without contexts.
    pub fn new(cache: &'a CacheContext) -> Self {
        Self {
            cache,
            entries: HashMap::new(),
        }
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True without live contexts.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, handle: ContextHandle) -> Result<&LoaderEntry> {
        self.entries
            .get(&handle.0)
            .ok_or_else(|| CacheError::Internal(format!("unknown loader context {:#x}", handle.0)))
    }

    fn fetch(&self, fileset: FileSetHandle, name: ResourceName) -> Result<Vec<u8>> {
        match name {
            ResourceName::Picture(id) => {
                let picture = self.cache.load_picture_by_id(fileset, id)?;
                let bytes = self.cache.with_picture_data(&picture, <[u8]>::to_vec);
                self.cache.unload_picture(picture)?;
                bytes
            }
            ResourceName::Text(id) => {
                let text = self.cache.load_text_by_id(fileset, id)?;
                let string = self.cache.text_string(&text);
                self.cache.unload_text(text)?;
                string.map(String::into_bytes)
            }
            ResourceName::Scene(id) => {
                let scene = self.cache.load_scene(fileset, id)?;
                let record = SceneRecord {
                    id: scene.id(),
                    x: scene.rect.x,
                    y: scene.rect.y,
                    width: scene.rect.width,
                    height: scene.rect.height,
                    background: scene.background,
                    opacity: scene.opacity,
                    child_count: scene.child_count,
                    child_offset: scene.child_offset,
                };
                self.cache.unload_scene(scene)?;
                Ok(record.to_bytes().to_vec())
            }
        }
    }
}

impl ResourceLoader for CatalogLoader<'_> {
    type Handle = ContextHandle;

    fn load(&mut self, path: &Path, ctx: &str) -> Result<ContextHandle> {
        let key = hash_name(ctx);
        if let Some(entry) = self.entries.get(&key) {
            if entry.style == path {
                return Ok(ContextHandle(key));
            }
            log::debug!("loader context {ctx:?} switches to {}", path.display());
            self.unload(ContextHandle(key))?;
        }
        let (picture, text) = sibling_paths(path);
        let fileset = self.cache.open(path, picture.as_path(), text.as_path())?;
        self.entries.insert(
            key,
            LoaderEntry {
                style: path.to_path_buf(),
                fileset,
                overrides: HashMap::new(),
            },
        );
        Ok(ContextHandle(key))
    }

    fn get(&self, handle: ContextHandle, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(handle)?;
        if let Some(data) = entry.overrides.get(name) {
            return Ok(data.clone());
        }
        self.fetch(entry.fileset, ResourceName::parse(name)?)
    }

    fn put(&mut self, handle: ContextHandle, name: &str, data: Vec<u8>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&handle.0)
            .ok_or_else(|| {
                CacheError::Internal(format!("unknown loader context {:#x}", handle.0))
            })?;
        entry.overrides.insert(name.to_owned(), data);
        Ok(())
    }

    fn unload(&mut self, handle: ContextHandle) -> Result<()> {
        match self.entries.remove(&handle.0) {
            Some(entry) => {
                self.cache.close(entry.fileset, false)?;
                Ok(())
            }
            None => Err(CacheError::Internal(format!(
                "unknown loader context {:#x}",
                handle.0
            ))),
        }
    }

    fn clear(&mut self) -> Result<()> {
        for (_, entry) in self.entries.drain() {
            self.cache.close(entry.fileset, false)?;
        }
        Ok(())
    }
}
