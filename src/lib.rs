//! # rescache
//!
//! Resource cache and buffer-allocation engine for an embedded GUI simulator.
//!
//! ## Overview
//!
//! A UI is described by three catalogs per resource set: a style file holding
//! the scene tree, a picture file (optionally split into lettered partitions)
//! and a text file. The render loop asks the cache for scenes, groups,
//! pictures and strings by id; the cache reads and decodes each resource once,
//! keeps it in a byte-budgeted pool and hands out reference-counted handles.
//!
//! ### Key Features
//!
//! *   **Shared decoded resources:** a live `(file set, id)` pair exists at most
//!     once per pool. Loading it again only bumps its reference count.
//! *   **Compact packing:** bitmaps preloaded for a scene can be packed into a
//!     few per-scene arenas that are released together with the scene.
//! *   **Full-screen slab:** screen-sized 16-bit bitmaps reuse a fixed set of
//!     pre-sized slots.
//! *   **Regular pictures:** pinned id-sets survive scene unloads until their
//!     scope is cleared.
//! *   **Background preload:** a single worker thread drains a FIFO of preload
//!     units; batches can be cancelled per scene.
//! *   **Zero-copy raw bitmaps:** raw payloads are served straight out of the
//!     memory-mapped catalog.
//!
//! ## Architecture
//!
//! ```text
//! CacheContext ── FileSetCache ── ResourceFileSet { StyleCatalog, PictureIndex, TextIndex }
//!      │
//!      ├── Pools { bitmap, text, scene, CompactPacker, ScreenSlab }
//!      ├── RegularRegistry
//!      └── PreloadScheduler ── worker thread ── (weak) CacheContext
//! ```
//!
//! Every entry point takes one cache mutex; the preload queue has its own.
//! Decoding happens under the cache mutex, straight into the block the pool
//! allocated.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rescache::{CacheConfig, CacheContext, Scope};
//!
//! let cache = CacheContext::new(CacheConfig::default())?;
//! let set = cache.open("ui.sty", "ui.pic", "ui.txt")?;
//! let scene = cache.load_scene(set, 0xA1)?;
//! let logo = cache.load_picture(Scope::Scene(&scene), 7)?;
//! cache.with_picture_data(&logo, |pixels| blit(pixels))?;
//! cache.unload_picture(logo)?;
//! cache.unload_scene(scene)?;
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` call maps catalog files in
//!   the `catalog` module.
//! * **No Panics:** no `unwrap()` or `panic!()` in the library (enforced by
//!   clippy lints).
//! * **One error type:** every failure is a [`CacheError`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod inspector;
pub mod loader;
pub mod model;
pub mod preload;
pub mod regular;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod catalog;
#[doc(hidden)]
pub mod fileset;
#[doc(hidden)]
pub mod hash;
#[doc(hidden)]
pub mod io;
#[doc(hidden)]
pub mod pool;

// --- RE-EXPORTS ---

pub use cache::{CacheContext, PreloadMode, PreloadOptions};
pub use config::CacheConfig;
pub use decode::{Decoder, DecoderRegistry};
pub use error::{CacheError, Result};
pub use fileset::FileSetHandle;
pub use format::PixelFormat;
pub use hash::hash_name;
pub use inspector::CacheStats;
pub use io::{Parent, PictureWriter, StyleWriter, TextWriter};
pub use loader::{CatalogLoader, ResourceLoader};
pub use model::{
    Group, GroupLevel, Picture, PictureDesc, PictureRegion, Rect, Scene, SceneKey, Scope, Text,
};
pub use pool::id::SourceId;
pub use preload::{CancelFilter, PreloadStatus, PreloadUnit, StatusCallback};
pub use regular::{RegularScope, RegularSetId};
