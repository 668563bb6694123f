//! The logical resource graph handed out to callers.
//!
//! Scene -> Group -> Subgroup -> {Picture, PictureRegion, Text}. These are
//! plain handles: they carry the geometry read from the catalog plus the pool
//! block that backs them, and they are given back to the
//! [`CacheContext`](crate::CacheContext) to release. Handles that own a pool
//! reference are deliberately not `Clone`.

use std::fmt;

use serde::Serialize;

use crate::catalog::PictureLocation;
use crate::fileset::FileSetHandle;
use crate::format::PixelFormat;
use crate::pool::id::{BlockId, SourceId};
use crate::regular::RegularScope;

/// Identity of a scene: the file set it comes from and its hashed id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SceneKey {
    /// File set the scene was read from.
    pub source: SourceId,
    /// Scene id from the scene table.
    pub id: u32,
}

impl fmt::Debug for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scene({:#x}@{:016x})", self.id, self.source.0)
    }
}

/// Position and size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rect {
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

/// A loaded scene. Holds one reference on its scene-pool record.
#[derive(Debug)]
pub struct Scene {
    pub(crate) key: SceneKey,
    pub(crate) fileset: FileSetHandle,
    pub(crate) block: BlockId,
    /// Geometry.
    pub rect: Rect,
    /// Background color (ARGB).
    pub background: u32,
    /// Opacity, 0 transparent to 255 opaque.
    pub opacity: u8,
    pub(crate) child_count: u32,
    pub(crate) child_offset: u32,
}

impl Scene {
    /// Scene identity.
    pub fn key(&self) -> SceneKey {
        self.key
    }

    /// Scene id.
    pub fn id(&self) -> u32 {
        self.key.id
    }

    /// File set the scene belongs to.
    pub fn fileset(&self) -> FileSetHandle {
        self.fileset
    }

    /// Number of direct children in the catalog.
    pub fn child_count(&self) -> u32 {
        self.child_count
    }
}

/// Nesting level of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum GroupLevel {
    /// Direct child of a scene.
    Group,
    /// Child of a group.
    Subgroup,
}

/// A group or subgroup. Materialized on demand, never cached.
#[derive(Debug, Clone)]
pub struct Group {
    pub(crate) scene: SceneKey,
    pub(crate) fileset: FileSetHandle,
    /// Group id.
    pub id: u32,
    /// Group or subgroup.
    pub level: GroupLevel,
    /// Geometry relative to the parent.
    pub rect: Rect,
    pub(crate) parent: Option<u32>,
    pub(crate) child_count: u32,
    pub(crate) child_offset: u32,
}

impl Group {
    /// Owning scene.
    pub fn scene(&self) -> SceneKey {
        self.scene
    }

    /// Number of direct children in the catalog.
    pub fn child_count(&self) -> u32 {
        self.child_count
    }
}

/// Where picture and text lookups start.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Children of a scene.
    Scene(&'a Scene),
    /// Children of a group or subgroup.
    Group(&'a Group),
}

impl Scope<'_> {
    /// Scene the scope belongs to.
    pub fn scene_key(&self) -> SceneKey {
        match self {
            Scope::Scene(s) => s.key,
            Scope::Group(g) => g.scene,
        }
    }

    pub(crate) fn fileset(&self) -> FileSetHandle {
        match self {
            Scope::Scene(s) => s.fileset,
            Scope::Group(g) => g.fileset,
        }
    }

    /// `(count, first offset)` of the scope's child chain.
    pub(crate) fn children(&self) -> (u32, u32) {
        match self {
            Scope::Scene(s) => (s.child_count, s.child_offset),
            Scope::Group(g) => (g.child_count, g.child_offset),
        }
    }

    /// The regular-set scope this lookup scope maps to.
    pub fn regular_scope(&self) -> RegularScope {
        match self {
            Scope::Scene(s) => RegularScope::scene(s.key),
            Scope::Group(g) => match (g.level, g.parent) {
                (GroupLevel::Subgroup, Some(parent)) => RegularScope {
                    scene: g.scene,
                    group: Some(parent),
                    subgroup: Some(g.id),
                },
                _ => RegularScope {
                    scene: g.scene,
                    group: Some(g.id),
                    subgroup: None,
                },
            },
        }
    }
}

/// Everything needed to materialize a picture, resolved from the catalog.
/// Travels inside preload units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureDesc {
    /// Picture id.
    pub id: u32,
    /// Position from the descriptor.
    pub x: i16,
    /// Position from the descriptor.
    pub y: i16,
    /// Pinned by the catalog flag.
    pub pinned: bool,
    pub(crate) fileset: FileSetHandle,
    pub(crate) location: PictureLocation,
}

impl PictureDesc {
    /// Width from the picture metrics.
    pub fn width(&self) -> u16 {
        self.location.width
    }

    /// Height from the picture metrics.
    pub fn height(&self) -> u16 {
        self.location.height
    }

    /// Stored encoding.
    pub fn format(&self) -> PixelFormat {
        self.location.format
    }

    /// Size of the decoded payload.
    pub fn decoded_size(&self) -> usize {
        self.location.decoded_size()
    }
}

/// A picture holding one reference on its bitmap block.
#[derive(Debug)]
pub struct Picture {
    pub(crate) desc: PictureDesc,
    pub(crate) block: BlockId,
}

impl Picture {
    /// Picture id.
    pub fn id(&self) -> u32 {
        self.desc.id
    }

    /// Horizontal position.
    pub fn x(&self) -> i16 {
        self.desc.x
    }

    /// Vertical position.
    pub fn y(&self) -> i16 {
        self.desc.y
    }

    /// Width in pixels.
    pub fn width(&self) -> u16 {
        self.desc.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u16 {
        self.desc.height()
    }

    /// Bytes per decoded pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        self.desc.format().bytes_per_pixel()
    }

    /// Stored encoding.
    pub fn format(&self) -> PixelFormat {
        self.desc.format()
    }

    /// Stored payload length.
    pub fn compressed_size(&self) -> usize {
        self.desc.location.compressed_size
    }

    /// Pinned by the catalog flag.
    pub fn is_regular(&self) -> bool {
        self.desc.pinned
    }

    /// Bitmap block backing this picture.
    pub fn block(&self) -> BlockId {
        self.block
    }
}

/// A run of same-sized frames with ids `first_id .. first_id + frame_count`.
#[derive(Debug, Clone)]
pub struct PictureRegion {
    pub(crate) scene: SceneKey,
    pub(crate) fileset: FileSetHandle,
    /// Id of frame 0.
    pub first_id: u32,
    /// Number of frames.
    pub frame_count: u32,
    /// Shared geometry.
    pub rect: Rect,
}

impl PictureRegion {
    /// Picture id of frame `index`.
    pub fn frame_id(&self, index: u32) -> Option<u32> {
        self.first_id
            .checked_add(index)
            .filter(|_| index < self.frame_count)
    }

    /// All frame ids in order.
    pub fn frame_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.frame_count).map_while(|i| self.first_id.checked_add(i))
    }

    /// Owning scene.
    pub fn scene(&self) -> SceneKey {
        self.scene
    }
}

/// A string holding one reference on its text block.
#[derive(Debug)]
pub struct Text {
    /// Text id.
    pub id: u32,
    /// Geometry.
    pub rect: Rect,
    /// Foreground color.
    pub color: u32,
    /// Background color.
    pub background: u32,
    /// Alignment code.
    pub align: u8,
    pub(crate) block: BlockId,
}

impl Text {
    /// Text block backing this string.
    pub fn block(&self) -> BlockId {
        self.block
    }
}
