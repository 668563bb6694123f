//! Defines the physical binary layout of the three catalog files.
//!
//! All integers are little-endian.
//!
//! ## Style file
//! `[StyleHeader] [SceneRecord * scene_count] [descriptor bytes ...]`
//!
//! Descriptors are not stored as an array. Each one starts with a
//! [`DescriptorHeader`] whose `next` field holds the absolute offset of its next
//! sibling (0 ends the chain); containers point at their first child through
//! `child_offset`.
//!
//! ## Picture file (one per partition)
//! `[PictureFileHeader] [PictureEntry * entry_count] [payloads ...]`
//!
//! Each payload starts with 4 metric bytes (`width u16`, `height u16`) followed
//! by `compressed_len` bytes of pixel data.
//!
//! ## Text file
//! `[TextFileHeader] [TextEntry * entry_count] [payloads ...]`

use crate::error::{CacheError, Result};

/// Size of the style file header.
pub const STYLE_HEADER_SIZE: usize = 8;
/// Size of a fixed scene record.
pub const SCENE_RECORD_SIZE: usize = 28;
/// Size of the header shared by every descriptor.
pub const DESCRIPTOR_HEADER_SIZE: usize = 12;

/// Magic bytes identifying a picture partition: "RPIC".
pub const PICTURE_MAGIC: [u8; 4] = *b"RPIC";
/// Supported picture file version.
pub const PICTURE_VERSION: u16 = 1;
/// magic(4) + count(4) + width_format(2) + depth(1) + flags(1) + version(2) + reserved(2)
/// + id_start(4) + charset(4)
pub const PICTURE_HEADER_SIZE: usize = 24;
/// offset(4) + length(4) + type(1) + name(8) + len_ext(1) + reserved(2)
pub const PICTURE_ENTRY_SIZE: usize = 20;
/// Per-bitmap metrics preceding the pixel payload.
pub const PICTURE_METRICS_SIZE: usize = 4;

/// Magic bytes identifying a text file: "RTXT".
pub const TEXT_MAGIC: [u8; 4] = *b"RTXT";
/// Supported text file version (UTF-8 payloads).
pub const TEXT_VERSION: u16 = 2;
/// magic(4) + count(4) + version(2) + encoding(2) + id_start(4)
pub const TEXT_HEADER_SIZE: usize = 16;
/// offset(4) + length(4)
pub const TEXT_ENTRY_SIZE: usize = 8;

/// Descriptor flag: the picture is pinned ("regular") by the catalog itself.
pub const FLAG_REGULAR: u8 = 0b0000_0001;

pub(crate) fn le_u8(buf: &[u8], at: usize) -> Result<u8> {
    buf.get(at)
        .copied()
        .ok_or_else(|| truncated(at, 1, buf.len()))
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> Result<u16> {
    buf.get(at..at + 2)
        .and_then(|s| s.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or_else(|| truncated(at, 2, buf.len()))
}

pub(crate) fn le_i16(buf: &[u8], at: usize) -> Result<i16> {
    le_u16(buf, at).map(|v| v as i16)
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| truncated(at, 4, buf.len()))
}

fn truncated(at: usize, width: usize, len: usize) -> CacheError {
    CacheError::InvalidFormat(format!(
        "field at {at} (+{width}) runs past the end of a {len}-byte table"
    ))
}

/// Pixel encodings a picture entry can carry. The discriminant is the `type`
/// byte of the entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(u8)]
pub enum PixelFormat {
    /// Uncompressed 16-bit RGB565.
    Rgb565 = 0,
    /// Uncompressed 32-bit ARGB8888.
    Argb8888 = 1,
    /// Uncompressed 24-bit ARGB8565 (8-bit alpha + RGB565).
    Argb8565 = 2,
    /// LZ4 block holding RGB565 pixels.
    Lz4Rgb565 = 3,
    /// LZ4 block holding ARGB8888 pixels.
    Lz4Argb8888 = 4,
    /// 16-entry palette plus run-length encoded 4-bit indices.
    Index4 = 5,
    /// 256-entry palette plus run-length encoded 8-bit indices.
    Index8 = 6,
    /// Baseline JPEG, decoded to RGB565.
    Jpeg = 7,
}

impl PixelFormat {
    /// Decodes the entry `type` byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Rgb565,
            1 => Self::Argb8888,
            2 => Self::Argb8565,
            3 => Self::Lz4Rgb565,
            4 => Self::Lz4Argb8888,
            5 => Self::Index4,
            6 => Self::Index8,
            7 => Self::Jpeg,
            other => {
                return Err(CacheError::InvalidFormat(format!(
                    "unknown pixel format tag {other}"
                )));
            }
        })
    }

    /// The entry `type` byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Bytes per decoded pixel. Indexed formats report one byte per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 | Self::Lz4Rgb565 | Self::Jpeg => 2,
            Self::Argb8888 | Self::Lz4Argb8888 => 4,
            Self::Argb8565 => 3,
            Self::Index4 | Self::Index8 => 1,
        }
    }

    /// Palette bytes prepended to the indices of an indexed format.
    pub fn palette_size(self) -> usize {
        match self {
            Self::Index4 => 16 * 4,
            Self::Index8 => 256 * 4,
            _ => 0,
        }
    }

    /// Size of the decoded payload for a `width` x `height` bitmap.
    pub fn decoded_size(self, width: u16, height: u16) -> usize {
        let (w, h) = (usize::from(width), usize::from(height));
        match self {
            Self::Index4 => self.palette_size() + w.div_ceil(2) * h,
            Self::Index8 => self.palette_size() + w * h,
            _ => w * h * self.bytes_per_pixel(),
        }
    }

    /// True for formats whose stored bytes already are the decoded payload.
    pub fn is_raw(self) -> bool {
        matches!(self, Self::Rgb565 | Self::Argb8888 | Self::Argb8565)
    }
}

/// Header of the style file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleHeader {
    /// Number of fixed scene records following the header.
    pub scene_count: u32,
    /// Reserved, written as zero.
    pub reserved: u32,
}

impl StyleHeader {
    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; STYLE_HEADER_SIZE] {
        let mut buf = [0u8; STYLE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.scene_count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.reserved.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            scene_count: le_u32(bytes, 0)?,
            reserved: le_u32(bytes, 4)?,
        })
    }
}

/// One fixed-size scene record of the style file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneRecord {
    /// Hashed scene id.
    pub id: u32,
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Background color (ARGB8888).
    pub background: u32,
    /// Opacity, 255 is opaque.
    pub opacity: u8,
    /// Number of direct children.
    pub child_count: u32,
    /// Absolute offset of the first child descriptor, 0 when empty.
    pub child_offset: u32,
}

impl SceneRecord {
    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; SCENE_RECORD_SIZE] {
        let mut buf = [0u8; SCENE_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.x.to_le_bytes());
        buf[6..8].copy_from_slice(&self.y.to_le_bytes());
        buf[8..10].copy_from_slice(&self.width.to_le_bytes());
        buf[10..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.background.to_le_bytes());
        buf[16] = self.opacity;
        buf[20..24].copy_from_slice(&self.child_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.child_offset.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            id: le_u32(bytes, 0)?,
            x: le_i16(bytes, 4)?,
            y: le_i16(bytes, 6)?,
            width: le_u16(bytes, 8)?,
            height: le_u16(bytes, 10)?,
            background: le_u32(bytes, 12)?,
            opacity: le_u8(bytes, 16)?,
            child_count: le_u32(bytes, 20)?,
            child_offset: le_u32(bytes, 24)?,
        })
    }
}

/// Kind byte of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// First-level container.
    Group,
    /// Second-level container.
    Subgroup,
    /// Single bitmap.
    Picture,
    /// Text string.
    Text,
    /// Run of same-sized picture frames.
    PictureRegion,
    /// Written by a newer packer; skipped by `body_len`.
    Unknown(u8),
}

impl DescriptorKind {
    /// Decodes the kind byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Group,
            2 => Self::Subgroup,
            3 => Self::Picture,
            4 => Self::Text,
            5 => Self::PictureRegion,
            other => Self::Unknown(other),
        }
    }

    /// The raw kind byte.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Group => 1,
            Self::Subgroup => 2,
            Self::Picture => 3,
            Self::Text => 4,
            Self::PictureRegion => 5,
            Self::Unknown(other) => other,
        }
    }

    /// Size of the body that follows the header for this kind.
    pub fn body_size(self) -> usize {
        match self {
            Self::Group | Self::Subgroup => ContainerBody::SIZE,
            Self::Picture => PictureBody::SIZE,
            Self::Text => TextBody::SIZE,
            Self::PictureRegion => RegionBody::SIZE,
            Self::Unknown(_) => 0,
        }
    }
}

/// Header shared by every descriptor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    /// What follows.
    pub kind: DescriptorKind,
    /// Kind-specific flags ([`FLAG_REGULAR`]).
    pub flags: u8,
    /// Length of the body after this header.
    pub body_len: u16,
    /// Resource id.
    pub id: u32,
    /// Absolute offset of the next sibling, 0 ends the chain.
    pub next: u32,
}

impl DescriptorHeader {
    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_HEADER_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_HEADER_SIZE];
        buf[0] = self.kind.as_u8();
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.body_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            kind: DescriptorKind::from_byte(le_u8(bytes, 0)?),
            flags: le_u8(bytes, 1)?,
            body_len: le_u16(bytes, 2)?,
            id: le_u32(bytes, 4)?,
            next: le_u32(bytes, 8)?,
        })
    }
}

/// Body of a group or subgroup descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerBody {
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Number of direct children.
    pub child_count: u32,
    /// Absolute offset of the first child, 0 when empty.
    pub child_offset: u32,
}

impl ContainerBody {
    /// Encoded size.
    pub const SIZE: usize = 16;

    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf[4..6].copy_from_slice(&self.width.to_le_bytes());
        buf[6..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..12].copy_from_slice(&self.child_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.child_offset.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            x: le_i16(bytes, 0)?,
            y: le_i16(bytes, 2)?,
            width: le_u16(bytes, 4)?,
            height: le_u16(bytes, 6)?,
            child_count: le_u32(bytes, 8)?,
            child_offset: le_u32(bytes, 12)?,
        })
    }
}

/// Body of a picture descriptor. Dimensions live in the picture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureBody {
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
}

impl PictureBody {
    /// Encoded size.
    pub const SIZE: usize = 4;

    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            x: le_i16(bytes, 0)?,
            y: le_i16(bytes, 2)?,
        })
    }
}

/// Body of a text descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBody {
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Foreground color (ARGB8888).
    pub color: u32,
    /// Background color (ARGB8888).
    pub background: u32,
    /// Alignment code.
    pub align: u8,
}

impl TextBody {
    /// Encoded size.
    pub const SIZE: usize = 20;

    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf[4..6].copy_from_slice(&self.width.to_le_bytes());
        buf[6..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..12].copy_from_slice(&self.color.to_le_bytes());
        buf[12..16].copy_from_slice(&self.background.to_le_bytes());
        buf[16] = self.align;
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            x: le_i16(bytes, 0)?,
            y: le_i16(bytes, 2)?,
            width: le_u16(bytes, 4)?,
            height: le_u16(bytes, 6)?,
            color: le_u32(bytes, 8)?,
            background: le_u32(bytes, 12)?,
            align: le_u8(bytes, 16)?,
        })
    }
}

/// Body of a picture-region descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBody {
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Number of frames; frame `i` is picture id `descriptor.id + i`.
    pub frame_count: u32,
}

impl RegionBody {
    /// Encoded size.
    pub const SIZE: usize = 12;

    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.x.to_le_bytes());
        buf[2..4].copy_from_slice(&self.y.to_le_bytes());
        buf[4..6].copy_from_slice(&self.width.to_le_bytes());
        buf[6..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..12].copy_from_slice(&self.frame_count.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            x: le_i16(bytes, 0)?,
            y: le_i16(bytes, 2)?,
            width: le_u16(bytes, 4)?,
            height: le_u16(bytes, 6)?,
            frame_count: le_u32(bytes, 8)?,
        })
    }
}

/// Header of one picture partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureFileHeader {
    /// Number of entries in the table.
    pub entry_count: u32,
    /// Packer hint for glyph tables; carried through untouched.
    pub width_format: u16,
    /// Bit depth the packer targeted.
    pub bit_depth: u8,
    /// Packer flags.
    pub flags: u8,
    /// Must equal [`PICTURE_VERSION`].
    pub version: u16,
    /// Id of entry 0.
    pub id_start: u32,
    /// Extended charset marker; carried through untouched.
    pub charset_extend: u32,
}

impl PictureFileHeader {
    /// Serializes the header, magic included.
    pub fn to_bytes(&self) -> [u8; PICTURE_HEADER_SIZE] {
        let mut buf = [0u8; PICTURE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PICTURE_MAGIC);
        buf[4..8].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[8..10].copy_from_slice(&self.width_format.to_le_bytes());
        buf[10] = self.bit_depth;
        buf[11] = self.flags;
        buf[12..14].copy_from_slice(&self.version.to_le_bytes());
        buf[16..20].copy_from_slice(&self.id_start.to_le_bytes());
        buf[20..24].copy_from_slice(&self.charset_extend.to_le_bytes());
        buf
    }

    /// Deserializes and validates magic and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.get(0..4) != Some(&PICTURE_MAGIC[..]) {
            return Err(CacheError::InvalidFormat(
                "picture file: invalid magic bytes".into(),
            ));
        }
        let version = le_u16(bytes, 12)?;
        if version != PICTURE_VERSION {
            return Err(CacheError::InvalidFormat(format!(
                "picture file: unsupported version {version}"
            )));
        }
        Ok(Self {
            entry_count: le_u32(bytes, 4)?,
            width_format: le_u16(bytes, 8)?,
            bit_depth: le_u8(bytes, 10)?,
            flags: le_u8(bytes, 11)?,
            version,
            id_start: le_u32(bytes, 16)?,
            charset_extend: le_u32(bytes, 20)?,
        })
    }
}

/// One entry of a picture partition's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureEntry {
    /// Absolute offset of the metrics + payload.
    pub offset: u32,
    /// Low 32 bits of the payload length (metrics excluded).
    pub length: u32,
    /// Pixel format tag.
    pub kind: u8,
    /// Short asset name, NUL padded.
    pub name: [u8; 8],
    /// High bits of the payload length.
    pub len_ext: u8,
}

impl PictureEntry {
    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; PICTURE_ENTRY_SIZE] {
        let mut buf = [0u8; PICTURE_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8] = self.kind;
        buf[9..17].copy_from_slice(&self.name);
        buf[17] = self.len_ext;
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let name = bytes
            .get(9..17)
            .and_then(|s| <[u8; 8]>::try_from(s).ok())
            .ok_or_else(|| truncated(9, 8, bytes.len()))?;
        Ok(Self {
            offset: le_u32(bytes, 0)?,
            length: le_u32(bytes, 4)?,
            kind: le_u8(bytes, 8)?,
            name,
            len_ext: le_u8(bytes, 17)?,
        })
    }

    /// Full compressed payload length.
    pub fn compressed_len(&self) -> u64 {
        u64::from(self.length) | (u64::from(self.len_ext) << 32)
    }

    /// A zero-length entry marks an asset stored in another partition.
    pub fn is_placeholder(&self) -> bool {
        self.compressed_len() == 0
    }

    /// The name with NUL padding stripped.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

/// Header of the text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFileHeader {
    /// Number of entries in the table.
    pub entry_count: u32,
    /// Must equal [`TEXT_VERSION`].
    pub version: u16,
    /// Encoding code; 0 is UTF-8.
    pub encoding: u16,
    /// Id of entry 0.
    pub id_start: u32,
}

impl TextFileHeader {
    /// Serializes the header, magic included.
    pub fn to_bytes(&self) -> [u8; TEXT_HEADER_SIZE] {
        let mut buf = [0u8; TEXT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&TEXT_MAGIC);
        buf[4..8].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.encoding.to_le_bytes());
        buf[12..16].copy_from_slice(&self.id_start.to_le_bytes());
        buf
    }

    /// Deserializes and validates magic and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.get(0..4) != Some(&TEXT_MAGIC[..]) {
            return Err(CacheError::InvalidFormat(
                "text file: invalid magic bytes".into(),
            ));
        }
        let version = le_u16(bytes, 8)?;
        if version != TEXT_VERSION {
            return Err(CacheError::InvalidFormat(format!(
                "text file: unsupported version {version}"
            )));
        }
        Ok(Self {
            entry_count: le_u32(bytes, 4)?,
            version,
            encoding: le_u16(bytes, 10)?,
            id_start: le_u32(bytes, 12)?,
        })
    }
}

/// One entry of the text table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEntry {
    /// Absolute offset of the payload.
    pub offset: u32,
    /// Payload length in bytes.
    pub length: u32,
}

impl TextEntry {
    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; TEXT_ENTRY_SIZE] {
        let mut buf = [0u8; TEXT_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Deserializes from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            offset: le_u32(bytes, 0)?,
            length: le_u32(bytes, 4)?,
        })
    }
}
