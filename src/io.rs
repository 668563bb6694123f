//! Catalog writers.
//!
//! The cache itself only reads catalogs; these writers produce them for the
//! offline packer, for fixtures and for benchmarks. Every writer lays the file
//! out in memory first (offsets in the tables must be known before the payloads
//! are emitted) and then streams it through a [`SeqWriter`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{CacheError, Result};
use crate::format::{
    ContainerBody, DESCRIPTOR_HEADER_SIZE, DescriptorHeader, DescriptorKind, FLAG_REGULAR,
    PICTURE_ENTRY_SIZE, PICTURE_HEADER_SIZE, PICTURE_METRICS_SIZE, PICTURE_VERSION, PictureBody,
    PictureEntry, PictureFileHeader, PixelFormat, RegionBody, SCENE_RECORD_SIZE,
    STYLE_HEADER_SIZE, SceneRecord, StyleHeader, TEXT_ENTRY_SIZE, TEXT_HEADER_SIZE, TEXT_VERSION,
    TextBody, TextEntry, TextFileHeader,
};
use crate::model::Rect;

/// Appends bytes to a file and tracks the current offset.
#[derive(Debug)]
pub struct SeqWriter {
    writer: BufWriter<File>,
    current_offset: u64,
}

impl SeqWriter {
    /// Creates (truncating) the file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            current_offset: 0,
        })
    }

    /// Writes a complete buffer. Returns the offset where it starts.
    pub fn write_all(&mut self, buffer: &[u8]) -> Result<u64> {
        let start_offset = self.current_offset;
        self.writer.write_all(buffer)?;
        self.current_offset += buffer.len() as u64;
        Ok(start_offset)
    }

    /// Writes `buffer` and checks it lands at `expected`.
    fn write_at(&mut self, expected: u64, buffer: &[u8]) -> Result<()> {
        let at = self.write_all(buffer)?;
        if at != expected {
            return Err(CacheError::Internal(format!(
                "catalog layout drifted: wrote at {at}, planned {expected}"
            )));
        }
        Ok(())
    }

    /// Flushes the buffer to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the current file cursor position.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| CacheError::InvalidFormat(format!("{what} {value} does not fit in 32 bits")))
}

/// Where a new descriptor is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    /// Direct child of a scene (index returned by [`StyleWriter::scene`]).
    Scene(usize),
    /// Child of a group or subgroup (index returned by [`StyleWriter::group`]).
    Node(usize),
}

#[derive(Debug)]
struct PendingScene {
    record: SceneRecord,
    children: Vec<usize>,
}

#[derive(Debug)]
struct PendingNode {
    kind: DescriptorKind,
    flags: u8,
    id: u32,
    body: Vec<u8>,
    container: Option<ContainerBody>,
    children: Vec<usize>,
}

/// Builds a style file: scene table plus descriptor chains.
#[derive(Debug, Default)]
pub struct StyleWriter {
    scenes: Vec<PendingScene>,
    nodes: Vec<PendingNode>,
}

impl StyleWriter {
    /// Creates an empty style catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scene record. Returns its index for use with [`Parent::Scene`].
    pub fn scene(&mut self, id: u32, rect: Rect, background: u32, opacity: u8) -> usize {
        self.scenes.push(PendingScene {
            record: SceneRecord {
                id,
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                background,
                opacity,
                child_count: 0,
                child_offset: 0,
            },
            children: Vec::new(),
        });
        self.scenes.len() - 1
    }

    /// Adds a group (under a scene) or a subgroup (under a group).
    pub fn group(&mut self, parent: Parent, id: u32, rect: Rect) -> usize {
        let kind = match parent {
            Parent::Scene(_) => DescriptorKind::Group,
            Parent::Node(_) => DescriptorKind::Subgroup,
        };
        let body = ContainerBody {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            child_count: 0,
            child_offset: 0,
        };
        self.push(parent, kind, 0, id, Vec::new(), Some(body))
    }

    /// Adds a picture descriptor. `regular` pins it in the catalog.
    pub fn picture(&mut self, parent: Parent, id: u32, x: i16, y: i16, regular: bool) -> usize {
        let flags = if regular { FLAG_REGULAR } else { 0 };
        let body = PictureBody { x, y }.to_bytes().to_vec();
        self.push(parent, DescriptorKind::Picture, flags, id, body, None)
    }

    /// Adds a text descriptor.
    pub fn text(&mut self, parent: Parent, id: u32, body: TextBody) -> usize {
        self.push(parent, DescriptorKind::Text, 0, id, body.to_bytes().to_vec(), None)
    }

    /// Adds a picture region whose frames are ids `first_id ..`.
    pub fn region(&mut self, parent: Parent, first_id: u32, body: RegionBody) -> usize {
        let bytes = body.to_bytes().to_vec();
        self.push(parent, DescriptorKind::PictureRegion, 0, first_id, bytes, None)
    }

    fn push(
        &mut self,
        parent: Parent,
        kind: DescriptorKind,
        flags: u8,
        id: u32,
        body: Vec<u8>,
        container: Option<ContainerBody>,
    ) -> usize {
        let index = self.nodes.len();
        self.nodes.push(PendingNode {
            kind,
            flags,
            id,
            body,
            container,
            children: Vec::new(),
        });
        match parent {
            Parent::Scene(s) => {
                if let Some(scene) = self.scenes.get_mut(s) {
                    scene.children.push(index);
                }
            }
            Parent::Node(n) => {
                if let Some(node) = self.nodes.get_mut(n) {
                    node.children.push(index);
                }
            }
        }
        index
    }

    fn node_size(node: &PendingNode) -> usize {
        let body = match node.container {
            Some(_) => ContainerBody::SIZE,
            None => node.body.len(),
        };
        DESCRIPTOR_HEADER_SIZE + body
    }

    /// Serializes the catalog into memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        // Sibling lists are laid out contiguously, breadth first.
        let mut offsets = vec![0usize; self.nodes.len()];
        let mut cursor = STYLE_HEADER_SIZE + self.scenes.len() * SCENE_RECORD_SIZE;
        let mut lists: Vec<&[usize]> = self.scenes.iter().map(|s| s.children.as_slice()).collect();
        let mut next_lists = Vec::new();
        while !lists.is_empty() {
            for list in &lists {
                for &child in *list {
                    offsets[child] = cursor;
                    cursor += Self::node_size(&self.nodes[child]);
                    next_lists.push(self.nodes[child].children.as_slice());
                }
            }
            lists = std::mem::take(&mut next_lists);
        }

        let first = |children: &[usize]| -> Result<(u32, u32)> {
            match children.first() {
                Some(&c) => Ok((
                    to_u32(children.len(), "child count")?,
                    to_u32(offsets[c], "offset")?,
                )),
                None => Ok((0, 0)),
            }
        };

        let mut out = vec![0u8; cursor];
        let header = StyleHeader {
            scene_count: to_u32(self.scenes.len(), "scene count")?,
            reserved: 0,
        };
        out[..STYLE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        for (i, scene) in self.scenes.iter().enumerate() {
            let (child_count, child_offset) = first(&scene.children)?;
            let record = SceneRecord {
                child_count,
                child_offset,
                ..scene.record
            };
            let at = STYLE_HEADER_SIZE + i * SCENE_RECORD_SIZE;
            out[at..at + SCENE_RECORD_SIZE].copy_from_slice(&record.to_bytes());
        }

        let write_list = |children: &[usize], out: &mut Vec<u8>| -> Result<()> {
            for (pos, &child) in children.iter().enumerate() {
                let node = &self.nodes[child];
                let next = match children.get(pos + 1) {
                    Some(&n) => to_u32(offsets[n], "offset")?,
                    None => 0,
                };
                let body = match node.container {
                    Some(container) => {
                        let (child_count, child_offset) = first(&node.children)?;
                        ContainerBody {
                            child_count,
                            child_offset,
                            ..container
                        }
                        .to_bytes()
                        .to_vec()
                    }
                    None => node.body.clone(),
                };
                let header = DescriptorHeader {
                    kind: node.kind,
                    flags: node.flags,
                    body_len: u16::try_from(body.len()).map_err(|_| {
                        CacheError::InvalidFormat("descriptor body too large".into())
                    })?,
                    id: node.id,
                    next,
                };
                let at = offsets[child];
                out[at..at + DESCRIPTOR_HEADER_SIZE].copy_from_slice(&header.to_bytes());
                out[at + DESCRIPTOR_HEADER_SIZE..at + DESCRIPTOR_HEADER_SIZE + body.len()]
                    .copy_from_slice(&body);
            }
            Ok(())
        };
        for scene in &self.scenes {
            write_list(&scene.children, &mut out)?;
        }
        for node in &self.nodes {
            write_list(&node.children, &mut out)?;
        }
        Ok(out)
    }

    /// Writes the catalog to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let mut writer = SeqWriter::create(path)?;
        writer.write_at(0, &bytes)?;
        writer.flush()
    }
}

#[derive(Debug)]
struct PendingPicture {
    format: PixelFormat,
    width: u16,
    height: u16,
    name: [u8; 8],
    payload: Vec<u8>,
}

/// Builds one picture partition holding consecutive ids from `id_start`.
#[derive(Debug)]
pub struct PictureWriter {
    id_start: u32,
    entries: Vec<Option<PendingPicture>>,
}

impl PictureWriter {
    /// Creates an empty partition whose first entry is `id_start`.
    pub fn new(id_start: u32) -> Self {
        Self {
            id_start,
            entries: Vec::new(),
        }
    }

    /// Appends the next id with an already encoded payload. Returns its id.
    pub fn push(
        &mut self,
        name: &str,
        format: PixelFormat,
        width: u16,
        height: u16,
        payload: Vec<u8>,
    ) -> u32 {
        let mut fixed = [0u8; 8];
        for (dst, src) in fixed.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        self.entries.push(Some(PendingPicture {
            format,
            width,
            height,
            name: fixed,
            payload,
        }));
        self.last_id()
    }

    /// Appends a zero-length entry: the id lives in another partition.
    pub fn placeholder(&mut self) -> u32 {
        self.entries.push(None);
        self.last_id()
    }

    fn last_id(&self) -> u32 {
        self.id_start + self.entries.len() as u32 - 1
    }

    /// Writes the partition to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let table_end = PICTURE_HEADER_SIZE + self.entries.len() * PICTURE_ENTRY_SIZE;
        let mut cursor = table_end;
        let mut table = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            table.push(match entry {
                Some(p) => {
                    let len = p.payload.len();
                    let e = PictureEntry {
                        offset: to_u32(cursor, "picture offset")?,
                        length: len as u32,
                        kind: p.format.tag(),
                        name: p.name,
                        len_ext: (len as u64 >> 32) as u8,
                    };
                    cursor += PICTURE_METRICS_SIZE + len;
                    e
                }
                None => PictureEntry {
                    offset: 0,
                    length: 0,
                    kind: 0,
                    name: [0; 8],
                    len_ext: 0,
                },
            });
        }

        let header = PictureFileHeader {
            entry_count: to_u32(self.entries.len(), "entry count")?,
            width_format: 0,
            bit_depth: 16,
            flags: 0,
            version: PICTURE_VERSION,
            id_start: self.id_start,
            charset_extend: 0,
        };
        let mut writer = SeqWriter::create(path)?;
        writer.write_at(0, &header.to_bytes())?;
        for entry in &table {
            writer.write_all(&entry.to_bytes())?;
        }
        for (entry, pending) in table.iter().zip(&self.entries) {
            if let Some(p) = pending {
                let mut metrics = [0u8; PICTURE_METRICS_SIZE];
                metrics[0..2].copy_from_slice(&p.width.to_le_bytes());
                metrics[2..4].copy_from_slice(&p.height.to_le_bytes());
                writer.write_at(u64::from(entry.offset), &metrics)?;
                writer.write_all(&p.payload)?;
            }
        }
        writer.flush()
    }
}

/// Builds a text file holding consecutive ids from `id_start`.
#[derive(Debug)]
pub struct TextWriter {
    id_start: u32,
    strings: Vec<Vec<u8>>,
}

impl TextWriter {
    /// Creates an empty text catalog whose first entry is `id_start`.
    pub fn new(id_start: u32) -> Self {
        Self {
            id_start,
            strings: Vec::new(),
        }
    }

    /// Appends the next string. Returns its id.
    pub fn push(&mut self, text: &str) -> u32 {
        self.strings.push(text.as_bytes().to_vec());
        self.id_start + self.strings.len() as u32 - 1
    }

    /// Writes the catalog to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let header = TextFileHeader {
            entry_count: to_u32(self.strings.len(), "entry count")?,
            version: TEXT_VERSION,
            encoding: 0,
            id_start: self.id_start,
        };
        let mut writer = SeqWriter::create(path)?;
        writer.write_at(0, &header.to_bytes())?;
        let mut cursor = TEXT_HEADER_SIZE + self.strings.len() * TEXT_ENTRY_SIZE;
        for s in &self.strings {
            let entry = TextEntry {
                offset: to_u32(cursor, "text offset")?,
                length: to_u32(s.len(), "text length")?,
            };
            writer.write_all(&entry.to_bytes())?;
            cursor += s.len();
        }
        for s in &self.strings {
            writer.write_all(s)?;
        }
        writer.flush()
    }
}
