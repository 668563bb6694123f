//! The read side of the catalog files.
//!
//! A style catalog is loaded whole (memory-mapped where allowed) because every
//! scene/group traversal walks it. Picture and text files only have their entry
//! tables loaded; payloads are fetched on demand, either sliced out of the
//! mapping or read through a seekable handle.

use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::ops::{Deref, Range};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;

use crate::error::{CacheError, Result};
use crate::format::{
    ContainerBody, DESCRIPTOR_HEADER_SIZE, DescriptorHeader, DescriptorKind,
    PICTURE_ENTRY_SIZE, PICTURE_HEADER_SIZE, PICTURE_METRICS_SIZE, PictureBody, PictureEntry,
    PictureFileHeader, PixelFormat, RegionBody, SCENE_RECORD_SIZE, STYLE_HEADER_SIZE, SceneRecord,
    StyleHeader, TEXT_ENTRY_SIZE, TEXT_HEADER_SIZE, TextBody, TextEntry, TextFileHeader, le_u16,
};

pub(crate) fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => CacheError::NotFound(path.display().to_string()),
        _ => e.into(),
    })
}

fn map_file(file: &File, path: &Path) -> Result<Mmap> {
    if file.metadata()?.len() == 0 {
        return Err(CacheError::InvalidFormat(format!(
            "{} is empty",
            path.display()
        )));
    }
    // Safety: catalogs are read-only inputs produced offline; nothing truncates
    // them while the simulator runs.
    #[allow(unsafe_code)]
    let map = unsafe { Mmap::map(file)? };
    Ok(map)
}

/// Bytes of a fully loaded catalog.
#[derive(Debug, Clone)]
pub enum CatalogBytes {
    /// Memory-mapped file.
    Mapped(Arc<Mmap>),
    /// File read into memory.
    Owned(Arc<[u8]>),
}

impl CatalogBytes {
    /// Loads the whole file at `path`.
    pub fn load(path: &Path, use_mmap: bool) -> Result<Self> {
        let mut file = open_file(path)?;
        if use_mmap {
            return Ok(Self::Mapped(Arc::new(map_file(&file, path)?)));
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Self::Owned(buf.into()))
    }
}

impl Deref for CatalogBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

/// Where payload bytes of a picture/text file come from.
#[derive(Debug)]
enum PayloadSource {
    Mapped(Arc<Mmap>),
    File { file: Mutex<File>, len: u64 },
}

impl PayloadSource {
    fn open(path: &Path, use_mmap: bool) -> Result<Self> {
        let file = open_file(path)?;
        if use_mmap {
            return Ok(Self::Mapped(Arc::new(map_file(&file, path)?)));
        }
        let len = file.metadata()?.len();
        Ok(Self::File {
            file: Mutex::new(file),
            len,
        })
    }

    fn len(&self) -> u64 {
        match self {
            Self::Mapped(m) => m.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    /// Reads exactly `len` bytes at `offset`.
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let available = self.len().saturating_sub(offset);
        if (len as u64) > available {
            return Err(CacheError::ShortRead {
                expected: len,
                actual: available as usize,
            });
        }
        match self {
            Self::Mapped(m) => {
                let start = offset as usize;
                Ok(m[start..start + len].to_vec())
            }
            Self::File { file, .. } => {
                let mut file = file.lock().map_err(|_| CacheError::poisoned("catalog file"))?;
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                let mut filled = 0;
                while filled < len {
                    match file.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                if filled < len {
                    return Err(CacheError::ShortRead {
                        expected: len,
                        actual: filled,
                    });
                }
                Ok(buf)
            }
        }
    }

    fn mapping(&self) -> Option<&Arc<Mmap>> {
        match self {
            Self::Mapped(m) => Some(m),
            Self::File { .. } => None,
        }
    }
}

// --- STYLE CATALOG ---

/// Parsed body of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorBody {
    /// Group or subgroup.
    Container(ContainerBody),
    /// Picture.
    Picture(PictureBody),
    /// Text.
    Text(TextBody),
    /// Picture region.
    Region(RegionBody),
    /// Kind not understood by this reader.
    Unknown,
}

/// A descriptor located in the style catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Absolute offset of the record.
    pub offset: u32,
    /// Common header.
    pub header: DescriptorHeader,
    /// Kind-specific body.
    pub body: DescriptorBody,
}

/// The in-memory style catalog of one file set.
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    bytes: CatalogBytes,
    header: StyleHeader,
}

impl StyleCatalog {
    /// Loads and validates the style file at `path`.
    pub fn open(path: &Path, use_mmap: bool) -> Result<Self> {
        Self::from_catalog_bytes(CatalogBytes::load(path, use_mmap)?)
    }

    /// Validates an in-memory style catalog.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_catalog_bytes(CatalogBytes::Owned(bytes.into()))
    }

    fn from_catalog_bytes(bytes: CatalogBytes) -> Result<Self> {
        let header = StyleHeader::from_bytes(&bytes)?;
        let table_end = STYLE_HEADER_SIZE + header.scene_count as usize * SCENE_RECORD_SIZE;
        if table_end > bytes.len() {
            return Err(CacheError::InvalidFormat(format!(
                "style file: {} scenes need {table_end} bytes, file has {}",
                header.scene_count,
                bytes.len()
            )));
        }
        Ok(Self { bytes, header })
    }

    /// Size of the catalog in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the catalog holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of scene records.
    pub fn scene_count(&self) -> usize {
        self.header.scene_count as usize
    }

    /// Scene record at table position `index`.
    pub fn scene_at(&self, index: usize) -> Result<SceneRecord> {
        if index >= self.scene_count() {
            return Err(CacheError::NotFound(format!("scene index {index}")));
        }
        let at = STYLE_HEADER_SIZE + index * SCENE_RECORD_SIZE;
        SceneRecord::from_bytes(&self.bytes[at..at + SCENE_RECORD_SIZE])
    }

    /// Scene record with the given id.
    pub fn find_scene(&self, id: u32) -> Result<SceneRecord> {
        for index in 0..self.scene_count() {
            let record = self.scene_at(index)?;
            if record.id == id {
                return Ok(record);
            }
        }
        Err(CacheError::NotFound(format!("scene {id:#x}")))
    }

    /// Parses the descriptor starting at `offset`.
    pub fn descriptor_at(&self, offset: u32) -> Result<Descriptor> {
        let start = offset as usize;
        let header_end = start + DESCRIPTOR_HEADER_SIZE;
        if start < STYLE_HEADER_SIZE || header_end > self.bytes.len() {
            return Err(CacheError::InvalidFormat(format!(
                "descriptor offset {offset} outside the style file"
            )));
        }
        let header = DescriptorHeader::from_bytes(&self.bytes[start..header_end])?;
        let body_end = header_end + usize::from(header.body_len);
        if body_end > self.bytes.len() || usize::from(header.body_len) < header.kind.body_size() {
            return Err(CacheError::InvalidFormat(format!(
                "descriptor at {offset} has a truncated body"
            )));
        }
        let raw = &self.bytes[header_end..body_end];
        let body = match header.kind {
            DescriptorKind::Group | DescriptorKind::Subgroup => {
                DescriptorBody::Container(ContainerBody::from_bytes(raw)?)
            }
            DescriptorKind::Picture => DescriptorBody::Picture(PictureBody::from_bytes(raw)?),
            DescriptorKind::Text => DescriptorBody::Text(TextBody::from_bytes(raw)?),
            DescriptorKind::PictureRegion => DescriptorBody::Region(RegionBody::from_bytes(raw)?),
            DescriptorKind::Unknown(_) => DescriptorBody::Unknown,
        };
        Ok(Descriptor {
            offset,
            header,
            body,
        })
    }

    /// Walks a sibling chain of at most `count` descriptors starting at `first`.
    pub fn children(&self, first: u32, count: u32) -> Children<'_> {
        Children {
            catalog: self,
            next: first,
            remaining: count,
            visited: HashSet::new(),
        }
    }
}

/// Iterator over a sibling chain. Yields an error and stops on corruption.
#[derive(Debug)]
pub struct Children<'a> {
    catalog: &'a StyleCatalog,
    next: u32,
    remaining: u32,
    visited: HashSet<u32>,
}

impl Iterator for Children<'_> {
    type Item = Result<Descriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.next == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        match self.catalog.descriptor_at(current) {
            Ok(desc) => {
                self.visited.insert(current);
                if self.visited.contains(&desc.header.next) {
                    self.remaining = 0;
                    return Some(Err(CacheError::InvalidFormat(format!(
                        "descriptor at {current} links back to {}",
                        desc.header.next
                    ))));
                }
                self.next = desc.header.next;
                Some(Ok(desc))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

// --- PICTURE INDEX ---

/// Where a picture's payload lives and how to decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureLocation {
    /// Position of the partition in [`PictureIndex`] (sorted order).
    pub partition: usize,
    /// Absolute offset of the pixel payload (metrics skipped).
    pub offset: u64,
    /// Stored payload length.
    pub compressed_size: usize,
    /// Pixel encoding.
    pub format: PixelFormat,
    /// Width from the metrics.
    pub width: u16,
    /// Height from the metrics.
    pub height: u16,
}

impl PictureLocation {
    /// Size of the decoded payload.
    pub fn decoded_size(&self) -> usize {
        self.format.decoded_size(self.width, self.height)
    }
}

#[derive(Debug)]
struct Partition {
    letter: char,
    path: PathBuf,
    header: PictureFileHeader,
    entries: Vec<PictureEntry>,
    /// Width and height per entry, read once at open. Zero for placeholders.
    metrics: Vec<(u16, u16)>,
    source: PayloadSource,
}

impl Partition {
    fn open(letter: char, path: PathBuf, use_mmap: bool) -> Result<Self> {
        let source = PayloadSource::open(&path, use_mmap)?;
        let header = PictureFileHeader::from_bytes(&source.read(0, PICTURE_HEADER_SIZE)?)?;
        let table_len = header.entry_count as usize * PICTURE_ENTRY_SIZE;
        let table = source.read(PICTURE_HEADER_SIZE as u64, table_len)?;
        let entries = table
            .chunks_exact(PICTURE_ENTRY_SIZE)
            .map(PictureEntry::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        let metrics = entries
            .iter()
            .map(|entry| -> Result<(u16, u16)> {
                if entry.is_placeholder() {
                    return Ok((0, 0));
                }
                let raw = source.read(u64::from(entry.offset), PICTURE_METRICS_SIZE)?;
                Ok((le_u16(&raw, 0)?, le_u16(&raw, 2)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            letter,
            path,
            header,
            entries,
            metrics,
            source,
        })
    }

    fn covers(&self, id: u32) -> bool {
        id >= self.header.id_start && id - self.header.id_start < self.header.entry_count
    }

    fn entry(&self, id: u32) -> Option<(&PictureEntry, (u16, u16))> {
        if !self.covers(id) {
            return None;
        }
        let index = (id - self.header.id_start) as usize;
        let entry = self.entries.get(index).filter(|e| !e.is_placeholder())?;
        Some((entry, *self.metrics.get(index)?))
    }
}

fn partition_path(primary: &Path, letter: char) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match primary.extension() {
        Some(ext) => format!("{stem}_{letter}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{letter}"),
    };
    primary.with_file_name(name)
}

/// Entry tables of every picture partition of a file set.
#[derive(Debug)]
pub struct PictureIndex {
    partitions: Vec<Partition>,
    payload_reads: AtomicU64,
}

impl PictureIndex {
    /// Opens the primary partition at `path` (partition `a`) and every lettered
    /// sibling `<stem>_b.<ext>`, `<stem>_c.<ext>` ... that exists, up to
    /// `max_partitions` in total.
    pub fn open(path: &Path, max_partitions: usize, use_mmap: bool) -> Result<Self> {
        let mut partitions = vec![Partition::open('a', path.to_path_buf(), use_mmap)?];
        for letter in ('b'..='z').take(max_partitions.saturating_sub(1)) {
            let sibling = partition_path(path, letter);
            if !sibling.exists() {
                break;
            }
            partitions.push(Partition::open(letter, sibling, use_mmap)?);
        }
        partitions.sort_by_key(|p| p.header.id_start);
        log::debug!(
            "picture index {}: {} partition(s), {} entries",
            path.display(),
            partitions.len(),
            partitions.iter().map(|p| p.entries.len()).sum::<usize>()
        );
        Ok(Self {
            partitions,
            payload_reads: AtomicU64::new(0),
        })
    }

    /// Number of partitions found.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of payload reads served so far.
    pub fn payload_reads(&self) -> u64 {
        self.payload_reads.load(Ordering::Relaxed)
    }

    /// Finds the partition holding `id`: binary search by id range, then a
    /// fallback scan of the remaining partitions in letter order.
    fn find(&self, id: u32) -> Option<(usize, &PictureEntry, (u16, u16))> {
        let natural = self
            .partitions
            .partition_point(|p| p.header.id_start <= id)
            .checked_sub(1);
        if let Some(index) = natural
            && let Some((entry, metrics)) = self.partitions[index].entry(id)
        {
            return Some((index, entry, metrics));
        }

        let mut order: Vec<usize> = (0..self.partitions.len())
            .filter(|&i| Some(i) != natural)
            .collect();
        order.sort_by_key(|&i| self.partitions[i].letter);
        for index in order {
            if let Some((entry, metrics)) = self.partitions[index].entry(id) {
                log::warn!(
                    "picture {id} missing from its natural partition, found in {}",
                    self.partitions[index].path.display()
                );
                return Some((index, entry, metrics));
            }
        }
        None
    }

    /// Resolves `id` to a payload location. Touches no file bytes.
    pub fn locate(&self, id: u32) -> Result<PictureLocation> {
        let (partition, entry, (width, height)) = self
            .find(id)
            .ok_or_else(|| CacheError::NotFound(format!("picture {id}")))?;
        let compressed_size = usize::try_from(entry.compressed_len()).map_err(|_| {
            CacheError::InvalidFormat(format!("picture {id}: payload length overflows"))
        })?;
        Ok(PictureLocation {
            partition,
            offset: u64::from(entry.offset) + PICTURE_METRICS_SIZE as u64,
            compressed_size,
            format: PixelFormat::from_tag(entry.kind)?,
            width,
            height,
        })
    }

    /// Reads the stored payload of a located picture.
    pub fn read_payload(&self, location: &PictureLocation) -> Result<Vec<u8>> {
        let partition = self
            .partitions
            .get(location.partition)
            .ok_or_else(|| CacheError::Internal("stale picture location".into()))?;
        self.payload_reads.fetch_add(1, Ordering::Relaxed);
        partition
            .source
            .read(location.offset, location.compressed_size)
    }

    /// The mapping and byte range of a located payload, when mapped.
    pub fn mapped_payload(&self, location: &PictureLocation) -> Option<(Arc<Mmap>, Range<usize>)> {
        let map = self.partitions.get(location.partition)?.source.mapping()?;
        let start = usize::try_from(location.offset).ok()?;
        let end = start.checked_add(location.compressed_size)?;
        (end <= map.len()).then(|| (Arc::clone(map), start..end))
    }
}

// --- TEXT INDEX ---

/// Entry table of the text file.
#[derive(Debug)]
pub struct TextIndex {
    header: TextFileHeader,
    entries: Vec<TextEntry>,
    source: PayloadSource,
}

impl TextIndex {
    /// Opens the text file at `path`.
    pub fn open(path: &Path, use_mmap: bool) -> Result<Self> {
        let source = PayloadSource::open(path, use_mmap)?;
        let header = TextFileHeader::from_bytes(&source.read(0, TEXT_HEADER_SIZE)?)?;
        let table = source.read(
            TEXT_HEADER_SIZE as u64,
            header.entry_count as usize * TEXT_ENTRY_SIZE,
        )?;
        let entries = table
            .chunks_exact(TEXT_ENTRY_SIZE)
            .map(TextEntry::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            header,
            entries,
            source,
        })
    }

    /// Number of strings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `id`.
    pub fn locate(&self, id: u32) -> Result<TextEntry> {
        id.checked_sub(self.header.id_start)
            .and_then(|i| self.entries.get(i as usize))
            .copied()
            .ok_or_else(|| CacheError::NotFound(format!("text {id}")))
    }

    /// Reads the payload of `entry`.
    pub fn read(&self, entry: &TextEntry) -> Result<Vec<u8>> {
        self.source
            .read(u64::from(entry.offset), entry.length as usize)
    }
}
