//! Catalog fixtures shared by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rescache::decode::RleIndexDecoder;
use rescache::format::{RegionBody, TextBody};
use rescache::{
    CacheConfig, CacheContext, FileSetHandle, Parent, PictureWriter, PixelFormat, Rect, Result,
    StyleWriter, TextWriter,
};
use tempfile::TempDir;

pub const MAIN_SCENE: u32 = 0xA1;
pub const SIDE_SCENE: u32 = 0xB2;
pub const SCREEN_SCENE: u32 = 0xC3;
pub const GROUP: u32 = 0x10;
pub const SUBGROUP: u32 = 0x11;

pub const ICON: u32 = 1;
pub const INDEX8: u32 = 2;
pub const INDEX4: u32 = 3;
pub const LOGO: u32 = 4;
pub const GROUP_PIC: u32 = 5;
pub const SUBGROUP_PIC: u32 = 6;
pub const BIG: u32 = 7;
pub const FRAME0: u32 = 8;
pub const FRAMES: u32 = 3;

pub const SCREEN_W: u16 = 32;
pub const SCREEN_H: u16 = 24;

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn index8_parts() -> (Vec<u8>, Vec<u8>) {
    let indices = (0..16u8).map(|i| i / 4).collect();
    (pattern(1024, 2), indices)
}

fn index4_parts() -> (Vec<u8>, Vec<u8>) {
    let indices = vec![0x12, 0x12, 0x12, 0x34, 0x56, 0x56, 0x56, 0x56, 0x78];
    (pattern(64, 3), indices)
}

/// Decoded bytes of a picture of the standard set.
pub fn decoded(id: u32) -> Vec<u8> {
    match id {
        ICON => pattern(8 * 8 * 2, 1),
        INDEX8 => {
            let (mut palette, indices) = index8_parts();
            palette.extend(indices);
            palette
        }
        INDEX4 => {
            let (mut palette, indices) = index4_parts();
            palette.extend(indices);
            palette
        }
        LOGO => pattern(4 * 4 * 2, 4),
        GROUP_PIC => pattern(6 * 6 * 2, 5),
        SUBGROUP_PIC => pattern(3 * 3 * 4, 6),
        BIG => pattern(64 * 64 * 2, 7),
        id => pattern(2 * 2 * 2, id as u8),
    }
}

fn rect(width: u16, height: u16) -> Rect {
    Rect {
        x: 0,
        y: 0,
        width,
        height,
    }
}

fn text_body(x: i16) -> TextBody {
    TextBody {
        x,
        y: 10,
        width: 100,
        height: 16,
        color: 0xFFFF_FFFF,
        background: 0xFF00_0000,
        align: 1,
    }
}

/// Paths of one style/picture/text trio.
#[derive(Debug, Clone)]
pub struct SetPaths {
    pub style: PathBuf,
    pub picture: PathBuf,
    pub text: PathBuf,
}

impl SetPaths {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            style: dir.join(format!("{stem}.sty")),
            picture: dir.join(format!("{stem}.pic")),
            text: dir.join(format!("{stem}.txt")),
        }
    }

    pub fn open(&self, cache: &CacheContext) -> Result<FileSetHandle> {
        cache.open(&self.style, &self.picture, &self.text)
    }
}

/// Writes the standard set:
///
/// ```text
/// scene 0xA1: pic 1, pic 2 (Index8), pic 3 (Index4), pic 4 (regular), pic 7 (64x64),
///             text 1, text 2,
///             group 0x10 { pic 5, text 3, subgroup 0x11 { pic 6 } },
///             region 8..11
/// scene 0xB2: pic 1, pic 7
/// ```
pub fn write_standard(dir: &Path, stem: &str) -> Result<SetPaths> {
    let paths = SetPaths::new(dir, stem);

    let mut pictures = PictureWriter::new(1);
    pictures.push("icon", PixelFormat::Rgb565, 8, 8, decoded(ICON));
    let (mut stored, indices) = index8_parts();
    stored.extend(RleIndexDecoder::compress(&indices));
    pictures.push("idx8", PixelFormat::Index8, 4, 4, stored);
    let (mut stored, indices) = index4_parts();
    stored.extend(RleIndexDecoder::compress(&indices));
    pictures.push("idx4", PixelFormat::Index4, 5, 3, stored);
    pictures.push("logo", PixelFormat::Rgb565, 4, 4, decoded(LOGO));
    pictures.push("grp", PixelFormat::Rgb565, 6, 6, decoded(GROUP_PIC));
    pictures.push("sub", PixelFormat::Argb8888, 3, 3, decoded(SUBGROUP_PIC));
    pictures.push("big", PixelFormat::Rgb565, 64, 64, decoded(BIG));
    for frame in FRAME0..FRAME0 + FRAMES {
        pictures.push("frame", PixelFormat::Rgb565, 2, 2, decoded(frame));
    }
    pictures.write_to(&paths.picture)?;

    let mut texts = TextWriter::new(1);
    texts.push("Hello");
    texts.push("World");
    texts.push("Grüße");
    texts.write_to(&paths.text)?;

    let mut style = StyleWriter::new();
    let main = Parent::Scene(style.scene(MAIN_SCENE, rect(320, 240), 0xFF20_2020, 255));
    style.picture(main, ICON, 1, 2, false);
    style.picture(main, INDEX8, 3, 4, false);
    style.picture(main, INDEX4, 5, 6, false);
    style.picture(main, LOGO, 7, 8, true);
    style.picture(main, BIG, 0, 0, false);
    style.text(main, 1, text_body(0));
    style.text(main, 2, text_body(50));
    let group = Parent::Node(style.group(main, GROUP, rect(100, 100)));
    style.picture(group, GROUP_PIC, 9, 9, false);
    style.text(group, 3, text_body(20));
    let subgroup = Parent::Node(style.group(group, SUBGROUP, rect(50, 50)));
    style.picture(subgroup, SUBGROUP_PIC, 1, 1, false);
    style.region(
        main,
        FRAME0,
        RegionBody {
            x: 40,
            y: 40,
            width: 2,
            height: 2,
            frame_count: FRAMES,
        },
    );
    let side = Parent::Scene(style.scene(SIDE_SCENE, rect(320, 240), 0, 128));
    style.picture(side, ICON, 0, 0, false);
    style.picture(side, BIG, 0, 0, false);
    style.write_to(&paths.style)?;

    Ok(paths)
}

/// Writes a set whose scene 0xC3 holds three full-screen RGB565 bitmaps,
/// ids 1 to 3, plus the 8x8 icon as id 4.
pub fn write_screens(dir: &Path, stem: &str) -> Result<SetPaths> {
    let paths = SetPaths::new(dir, stem);
    let size = usize::from(SCREEN_W) * usize::from(SCREEN_H) * 2;

    let mut pictures = PictureWriter::new(1);
    for seed in 1..=3u8 {
        pictures.push("screen", PixelFormat::Rgb565, SCREEN_W, SCREEN_H, pattern(size, seed));
    }
    pictures.push("icon", PixelFormat::Rgb565, 8, 8, pattern(128, 9));
    pictures.write_to(&paths.picture)?;

    let mut texts = TextWriter::new(1);
    texts.push("screens");
    texts.write_to(&paths.text)?;

    let mut style = StyleWriter::new();
    let scene = Parent::Scene(style.scene(SCREEN_SCENE, rect(SCREEN_W, SCREEN_H), 0, 255));
    for id in 1..=4 {
        style.picture(scene, id, 0, 0, false);
    }
    style.write_to(&paths.style)?;
    Ok(paths)
}

/// A temporary directory holding the standard set as `ui.*`.
pub struct Fixture {
    pub dir: TempDir,
    pub paths: SetPaths,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = write_standard(dir.path(), "ui")?;
        Ok(Self { dir, paths })
    }

    pub fn open(&self, cache: &CacheContext) -> Result<FileSetHandle> {
        self.paths.open(cache)
    }
}

/// Configuration reading payloads through file handles, so every bitmap is
/// decoded into pool storage.
pub fn config() -> CacheConfig {
    CacheConfig {
        use_mmap: false,
        ..CacheConfig::default()
    }
}

pub fn cache() -> Result<CacheContext> {
    CacheContext::new(config())
}
