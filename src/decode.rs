//! Pluggable pixel decoders.
//!
//! Turns the stored bytes of a picture entry into its decoded payload. Each
//! [`PixelFormat`] tag maps to one [`Decoder`] in a [`DecoderRegistry`]; the
//! decoder writes straight into the buffer the pool already allocated.

use crate::error::{CacheError, Result};
use crate::format::PixelFormat;

/// Interface for pixel decoders.
pub trait Decoder: Send + Sync + std::fmt::Debug {
    /// The format tag this decoder handles.
    fn format(&self) -> PixelFormat;

    /// Decodes `src` into `dst`. Returns the number of bytes written.
    ///
    /// `dst` is exactly the decoded payload size of the picture; `width` and
    /// `height` are passed for decoders that need row geometry.
    fn decode(&self, src: &[u8], dst: &mut [u8], width: u16, height: u16) -> Result<usize>;
}

// --- Raw (pass-through) ---

/// Stored bytes are the pixels.
#[derive(Debug, Clone, Copy)]
pub struct RawDecoder(pub PixelFormat);

impl Decoder for RawDecoder {
    fn format(&self) -> PixelFormat {
        self.0
    }

    fn decode(&self, src: &[u8], dst: &mut [u8], _width: u16, _height: u16) -> Result<usize> {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }
}

// --- LZ4 ---

#[cfg(feature = "lz4_flex")]
/// LZ4 block without size prefix; the size comes from the picture metrics.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Decoder(pub PixelFormat);

#[cfg(feature = "lz4_flex")]
impl Decoder for Lz4Decoder {
    fn format(&self) -> PixelFormat {
        self.0
    }

    fn decode(&self, src: &[u8], dst: &mut [u8], _width: u16, _height: u16) -> Result<usize> {
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| CacheError::DecodeFailed(format!("lz4: {e}")))
    }
}

// --- Run-length indexed ---

/// Palette stored raw, indices run-length encoded.
///
/// Control byte `c`: with the high bit set, the next byte repeats
/// `(c & 0x7f) + 1` times; otherwise `c + 1` literal bytes follow.
#[derive(Debug, Clone, Copy)]
pub struct RleIndexDecoder(pub PixelFormat);

impl RleIndexDecoder {
    /// Expands an RLE stream into `dst`. Stops when `dst` is full.
    pub fn expand(src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let mut i = 0;
        let mut o = 0;
        while o < dst.len() && i < src.len() {
            let control = src[i];
            i += 1;
            let count = usize::from(control & 0x7f) + 1;
            if control & 0x80 != 0 {
                let value = *src
                    .get(i)
                    .ok_or_else(|| CacheError::DecodeFailed("rle: run without value".into()))?;
                i += 1;
                let end = (o + count).min(dst.len());
                dst[o..end].fill(value);
                o = end;
            } else {
                let literal = src
                    .get(i..i + count)
                    .ok_or_else(|| CacheError::DecodeFailed("rle: literal past end".into()))?;
                i += count;
                let end = (o + count).min(dst.len());
                dst[o..end].copy_from_slice(&literal[..end - o]);
                o = end;
            }
        }
        Ok(o)
    }

    /// Encodes `data` with the scheme [`RleIndexDecoder::expand`] reads.
    pub fn compress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() / 2 + 2);
        let mut i = 0;
        while i < data.len() {
            let mut run = 1;
            while i + run < data.len() && data[i + run] == data[i] && run < 128 {
                run += 1;
            }
            if run >= 3 {
                out.push(0x80 | (run - 1) as u8);
                out.push(data[i]);
                i += run;
                continue;
            }
            let start = i;
            while i < data.len() && i - start < 128 {
                if i + 2 < data.len() && data[i] == data[i + 1] && data[i] == data[i + 2] {
                    break;
                }
                i += 1;
            }
            out.push((i - start - 1) as u8);
            out.extend_from_slice(&data[start..i]);
        }
        out
    }
}

impl Decoder for RleIndexDecoder {
    fn format(&self) -> PixelFormat {
        self.0
    }

    fn decode(&self, src: &[u8], dst: &mut [u8], _width: u16, _height: u16) -> Result<usize> {
        let palette = self.0.palette_size();
        if src.len() < palette || dst.len() < palette {
            return Err(CacheError::DecodeFailed(format!(
                "{:?}: payload shorter than its {palette}-byte palette",
                self.0
            )));
        }
        dst[..palette].copy_from_slice(&src[..palette]);
        let indices = Self::expand(&src[palette..], &mut dst[palette..])?;
        Ok(palette + indices)
    }
}

// --- JPEG ---

#[cfg(feature = "jpeg")]
/// Baseline JPEG decoded to little-endian RGB565.
#[derive(Debug, Clone, Copy)]
pub struct JpegDecoder;

#[cfg(feature = "jpeg")]
impl Decoder for JpegDecoder {
    fn format(&self) -> PixelFormat {
        PixelFormat::Jpeg
    }

    fn decode(&self, src: &[u8], dst: &mut [u8], width: u16, height: u16) -> Result<usize> {
        let image = image::load_from_memory_with_format(src, image::ImageFormat::Jpeg)
            .map_err(|e| CacheError::DecodeFailed(format!("jpeg: {e}")))?
            .to_rgb8();
        if image.width() != u32::from(width) || image.height() != u32::from(height) {
            return Err(CacheError::DecodeFailed(format!(
                "jpeg: decoded {}x{}, catalog says {width}x{height}",
                image.width(),
                image.height()
            )));
        }
        let mut written = 0;
        for (px, out) in image.pixels().zip(dst.chunks_exact_mut(2)) {
            let [r, g, b] = px.0;
            let rgb565 = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
            out.copy_from_slice(&rgb565.to_le_bytes());
            written += 2;
        }
        Ok(written)
    }
}

// --- REGISTRY ---

/// Maps format tags to decoders.
#[derive(Debug)]
pub struct DecoderRegistry {
    decoders: Vec<Option<Box<dyn Decoder>>>,
}

impl DecoderRegistry {
    /// Creates a registry with every built-in decoder enabled by features.
    pub fn new() -> Self {
        let mut reg = Self {
            decoders: (0..8).map(|_| None).collect(),
        };
        reg.register(Box::new(RawDecoder(PixelFormat::Rgb565)));
        reg.register(Box::new(RawDecoder(PixelFormat::Argb8888)));
        reg.register(Box::new(RawDecoder(PixelFormat::Argb8565)));
        #[cfg(feature = "lz4_flex")]
        {
            reg.register(Box::new(Lz4Decoder(PixelFormat::Lz4Rgb565)));
            reg.register(Box::new(Lz4Decoder(PixelFormat::Lz4Argb8888)));
        }
        reg.register(Box::new(RleIndexDecoder(PixelFormat::Index4)));
        reg.register(Box::new(RleIndexDecoder(PixelFormat::Index8)));
        #[cfg(feature = "jpeg")]
        reg.register(Box::new(JpegDecoder));
        reg
    }

    /// Registers a decoder, replacing any previous one for its format.
    pub fn register(&mut self, decoder: Box<dyn Decoder>) {
        let id = usize::from(decoder.format().tag());
        if id >= self.decoders.len() {
            self.decoders.resize_with(id + 1, || None);
        }
        if let Some(slot) = self.decoders.get_mut(id) {
            *slot = Some(decoder);
        }
    }

    /// Retrieves the decoder for `format`.
    ///
    /// # Errors
    /// Returns `CacheError::DecodeFailed` if the format is not available.
    pub fn get(&self, format: PixelFormat) -> Result<&dyn Decoder> {
        self.decoders
            .get(usize::from(format.tag()))
            .and_then(|d| d.as_deref())
            .ok_or_else(|| {
                CacheError::DecodeFailed(format!("no decoder registered for {format:?}"))
            })
    }

    /// Decodes `src` into `dst`, which must be exactly the expected payload.
    ///
    /// # Errors
    /// `DecodeFailed` when the decoder writes fewer bytes than `dst.len()`.
    pub fn decode_into(
        &self,
        format: PixelFormat,
        src: &[u8],
        dst: &mut [u8],
        width: u16,
        height: u16,
    ) -> Result<()> {
        let written = self.get(format)?.decode(src, dst, width, height)?;
        if written != dst.len() {
            return Err(CacheError::DecodeFailed(format!(
                "{format:?}: decoded {written} bytes, expected {}",
                dst.len()
            )));
        }
        Ok(())
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
