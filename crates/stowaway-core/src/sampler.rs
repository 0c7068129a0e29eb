//! Downsampled image decoding
//!
//! Large images are decoded in two passes:
//!
//! 1. Read only the bounds (no pixel data)
//! 2. Decode with a power-of-two sample factor chosen so the result still
//!    covers the requested box on at least one axis
//!
//! Pixel decoding itself belongs to a [`RasterCodec`]. This module only
//! computes the parameters handed to it. The default codec is backed by
//! the `image` crate and uses DCT scaling for JPEG sources, so sampled
//! JPEG decodes never materialize the full-resolution buffer. Other formats
//! are decoded at full size (within the reader's default allocation limit)
//! and then resized, so only their result is bounded.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use image::codecs::jpeg::JpegDecoder;
use image::imageops::FilterType;
use image::io::Reader;
use image::{
    DynamicImage, GenericImageView, ImageDecoder, ImageError, ImageFormat, ImageOutputFormat,
};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::paths::StorageTarget;

/// Requested bounding box in pixels
///
/// Only used to pick a sample factor. The decoded image is never cropped
/// to it and can be larger on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeBudget {
    pub width: u32,
    pub height: u32,
}

impl DecodeBudget {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Parameters for the pixel-decoding pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledDecodeParams {
    /// Power of two, at least 1
    pub sample_factor: u32,
    /// Density the decode and its target are both pinned to
    pub target_density: u32,
}

impl SampledDecodeParams {
    /// Full-resolution decode at `density`
    pub fn full(density: u32) -> Self {
        Self {
            sample_factor: 1,
            target_density: density,
        }
    }

    /// Parameters for decoding a `raw_width` x `raw_height` image into `budget`
    pub fn for_budget(raw_width: u32, raw_height: u32, budget: DecodeBudget, density: u32) -> Self {
        Self {
            sample_factor: compute_sample_factor(
                raw_width,
                raw_height,
                budget.width,
                budget.height,
            ),
            target_density: density,
        }
    }
}

/// Largest power-of-two divisor that keeps both halved axes above the request
///
/// Returns 1 when the image already fits. Otherwise doubles while *both*
/// `(raw / 2) / factor` values still exceed their requested size.
pub fn compute_sample_factor(
    raw_width: u32,
    raw_height: u32,
    req_width: u32,
    req_height: u32,
) -> u32 {
    if raw_height <= req_height && raw_width <= req_width {
        return 1;
    }

    let half_height = raw_height / 2;
    let half_width = raw_width / 2;
    let mut factor: u32 = 1;
    while half_height / factor > req_height && half_width / factor > req_width {
        factor *= 2;
    }
    factor
}

/// Decoded pixels plus the density they were decoded for
#[derive(Debug, Clone)]
pub struct RasterImage {
    image: DynamicImage,
    density: u32,
}

impl RasterImage {
    pub fn new(image: DynamicImage, density: u32) -> Self {
        Self { image, density }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn density(&self) -> u32 {
        self.density
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

/// Where encoded image bytes come from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A file on disk
    File(PathBuf),
    /// Bytes compiled into the binary (`include_bytes!`)
    Embedded(&'static [u8]),
    /// Bytes owned at runtime
    Bytes(Arc<[u8]>),
}

impl ImageSource {
    fn describe(&self) -> String {
        match self {
            ImageSource::File(path) => format!("{:?}", path),
            ImageSource::Embedded(bytes) => format!("embedded resource ({} bytes)", bytes.len()),
            ImageSource::Bytes(bytes) => format!("in-memory buffer ({} bytes)", bytes.len()),
        }
    }

    fn open(&self) -> StorageResult<SourceReader<'_>> {
        match self {
            ImageSource::File(path) => File::open(path)
                .map(|f| SourceReader::File(BufReader::new(f)))
                .map_err(|e| StorageError::from_read_io(e, path.clone())),
            ImageSource::Embedded(bytes) => Ok(SourceReader::Memory(Cursor::new(*bytes))),
            ImageSource::Bytes(bytes) => Ok(SourceReader::Memory(Cursor::new(&bytes[..]))),
        }
    }
}

impl From<&StorageTarget> for ImageSource {
    fn from(target: &StorageTarget) -> Self {
        ImageSource::File(target.path().to_path_buf())
    }
}

/// Seekable reader over either source kind
enum SourceReader<'a> {
    File(BufReader<File>),
    Memory(Cursor<&'a [u8]>),
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::File(r) => r.read(buf),
            SourceReader::Memory(r) => r.read(buf),
        }
    }
}

impl BufRead for SourceReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            SourceReader::File(r) => r.fill_buf(),
            SourceReader::Memory(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            SourceReader::File(r) => r.consume(amt),
            SourceReader::Memory(r) => r.consume(amt),
        }
    }
}

impl Seek for SourceReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            SourceReader::File(r) => r.seek(pos),
            SourceReader::Memory(r) => r.seek(pos),
        }
    }
}

/// Output encoding for saved images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// Lossy, quality-controlled
    Jpeg,
    /// Lossless
    Png,
}

impl ImageEncoding {
    /// `.jpg` targets (any case) are JPEG, everything else PNG
    ///
    /// Decided by name only, never by sniffing content.
    pub fn for_target(target: &StorageTarget) -> Self {
        match target.extension().as_deref() {
            Some("jpg") => ImageEncoding::Jpeg,
            _ => ImageEncoding::Png,
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageEncoding::Jpeg => write!(f, "JPEG"),
            ImageEncoding::Png => write!(f, "PNG"),
        }
    }
}

/// Raster codec boundary
///
/// The facade only computes parameters; implementations do the pixel work.
pub trait RasterCodec: Send + Sync {
    /// Read width and height without materializing pixels
    fn decode_bounds(&self, source: &ImageSource) -> StorageResult<(u32, u32)>;

    /// Decode pixels, downsampled by `params.sample_factor`
    fn decode_with_sampling(
        &self,
        source: &ImageSource,
        params: SampledDecodeParams,
    ) -> StorageResult<RasterImage>;

    /// Encode an image; `quality` only matters for lossy encodings
    fn encode(
        &self,
        image: &RasterImage,
        encoding: ImageEncoding,
        quality: u8,
    ) -> StorageResult<Vec<u8>>;
}

/// Default codec backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl ImageCodec {
    fn reader<'a>(&self, source: &'a ImageSource) -> StorageResult<Reader<SourceReader<'a>>> {
        let raw = source.open()?;
        Reader::new(raw)
            .with_guessed_format()
            .map_err(|e| decode_error(source, e))
    }

    /// JPEG: let the decoder scale in the DCT domain
    fn decode_jpeg_scaled(
        &self,
        source: &ImageSource,
        factor: u32,
    ) -> StorageResult<(DynamicImage, u32, u32)> {
        let mut decoder =
            JpegDecoder::new(source.open()?).map_err(|e| decode_error(source, e))?;
        let (raw_width, raw_height) = decoder.dimensions();

        let req_width = u16::try_from((raw_width / factor).max(1)).unwrap_or(u16::MAX);
        let req_height = u16::try_from((raw_height / factor).max(1)).unwrap_or(u16::MAX);
        decoder
            .scale(req_width, req_height)
            .map_err(|e| decode_error(source, e))?;

        let image = DynamicImage::from_decoder(decoder).map_err(|e| decode_error(source, e))?;
        Ok((image, raw_width, raw_height))
    }
}

impl RasterCodec for ImageCodec {
    fn decode_bounds(&self, source: &ImageSource) -> StorageResult<(u32, u32)> {
        self.reader(source)?
            .into_dimensions()
            .map_err(|e| decode_error(source, e))
    }

    fn decode_with_sampling(
        &self,
        source: &ImageSource,
        params: SampledDecodeParams,
    ) -> StorageResult<RasterImage> {
        let factor = params.sample_factor.max(1);
        let reader = self.reader(source)?;

        let (image, raw_width, raw_height) =
            if factor > 1 && reader.format() == Some(ImageFormat::Jpeg) {
                drop(reader);
                self.decode_jpeg_scaled(source, factor)?
            } else {
                let image = reader.decode().map_err(|e| decode_error(source, e))?;
                let (w, h) = (image.width(), image.height());
                (image, w, h)
            };

        let width = (raw_width / factor).max(1);
        let height = (raw_height / factor).max(1);
        let image = if image.width() != width || image.height() != height {
            image.resize_exact(width, height, FilterType::Triangle)
        } else {
            image
        };

        Ok(RasterImage::new(image, params.target_density))
    }

    fn encode(
        &self,
        image: &RasterImage,
        encoding: ImageEncoding,
        quality: u8,
    ) -> StorageResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        let result = match encoding {
            // JPEG has no alpha channel
            ImageEncoding::Jpeg => DynamicImage::ImageRgb8(image.image().to_rgb8())
                .write_to(&mut buffer, ImageOutputFormat::Jpeg(quality.clamp(1, 100))),
            ImageEncoding::Png => image.image().write_to(&mut buffer, ImageOutputFormat::Png),
        };
        result.map_err(|e| StorageError::Encode {
            format: encoding,
            details: e.to_string(),
        })?;
        Ok(buffer.into_inner())
    }
}

fn decode_error(source: &ImageSource, error: impl Into<DecodeFailure>) -> StorageError {
    let DecodeFailure(details) = error.into();
    StorageError::Decode {
        source_name: source.describe(),
        details,
    }
}

/// Unifies the two error types the decode path produces
struct DecodeFailure(String);

impl From<ImageError> for DecodeFailure {
    fn from(e: ImageError) -> Self {
        DecodeFailure(e.to_string())
    }
}

impl From<io::Error> for DecodeFailure {
    fn from(e: io::Error) -> Self {
        DecodeFailure(e.to_string())
    }
}

/// Two-pass decode of `source` into `budget` at `density`
pub fn decode_sampled(
    codec: &dyn RasterCodec,
    source: &ImageSource,
    budget: DecodeBudget,
    density: u32,
) -> StorageResult<RasterImage> {
    let (raw_width, raw_height) = codec.decode_bounds(source)?;
    let params = SampledDecodeParams::for_budget(raw_width, raw_height, budget, density);
    debug!(
        "Decoding {}x{} image into {}x{} budget with sample factor {}",
        raw_width, raw_height, budget.width, budget.height, params.sample_factor
    );
    codec.decode_with_sampling(source, params)
}

/// Full-resolution decode of `source` at `density`
pub fn decode_full(
    codec: &dyn RasterCodec,
    source: &ImageSource,
    density: u32,
) -> StorageResult<RasterImage> {
    codec.decode_with_sampling(source, SampledDecodeParams::full(density))
}
