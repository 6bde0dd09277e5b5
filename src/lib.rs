//! Decoding and Encoding of tiled TIFF and BigTIFF images
//!
//! TIFF (Tagged Image File Format) stores one or more images as a chain of
//! Image File Directories (IFDs), each describing a grid of independently
//! compressed tiles or strips. This crate models the directory structure and
//! the per-tile pipeline: fill-order reversal, compression dispatch,
//! predictor transforms and bit-level sample unpacking.
//!
//! # Related Links
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification
//! * <https://www.awaresystems.be/imaging/tiff/bigtiff.html> - BigTIFF

pub mod codec;
mod error;
pub mod ifd;
mod predictor;
pub mod reader;
mod samples;
mod stream;
pub mod tags;
pub mod tile;
mod value;
pub mod writer;
mod ycbcr;

pub use self::error::{
    CodecError, HeaderError, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError,
    UsageError,
};
pub use self::ifd::Ifd;
pub use self::reader::{DecodedImage, ReaderOptions, TiffReader};
pub use self::stream::{ByteOrder, EndianReader, EndianWriter, Truncate};
pub use self::tile::{TileIndex, TileMap, TileSlot};
pub use self::value::Value;
pub use self::writer::{TiffWriter, WriterOptions};

/// Largest accepted value for any entry of `BitsPerSample`.
pub const MAX_BITS_PER_SAMPLE: u16 = 256;

/// Largest channel count the writer accepts for `SamplesPerPixel`.
pub const MAX_SAMPLES_PER_PIXEL: u16 = 128;

/// The in-memory representation of one decoded sample.
///
/// Derived from `BitsPerSample` and `SampleFormat`. Sub-byte widths are
/// promoted to the next byte-aligned type on unpack (4 bit to [`U8`], 12 bit
/// to [`U16`], 17..=24 bit to [`U32`], 16 and 24 bit floats to [`F32`]). The
/// only exception is [`Bit`] which keeps single-channel 1-bit images packed.
///
/// [`Bit`]: SampleType::Bit
/// [`U8`]: SampleType::U8
/// [`U16`]: SampleType::U16
/// [`U32`]: SampleType::U32
/// [`F32`]: SampleType::F32
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[non_exhaustive]
pub enum SampleType {
    /// Packed single-channel binary samples, eight pixels per byte.
    Bit,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl SampleType {
    /// Width of one unpacked sample in bytes. [`Bit`](SampleType::Bit)
    /// reports 1 even though eight samples share a byte.
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            SampleType::Bit | SampleType::I8 | SampleType::U8 => 1,
            SampleType::I16 | SampleType::U16 => 2,
            SampleType::I32 | SampleType::U32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }

    /// Whether samples of this type keep their packed sub-byte layout.
    pub fn is_packed(self) -> bool {
        matches!(self, SampleType::Bit)
    }
}
