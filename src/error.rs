use std::error::Error;
use std::fmt;
use std::io;
use std::str;
use std::string;

use crate::tags::{CompressionMethod, PhotometricInterpretation, SampleFormat, Tag};
use crate::tile::TileIndex;
use crate::value::Value;

/// Tiff error kinds.
#[derive(Debug)]
pub enum TiffError {
    /// The file does not begin with a well-formed TIFF or BigTIFF header.
    HeaderError(HeaderError),

    /// The image is not formatted properly.
    FormatError(TiffFormatError),

    /// The image uses a valid TIFF feature this crate does not implement.
    UnsupportedError(TiffUnsupportedError),

    /// A compression code could not be dispatched or a codec misbehaved.
    CodecError(CodecError),

    /// A requested region or tile lies outside the image or array bounds.
    RangeError { request: String },

    /// Computed byte sizes exceed addressable limits, or an IFD would land
    /// beyond the classic 32-bit offset range without BigTIFF.
    TooLargeImage { bytes: u64 },

    /// An I/O Error occurred while reading or writing the file.
    IoError(io::Error),

    /// An integer conversion to or from a platform size failed.
    IntSizeError,

    /// The operation is incompatible with the current object state.
    UsageError(UsageError),
}

/// The file does not begin with a readable TIFF header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeaderError {
    SignatureNotFound,
    MagicInvalid(u16),
    BigTiffOffsetSize(u16),
    BigTiffPadding(u16),
}

impl fmt::Display for HeaderError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::HeaderError::*;
        match *self {
            SignatureNotFound => write!(fmt, "TIFF byte order signature not found."),
            MagicInvalid(magic) => write!(fmt, "TIFF magic number {} is invalid.", magic),
            BigTiffOffsetSize(size) => {
                write!(fmt, "BigTIFF offset size {} is not 8.", size)
            }
            BigTiffPadding(value) => {
                write!(fmt, "BigTIFF header padding {} is not zero.", value)
            }
        }
    }
}

/// The image is not formatted properly.
///
/// This indicates that the encoder producing the image might behave
/// incorrectly or that the input file has been corrupted.
///
/// The list of variants may grow to incorporate errors of future features.
/// Matching against this exhaustively is not covered by interface stability
/// guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TiffFormatError {
    InvalidEntryCount(u64),
    EmptyIfdChain,
    ImageFileDirectoryNotFound(usize),
    InvalidDimensions(u32, u32),
    InvalidTag,
    InvalidTagValueType(Tag),
    RequiredTagNotFound(Tag),
    RequiredTagEmpty(Tag),
    UnknownPredictor(u16),
    UnknownPlanarConfiguration(u16),
    UnknownFillOrder(u16),
    ByteExpected(Value),
    UnsignedIntegerExpected(Value),
    SignedIntegerExpected(Value),
    AsciiExpected(Value),
    InconsistentSizesEncountered,
    InconsistentPositioning {
        actual: usize,
        expected: usize,
    },
    StripTileTagConflict,
    CycleInOffsets(u64),
    OddIfdOffset(u64),
    MissingTileData(TileIndex),
    OversizedTile {
        actual_bytes: usize,
        expected_bytes: usize,
    },
    JpegSoiMissing,
    InvalidJpegTables,
    SamplesPerPixelIsZero,
    Format(String),
}

impl fmt::Display for TiffFormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::TiffFormatError::*;
        match *self {
            InvalidEntryCount(n) => write!(fmt, "IFD entry count {} is out of range.", n),
            EmptyIfdChain => write!(fmt, "File contains no image file directory."),
            ImageFileDirectoryNotFound(index) => {
                write!(fmt, "Image file directory {} not found.", index)
            }
            InvalidDimensions(width, height) => {
                write!(fmt, "Invalid dimensions: {}x{}.", width, height)
            }
            InvalidTag => write!(fmt, "Image contains invalid tag."),
            InvalidTagValueType(ref tag) => {
                write!(fmt, "Tag `{:?}` did not have the expected value type.", tag)
            }
            RequiredTagNotFound(ref tag) => write!(fmt, "Required tag `{:?}` not found.", tag),
            RequiredTagEmpty(ref tag) => write!(fmt, "Required tag `{:?}` was empty.", tag),
            UnknownPredictor(p) => write!(fmt, "Unknown predictor “{}” encountered", p),
            UnknownPlanarConfiguration(p) => {
                write!(fmt, "Unknown planar configuration “{}” encountered", p)
            }
            UnknownFillOrder(f) => write!(fmt, "Unknown fill order “{}” encountered", f),
            ByteExpected(ref val) => write!(fmt, "Expected byte, {:?} found.", val),
            UnsignedIntegerExpected(ref val) => {
                write!(fmt, "Expected unsigned integer, {:?} found.", val)
            }
            SignedIntegerExpected(ref val) => {
                write!(fmt, "Expected signed integer, {:?} found.", val)
            }
            AsciiExpected(ref val) => write!(fmt, "Expected ASCII text, {:?} found.", val),
            InconsistentSizesEncountered => write!(fmt, "Inconsistent sizes encountered."),
            InconsistentPositioning { actual, expected } => write!(
                fmt,
                "Tile positioning arrays hold {} entries, the tile grid needs {}.",
                actual, expected
            ),
            StripTileTagConflict => write!(fmt, "File should contain either (StripByteCounts and StripOffsets) or (TileByteCounts and TileOffsets), other combination was found."),
            CycleInOffsets(offset) => {
                write!(fmt, "IFD chain revisits offset {}; file contains a cycle.", offset)
            }
            OddIfdOffset(offset) => {
                write!(fmt, "IFD cannot be written at odd offset {}.", offset)
            }
            MissingTileData(ref index) => write!(
                fmt,
                "Tile (plane {}, {}, {}) has a zero offset or byte count.",
                index.plane, index.x, index.y
            ),
            OversizedTile {
                actual_bytes,
                expected_bytes,
            } => write!(
                fmt,
                "Decoded tile holds {} bytes but the tile geometry allows only {}.",
                actual_bytes, expected_bytes
            ),
            JpegSoiMissing => write!(fmt, "JPEG tile data does not begin with an SOI marker."),
            InvalidJpegTables => write!(fmt, "JPEGTables value is not a valid table stream."),
            SamplesPerPixelIsZero => write!(fmt, "Samples per pixel is zero"),
            Format(ref val) => write!(fmt, "Invalid format: {:?}.", val),
        }
    }
}

/// The crate does not support features required by the image.
///
/// This only captures known failures for which the standard either does not
/// require support or an implementation has been planned but not yet
/// completed.
///
/// The list of variants may grow. Matching against this exhaustively is not
/// covered by interface stability guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TiffUnsupportedError {
    FloatingPointPredictor,
    HorizontalPredictorWithBits(Vec<u16>),
    InconsistentBytesPerSample(Vec<u16>),
    UnknownInterpretation(u16),
    UnsupportedInterpretation(PhotometricInterpretation),
    UnsupportedSampleFormat(Vec<SampleFormat>),
    MixedSampleFormat(Vec<SampleFormat>),
    UnsupportedBitsPerChannel(u16),
    TooManyChannels(u16),
    YcbcrWithPlanarConfig,
    YcbcrWithBits(Vec<u16>),
    YcbcrSubsampling(u32, u32),
    JpegChannelCount(u16),
    PaletteWithoutColorMap,
    UnsupportedCompressionMethod(CompressionMethod),
    TileSizeNotMultipleOf16(u32, u32),
}

impl fmt::Display for TiffUnsupportedError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::TiffUnsupportedError::*;
        match *self {
            FloatingPointPredictor => {
                write!(fmt, "The floating point predictor is unsupported.")
            }
            HorizontalPredictorWithBits(ref bits) => write!(
                fmt,
                "The horizontal predictor is unsupported for {:?} bits per sample.",
                bits
            ),
            InconsistentBytesPerSample(ref bits) => write!(
                fmt,
                "Samples of {:?} bits do not share one byte width.",
                bits
            ),
            UnknownInterpretation(code) => write!(
                fmt,
                "The image is using an unknown photometric interpretation ({}).",
                code
            ),
            UnsupportedInterpretation(interpretation) => write!(
                fmt,
                "Unsupported photometric interpretation \"{:?}\".",
                interpretation
            ),
            UnsupportedSampleFormat(ref formats) => {
                write!(fmt, "Sample format {:?} is unsupported.", formats)
            }
            MixedSampleFormat(ref formats) => {
                write!(fmt, "Mixed sample formats {:?} are unsupported.", formats)
            }
            UnsupportedBitsPerChannel(bits) => {
                write!(fmt, "{} bits per channel not supported", bits)
            }
            TooManyChannels(samples) => {
                write!(fmt, "{} samples per pixel is unsupported.", samples)
            }
            YcbcrWithPlanarConfig => {
                write!(fmt, "YCbCr with planar-separated samples is unsupported.")
            }
            YcbcrWithBits(ref bits) => {
                write!(fmt, "YCbCr with {:?} bits per sample is unsupported.", bits)
            }
            YcbcrSubsampling(x, y) => {
                write!(fmt, "YCbCr subsampling {}x{} is unsupported.", x, y)
            }
            JpegChannelCount(samples) => {
                write!(fmt, "JPEG compression with {} channels is unsupported.", samples)
            }
            PaletteWithoutColorMap => {
                write!(fmt, "Palette photometric without a color map is unsupported.")
            }
            UnsupportedCompressionMethod(method) => {
                write!(fmt, "Compression method {:?} is unsupported", method)
            }
            TileSizeNotMultipleOf16(w, l) => {
                write!(fmt, "Tile size {}x{} is not a multiple of 16.", w, l)
            }
        }
    }
}

/// A compression code could not be dispatched, or a codec produced data the
/// tile geometry cannot accept.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    UnknownCompressionCode(u16),
    EncodingUnsupported(u16),
    WrongDecodedSize {
        actual_bytes: usize,
        expected_bytes: usize,
    },
    Decode(String),
    Encode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::CodecError::*;
        match *self {
            UnknownCompressionCode(code) => {
                write!(fmt, "No codec is registered for compression code {}.", code)
            }
            EncodingUnsupported(code) => {
                write!(fmt, "Encoding for compression code {} is unsupported.", code)
            }
            WrongDecodedSize {
                actual_bytes,
                expected_bytes,
            } => write!(
                fmt,
                "Codec returned {} bytes, expected {}.",
                actual_bytes, expected_bytes
            ),
            Decode(ref message) => write!(fmt, "Decoding failed: {}", message),
            Encode(ref message) => write!(fmt, "Encoding failed: {}", message),
        }
    }
}

/// User attempted an operation that is incompatible with the current state of
/// the directory, map or tile.
///
/// For example: mutating a frozen IFD, or reading a disposed tile buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UsageError {
    IfdFrozen(Tag),
    IfdNotFrozen,
    IfdNotEmitted,
    TileDisposed(TileIndex),
    MapNotResizable,
    HeaderAlreadyWritten,
    ImageNotFinished,
}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::UsageError::*;
        match *self {
            IfdFrozen(ref tag) => {
                write!(fmt, "Tag `{:?}` cannot be changed on a frozen IFD.", tag)
            }
            IfdNotFrozen => write!(fmt, "The IFD must be frozen before this operation."),
            IfdNotEmitted => write!(fmt, "The IFD has not been written to the file yet."),
            TileDisposed(ref index) => write!(
                fmt,
                "Tile (plane {}, {}, {}) buffers were disposed and cannot be read.",
                index.plane, index.x, index.y
            ),
            MapNotResizable => write!(fmt, "The tile map has a fixed grid."),
            HeaderAlreadyWritten => write!(fmt, "The file header has already been written."),
            ImageNotFinished => write!(fmt, "The previous image has not been finished."),
        }
    }
}

impl fmt::Display for TiffError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TiffError::HeaderError(ref e) => write!(fmt, "Header error: {}", e),
            TiffError::FormatError(ref e) => write!(fmt, "Format error: {}", e),
            TiffError::UnsupportedError(ref f) => {
                write!(fmt, "The codec does not support the image format `{}`", f)
            }
            TiffError::CodecError(ref e) => write!(fmt, "Codec error: {}", e),
            TiffError::RangeError { ref request } => {
                write!(fmt, "Requested region is out of bounds: {}", request)
            }
            TiffError::TooLargeImage { bytes } => {
                write!(fmt, "Image too large, {} bytes exceed the addressable range", bytes)
            }
            TiffError::IoError(ref e) => e.fmt(fmt),
            TiffError::IntSizeError => write!(fmt, "Platform or format size limits exceeded"),
            TiffError::UsageError(ref e) => write!(fmt, "Usage error: {}", e),
        }
    }
}

impl Error for TiffError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            TiffError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TiffError {
    fn from(err: io::Error) -> TiffError {
        TiffError::IoError(err)
    }
}

impl From<str::Utf8Error> for TiffError {
    fn from(_err: str::Utf8Error) -> TiffError {
        TiffError::FormatError(TiffFormatError::InvalidTag)
    }
}

impl From<string::FromUtf8Error> for TiffError {
    fn from(_err: string::FromUtf8Error) -> TiffError {
        TiffError::FormatError(TiffFormatError::InvalidTag)
    }
}

impl From<HeaderError> for TiffError {
    fn from(err: HeaderError) -> TiffError {
        TiffError::HeaderError(err)
    }
}

impl From<TiffFormatError> for TiffError {
    fn from(err: TiffFormatError) -> TiffError {
        TiffError::FormatError(err)
    }
}

impl From<TiffUnsupportedError> for TiffError {
    fn from(err: TiffUnsupportedError) -> TiffError {
        TiffError::UnsupportedError(err)
    }
}

impl From<CodecError> for TiffError {
    fn from(err: CodecError) -> TiffError {
        TiffError::CodecError(err)
    }
}

impl From<UsageError> for TiffError {
    fn from(err: UsageError) -> TiffError {
        TiffError::UsageError(err)
    }
}

impl From<std::num::TryFromIntError> for TiffError {
    fn from(_err: std::num::TryFromIntError) -> TiffError {
        TiffError::IntSizeError
    }
}

/// Result of an image decoding/encoding process
pub type TiffResult<T> = Result<T, TiffError>;
