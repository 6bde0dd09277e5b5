//! The Image File Directory model: tag map, derived metadata and wire codec

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, Write};

use crate::stream::{ByteOrder, EndianReader, EndianWriter};
use crate::tags::{
    CompressionMethod, FillOrder, IfdPointer, PhotometricInterpretation, PlanarConfiguration,
    Predictor, SampleFormat, Tag, Type,
};
use crate::value::{self, Value};
use crate::{
    SampleType, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError, UsageError,
    MAX_BITS_PER_SAMPLE,
};

/// Upper bound on the entry count field; defends against corrupt counts
/// turning into absurd allocations.
const MAX_ENTRY_COUNT: u64 = 1_000_000;

/// Tags whose values are dimension-like: in BigTIFF these are written as
/// LONG rather than LONG8 when they fit, for compatibility with viewers that
/// reject 64-bit dimension fields.
const DIMENSION_TAGS: [u16; 5] = [256, 257, 278, 322, 323];

/// Lifecycle of a directory.
///
/// Once frozen, only the image dimensions and the data positioning arrays
/// may still change, through their named update methods.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IfdState {
    Loose,
    Frozen,
    EmittedPending,
    EmittedComplete,
}

#[derive(Clone, Debug)]
struct DataPositioning {
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

/// An Image File Directory (IFD): a mapping from 16-bit tag numbers to
/// values, with accessors deriving and validating the image metadata.
#[doc(alias = "IFD")]
#[derive(Debug)]
pub struct Ifd {
    /// There are at most `u16::MAX` entries in a classic directory; the
    /// order in the file is ascending by tag value, which the map preserves.
    entries: BTreeMap<u16, Value>,
    byte_order: ByteOrder,
    big_tiff: bool,
    state: IfdState,
    pub(crate) file_offset_for_reading: Option<u64>,
    pub(crate) file_offset_for_writing: Option<u64>,
    pub(crate) next_ifd_offset: Option<IfdPointer>,
    pub(crate) sub_ifd_type: Option<u32>,
    positioning: RefCell<Option<DataPositioning>>,
}

impl Clone for Ifd {
    fn clone(&self) -> Self {
        Ifd {
            entries: self.entries.clone(),
            byte_order: self.byte_order,
            big_tiff: self.big_tiff,
            state: self.state,
            file_offset_for_reading: self.file_offset_for_reading,
            file_offset_for_writing: self.file_offset_for_writing,
            next_ifd_offset: self.next_ifd_offset,
            sub_ifd_type: self.sub_ifd_type,
            positioning: RefCell::new(self.positioning.borrow().clone()),
        }
    }
}

/// Bookkeeping returned by [`Ifd::emit`]: where the directory landed and
/// which file positions can later be patched in place.
#[derive(Debug, Clone)]
pub struct EmittedIfd {
    /// File offset of the directory start (always even).
    pub offset: u64,
    /// File position of the next-IFD pointer slot of this directory.
    pub next_slot_position: u64,
    /// First offset past the directory and its out-of-line values.
    pub end: u64,
    /// File position of every entry's value block: the inline payload field
    /// for short values, the out-of-line block for long ones.
    pub value_positions: HashMap<u16, u64>,
}

impl Ifd {
    pub fn new(byte_order: ByteOrder, big_tiff: bool) -> Ifd {
        Ifd {
            entries: BTreeMap::new(),
            byte_order,
            big_tiff,
            state: IfdState::Loose,
            file_offset_for_reading: None,
            file_offset_for_writing: None,
            next_ifd_offset: None,
            sub_ifd_type: None,
            positioning: RefCell::new(None),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_big_tiff(&self) -> bool {
        self.big_tiff
    }

    pub fn state(&self) -> IfdState {
        self.state
    }

    /// Retrieve the value associated with a tag.
    pub fn get(&self, tag: Tag) -> Option<&Value> {
        self.entries.get(&tag.to_u16())
    }

    /// Check if the directory contains a specified tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag.to_u16())
    }

    /// Iterate over all known and unknown tags in this directory.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, &Value)> + '_ {
        self.entries
            .iter()
            .map(|(k, v)| (Tag::from_u16_exhaustive(*k), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Associate a tag with a value. Rejected once the directory is frozen;
    /// use the named update methods for the post-freeze window.
    pub fn set(&mut self, tag: Tag, value: Value) -> TiffResult<()> {
        if self.state != IfdState::Loose {
            return Err(TiffError::UsageError(UsageError::IfdFrozen(tag)));
        }
        self.entries.insert(tag.to_u16(), value);
        self.clear_cache();
        Ok(())
    }

    pub fn remove(&mut self, tag: Tag) -> TiffResult<Option<Value>> {
        if self.state != IfdState::Loose {
            return Err(TiffError::UsageError(UsageError::IfdFrozen(tag)));
        }
        let removed = self.entries.remove(&tag.to_u16());
        self.clear_cache();
        Ok(removed)
    }

    /// Get the pointer to the next IFD, if there is one.
    pub fn next_ifd(&self) -> Option<IfdPointer> {
        self.next_ifd_offset
    }

    /// Where this directory was parsed from, if it came from a file.
    pub fn file_offset_for_reading(&self) -> Option<u64> {
        self.file_offset_for_reading
    }

    /// Where this directory was emitted, once it has been.
    pub fn file_offset_for_writing(&self) -> Option<u64> {
        self.file_offset_for_writing
    }

    /// The `NewSubfileType` of a directory found through a `SubIFDs` tag.
    pub fn sub_ifd_type(&self) -> Option<u32> {
        self.sub_ifd_type
    }

    /// Marks the directory ready for writing. Afterwards only
    /// [`Ifd::update_image_dimensions`] and [`Ifd::update_data_positioning`]
    /// may mutate it.
    pub fn freeze(&mut self) {
        if self.state == IfdState::Loose {
            self.state = IfdState::Frozen;
        }
    }

    /// Part of the post-freeze update window: resizable maps learn their
    /// final extent only when writing completes.
    pub fn update_image_dimensions(&mut self, width: u32, height: u32) -> TiffResult<()> {
        if self.state == IfdState::EmittedComplete {
            return Err(TiffError::UsageError(UsageError::IfdFrozen(
                Tag::ImageWidth,
            )));
        }
        validate_dimensions(width, height)?;
        self.entries.insert(Tag::ImageWidth.to_u16(), Value::longs(&[width]));
        self.entries
            .insert(Tag::ImageLength.to_u16(), Value::longs(&[height]));
        self.clear_cache();
        Ok(())
    }

    /// Part of the post-freeze update window: the writer patches tile
    /// offsets and byte counts once the payload positions are known.
    pub fn update_data_positioning(
        &mut self,
        offsets: &[u64],
        byte_counts: &[u64],
    ) -> TiffResult<()> {
        if self.state == IfdState::EmittedComplete {
            return Err(TiffError::UsageError(UsageError::IfdFrozen(
                Tag::TileOffsets,
            )));
        }
        let (offsets_tag, counts_tag) = if self.is_tiled()? {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        let offsets_value = self.positioning_value(offsets)?;
        let counts_value = self.positioning_value(byte_counts)?;
        self.entries.insert(offsets_tag.to_u16(), offsets_value);
        self.entries.insert(counts_tag.to_u16(), counts_value);
        self.clear_cache();
        Ok(())
    }

    fn positioning_value(&self, values: &[u64]) -> TiffResult<Value> {
        if self.big_tiff {
            Ok(Value::long8s(values))
        } else {
            let narrow: Vec<u32> = values
                .iter()
                .map(|&v| {
                    u32::try_from(v).map_err(|_| TiffError::TooLargeImage { bytes: v })
                })
                .collect::<TiffResult<_>>()?;
            Ok(Value::longs(&narrow))
        }
    }

    pub(crate) fn complete_writing(&mut self) -> TiffResult<()> {
        if self.state != IfdState::EmittedPending {
            return Err(TiffError::UsageError(UsageError::IfdNotEmitted));
        }
        self.state = IfdState::EmittedComplete;
        Ok(())
    }

    fn clear_cache(&self) {
        *self.positioning.borrow_mut() = None;
    }

    //
    // # Derived metadata
    //

    fn require(&self, tag: Tag) -> TiffResult<Value> {
        self.get(tag)
            .cloned()
            .ok_or_else(|| TiffError::FormatError(TiffFormatError::RequiredTagNotFound(tag)))
    }

    fn find_u16(&self, tag: Tag) -> TiffResult<Option<u16>> {
        self.get(tag).cloned().map(Value::into_u16).transpose()
    }

    fn find_u32(&self, tag: Tag) -> TiffResult<Option<u32>> {
        self.get(tag).cloned().map(Value::into_u32).transpose()
    }

    pub fn image_width(&self) -> TiffResult<u32> {
        let width = self.require(Tag::ImageWidth)?.into_u32()?;
        let height = self.require(Tag::ImageLength)?.into_u32()?;
        validate_dimensions(width, height)?;
        Ok(width)
    }

    pub fn image_height(&self) -> TiffResult<u32> {
        let width = self.require(Tag::ImageWidth)?.into_u32()?;
        let height = self.require(Tag::ImageLength)?.into_u32()?;
        validate_dimensions(width, height)?;
        Ok(height)
    }

    pub fn samples_per_pixel(&self) -> TiffResult<u16> {
        let samples = self.find_u16(Tag::SamplesPerPixel)?.unwrap_or(1);
        if samples == 0 {
            return Err(TiffFormatError::SamplesPerPixelIsZero.into());
        }
        Ok(samples)
    }

    /// Bits per sample, one entry per channel.
    ///
    /// Like libtiff we accept a single value applying to all channels and
    /// expand it.
    pub fn bits_per_sample(&self) -> TiffResult<Vec<u16>> {
        let samples = self.samples_per_pixel()?;
        let bits = match self.get(Tag::BitsPerSample) {
            Some(value) => value.clone().into_u16_vec()?,
            None => vec![1],
        };
        if bits.iter().any(|&b| b == 0 || b > MAX_BITS_PER_SAMPLE) {
            return Err(TiffUnsupportedError::UnsupportedBitsPerChannel(
                bits.iter().copied().max().unwrap_or(0),
            )
            .into());
        }
        match bits.len() {
            n if n == usize::from(samples) => Ok(bits),
            1 => Ok(vec![bits[0]; usize::from(samples)]),
            _ => Err(TiffError::FormatError(
                TiffFormatError::InconsistentSizesEncountered,
            )),
        }
    }

    /// The shared per-channel byte width `ceil(bits / 8)`.
    ///
    /// Channels of unequal byte width are a hard unsupported case for the
    /// whole pipeline.
    pub fn bytes_per_sample(&self) -> TiffResult<u32> {
        let bits = self.bits_per_sample()?;
        let first = u32::from(bits[0]).div_ceil(8);
        if bits.iter().any(|&b| u32::from(b).div_ceil(8) != first) {
            return Err(TiffUnsupportedError::InconsistentBytesPerSample(bits).into());
        }
        Ok(first)
    }

    /// Bit depth after alignment to whole bytes. The pure binary case (one
    /// channel of one bit) stays at 1.
    pub fn aligned_bit_depth(&self) -> TiffResult<u32> {
        let bits = self.bits_per_sample()?;
        if bits == [1] {
            return Ok(1);
        }
        Ok(self.bytes_per_sample()? * 8)
    }

    pub fn sample_format(&self) -> TiffResult<SampleFormat> {
        let formats = match self.get(Tag::SampleFormat) {
            Some(value) => value
                .clone()
                .into_u16_vec()?
                .into_iter()
                .map(SampleFormat::from_u16_exhaustive)
                .collect::<Vec<_>>(),
            None => return Ok(SampleFormat::Uint),
        };
        if formats.is_empty() {
            return Err(TiffError::FormatError(TiffFormatError::RequiredTagEmpty(
                Tag::SampleFormat,
            )));
        }
        if formats.windows(2).any(|s| s[0] != s[1]) {
            return Err(TiffUnsupportedError::MixedSampleFormat(formats).into());
        }
        Ok(formats[0])
    }

    /// The in-memory sample representation, promoting sub-byte widths.
    pub fn sample_type(&self) -> TiffResult<SampleType> {
        let bits = self.bits_per_sample()?;
        let bytes = self.bytes_per_sample()?;
        let max_bits = bits.iter().copied().max().unwrap();
        let unsupported =
            || TiffError::from(TiffUnsupportedError::UnsupportedBitsPerChannel(max_bits));

        match self.sample_format()? {
            SampleFormat::Uint | SampleFormat::Void => {
                if bits == [1] {
                    return Ok(SampleType::Bit);
                }
                match bytes {
                    1 => Ok(SampleType::U8),
                    2 => Ok(SampleType::U16),
                    3 | 4 => Ok(SampleType::U32),
                    _ => Err(unsupported()),
                }
            }
            SampleFormat::Int => match bytes {
                1 => Ok(SampleType::I8),
                2 => Ok(SampleType::I16),
                3 | 4 => Ok(SampleType::I32),
                _ => Err(unsupported()),
            },
            SampleFormat::IEEEFP => match max_bits {
                16 | 24 | 32 => Ok(SampleType::F32),
                64 => Ok(SampleType::F64),
                _ => Err(unsupported()),
            },
            format => Err(TiffUnsupportedError::UnsupportedSampleFormat(vec![format]).into()),
        }
    }

    pub fn compression(&self) -> TiffResult<CompressionMethod> {
        Ok(match self.find_u16(Tag::Compression)? {
            Some(code) => CompressionMethod::from_u16_exhaustive(code),
            None => CompressionMethod::None,
        })
    }

    pub fn photometric(&self) -> TiffResult<PhotometricInterpretation> {
        match self.find_u16(Tag::PhotometricInterpretation)? {
            // Absent in some real-world grayscale files; assume the darker-
            // is-smaller convention like libtiff does.
            None => Ok(PhotometricInterpretation::BlackIsZero),
            Some(code) => PhotometricInterpretation::from_u16(code)
                .ok_or_else(|| TiffUnsupportedError::UnknownInterpretation(code).into()),
        }
    }

    pub fn planar_config(&self) -> TiffResult<PlanarConfiguration> {
        match self.find_u16(Tag::PlanarConfiguration)? {
            None => Ok(PlanarConfiguration::Chunky),
            Some(code) => PlanarConfiguration::from_u16(code).ok_or_else(|| {
                TiffError::FormatError(TiffFormatError::UnknownPlanarConfiguration(code))
            }),
        }
    }

    pub fn predictor(&self) -> TiffResult<Predictor> {
        match self.find_u16(Tag::Predictor)? {
            None => Ok(Predictor::None),
            Some(code) => Predictor::from_u16(code)
                .ok_or_else(|| TiffError::FormatError(TiffFormatError::UnknownPredictor(code))),
        }
    }

    pub fn fill_order(&self) -> TiffResult<FillOrder> {
        match self.find_u16(Tag::FillOrder)? {
            None => Ok(FillOrder::Normal),
            Some(code) => FillOrder::from_u16(code)
                .ok_or_else(|| TiffError::FormatError(TiffFormatError::UnknownFillOrder(code))),
        }
    }

    pub fn rows_per_strip(&self) -> TiffResult<u32> {
        match self.find_u32(Tag::RowsPerStrip)? {
            Some(0) => Err(TiffError::FormatError(TiffFormatError::RequiredTagEmpty(
                Tag::RowsPerStrip,
            ))),
            Some(rows) => Ok(rows),
            None => self.image_height(),
        }
    }

    /// Whether the image uses the tile geometry. `TileWidth` and
    /// `TileLength` must appear together.
    pub fn is_tiled(&self) -> TiffResult<bool> {
        match (
            self.contains(Tag::TileWidth),
            self.contains(Tag::TileLength),
        ) {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            _ => Err(TiffError::FormatError(
                TiffFormatError::InconsistentSizesEncountered,
            )),
        }
    }

    /// Width of one tile. A strip is a full-image-width tile.
    pub fn tile_width(&self) -> TiffResult<u32> {
        if self.is_tiled()? {
            match self.find_u32(Tag::TileWidth)? {
                Some(0) | None => Err(TiffError::FormatError(
                    TiffFormatError::RequiredTagEmpty(Tag::TileWidth),
                )),
                Some(width) => Ok(width),
            }
        } else {
            self.image_width()
        }
    }

    /// Height of one tile; `RowsPerStrip` for strip images.
    pub fn tile_length(&self) -> TiffResult<u32> {
        if self.is_tiled()? {
            match self.find_u32(Tag::TileLength)? {
                Some(0) | None => Err(TiffError::FormatError(
                    TiffFormatError::RequiredTagEmpty(Tag::TileLength),
                )),
                Some(length) => Ok(length),
            }
        } else {
            self.rows_per_strip()
        }
    }

    pub fn tile_count_x(&self) -> TiffResult<u32> {
        Ok(self.image_width()?.div_ceil(self.tile_width()?))
    }

    pub fn tile_count_y(&self) -> TiffResult<u32> {
        Ok(self.image_height()?.div_ceil(self.tile_length()?))
    }

    /// Number of separately stored planes: 1 for chunked images, the channel
    /// count for planar-separated ones.
    pub fn planes(&self) -> TiffResult<u16> {
        Ok(match self.planar_config()? {
            PlanarConfiguration::Chunky => 1,
            PlanarConfiguration::Planar => self.samples_per_pixel()?,
        })
    }

    /// Channels stored within one tile.
    pub fn samples_per_tile(&self) -> TiffResult<u16> {
        Ok(match self.planar_config()? {
            PlanarConfiguration::Chunky => self.samples_per_pixel()?,
            PlanarConfiguration::Planar => 1,
        })
    }

    /// Expected length of the positioning arrays.
    pub fn tile_count(&self) -> TiffResult<usize> {
        let per_plane = usize::try_from(self.tile_count_x()?)?
            .checked_mul(usize::try_from(self.tile_count_y()?)?)
            .ok_or(TiffError::IntSizeError)?;
        per_plane
            .checked_mul(usize::from(self.planes()?))
            .ok_or(TiffError::IntSizeError)
    }

    fn positioning_tags(&self) -> TiffResult<(Tag, Tag)> {
        let has_strip =
            self.contains(Tag::StripOffsets) || self.contains(Tag::StripByteCounts);
        let has_tile = self.contains(Tag::TileOffsets) || self.contains(Tag::TileByteCounts);
        match (has_strip, has_tile) {
            (true, true) => Err(TiffError::FormatError(
                TiffFormatError::StripTileTagConflict,
            )),
            (_, true) => Ok((Tag::TileOffsets, Tag::TileByteCounts)),
            _ => Ok((Tag::StripOffsets, Tag::StripByteCounts)),
        }
    }

    fn compute_positioning(&self) -> TiffResult<DataPositioning> {
        let (offsets_tag, counts_tag) = self.positioning_tags()?;
        let offsets = self.require(offsets_tag)?.into_u64_vec()?;
        let byte_counts = self.require(counts_tag)?.into_u64_vec()?;
        let expected = self.tile_count()?;
        if offsets.len() != byte_counts.len() || offsets.len() != expected {
            return Err(TiffError::FormatError(
                TiffFormatError::InconsistentPositioning {
                    actual: offsets.len().min(byte_counts.len()),
                    expected,
                },
            ));
        }
        Ok(DataPositioning {
            offsets,
            byte_counts,
        })
    }

    fn positioning(&self) -> TiffResult<DataPositioning> {
        if let Some(cached) = self.positioning.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let computed = self.compute_positioning()?;
        *self.positioning.borrow_mut() = Some(computed.clone());
        Ok(computed)
    }

    /// File offsets of all tiles, in linear index order. Memoized; the cache
    /// is cleared by any tag mutation.
    pub fn tile_offsets(&self) -> TiffResult<Vec<u64>> {
        Ok(self.positioning()?.offsets)
    }

    /// Stored byte counts of all tiles, in linear index order. Memoized like
    /// [`Ifd::tile_offsets`].
    pub fn tile_byte_counts(&self) -> TiffResult<Vec<u64>> {
        Ok(self.positioning()?.byte_counts)
    }

    //
    // # YCbCr parameters
    //

    /// Chroma subsampling factors (horizontal, vertical), default (2, 2).
    pub fn ycbcr_subsampling(&self) -> TiffResult<(u32, u32)> {
        let (sub_x, sub_y) = match self.get(Tag::YCbCrSubSampling) {
            None => (2, 2),
            Some(value) => {
                let factors = value.clone().into_u32_vec()?;
                match factors.as_slice() {
                    [x, y] => (*x, *y),
                    _ => {
                        return Err(TiffError::FormatError(
                            TiffFormatError::InvalidTagValueType(Tag::YCbCrSubSampling),
                        ))
                    }
                }
            }
        };
        if !matches!(sub_x, 1 | 2 | 4) || !matches!(sub_y, 1 | 2 | 4) {
            return Err(TiffUnsupportedError::YcbcrSubsampling(sub_x, sub_y).into());
        }
        Ok((sub_x, sub_y))
    }

    /// Luma coefficients (R, G, B), default ITU-R BT.601.
    pub fn ycbcr_coefficients(&self) -> TiffResult<[f32; 3]> {
        match self.get(Tag::YCbCrCoefficients) {
            None => Ok([0.299, 0.587, 0.114]),
            Some(value) => {
                let coefficients = value.clone().into_f32_vec()?;
                match coefficients.as_slice() {
                    [r, g, b] => Ok([*r, *g, *b]),
                    _ => Err(TiffError::FormatError(
                        TiffFormatError::InvalidTagValueType(Tag::YCbCrCoefficients),
                    )),
                }
            }
        }
    }

    /// Reference black/white pairs for Y, Cb and Cr.
    pub fn reference_black_white(&self) -> TiffResult<[f32; 6]> {
        match self.get(Tag::ReferenceBlackWhite) {
            None => Ok([0.0, 255.0, 128.0, 255.0, 128.0, 255.0]),
            Some(value) => {
                let levels = value.clone().into_f32_vec()?;
                <[f32; 6]>::try_from(levels.as_slice()).map_err(|_| {
                    TiffError::FormatError(TiffFormatError::InvalidTagValueType(
                        Tag::ReferenceBlackWhite,
                    ))
                })
            }
        }
    }

    /// The raw JPEGTables stream, shared by all tiles of the image.
    pub fn jpeg_tables(&self) -> TiffResult<Option<Vec<u8>>> {
        match self.get(Tag::JPEGTables) {
            None => Ok(None),
            Some(value) => {
                let tables = value.clone().into_u8_vec()?;
                if tables.len() < 4 {
                    return Err(TiffError::FormatError(TiffFormatError::InvalidJpegTables));
                }
                Ok(Some(tables))
            }
        }
    }

    /// Offsets of subsidiary directories from the `SubIFDs` tag.
    pub fn sub_ifd_pointers(&self) -> TiffResult<Vec<IfdPointer>> {
        match self.get(Tag::SubIfd) {
            None => Ok(Vec::new()),
            Some(value) => value.clone().into_ifd_pointers(),
        }
    }

    //
    // # Wire codec
    //

    /// Reads the directory at `offset`. Odd offsets are tolerated on read
    /// for compatibility; duplicated tags keep the first value.
    pub fn parse<R: Read + Seek>(
        reader: &mut EndianReader<R>,
        offset: IfdPointer,
        big_tiff: bool,
    ) -> TiffResult<Ifd> {
        reader.goto_offset(offset.0)?;

        let entry_count = if big_tiff {
            reader.read_u64()?
        } else {
            u64::from(reader.read_u16()?)
        };
        if entry_count == 0 || entry_count > MAX_ENTRY_COUNT {
            return Err(TiffError::FormatError(TiffFormatError::InvalidEntryCount(
                entry_count,
            )));
        }

        let mut raw_entries = Vec::with_capacity(usize::try_from(entry_count)?);
        for _ in 0..entry_count {
            raw_entries.push(value::read_entry(reader, big_tiff)?);
        }
        let next = if big_tiff {
            reader.read_u64()?
        } else {
            u64::from(reader.read_u32()?)
        };

        let mut ifd = Ifd::new(reader.byte_order(), big_tiff);
        for raw in &raw_entries {
            // A tag appearing twice is accepted, the first value wins.
            if ifd.entries.contains_key(&raw.tag) {
                continue;
            }
            let decoded = value::decode_entry(reader, raw)?;
            ifd.entries.insert(raw.tag, decoded);
        }
        ifd.file_offset_for_reading = Some(offset.0);
        ifd.next_ifd_offset = if next == 0 {
            None
        } else {
            Some(IfdPointer(next))
        };
        Ok(ifd)
    }

    /// Writes the directory at the writer's current position, which must be
    /// even. Values exceeding the inline capacity are gathered into an extra
    /// block following the entry table, each aligned to an even offset.
    pub fn emit<W: Write + Seek>(
        &mut self,
        writer: &mut EndianWriter<W>,
    ) -> TiffResult<EmittedIfd> {
        if self.state == IfdState::Loose {
            return Err(TiffError::UsageError(UsageError::IfdNotFrozen));
        }
        let start = writer.offset();
        if start % 2 != 0 {
            return Err(TiffError::FormatError(TiffFormatError::OddIfdOffset(
                start,
            )));
        }

        let big_tiff = self.big_tiff;
        let inline_capacity: usize = if big_tiff { 8 } else { 4 };
        let entry_size: u64 = if big_tiff { 20 } else { 12 };
        let count_size: u64 = if big_tiff { 8 } else { 2 };
        let pointer_size: u64 = if big_tiff { 8 } else { 4 };

        let mut wires = Vec::with_capacity(self.entries.len());
        for (&tag, entry_value) in &self.entries {
            let mut wire = entry_value.encode(self.byte_order)?;
            narrow_wire(tag, &mut wire, big_tiff, self.byte_order)?;
            wires.push((tag, wire));
        }

        if !big_tiff && wires.len() > usize::from(u16::MAX) {
            return Err(TiffError::FormatError(TiffFormatError::InvalidEntryCount(
                wires.len() as u64,
            )));
        }

        let table_len = count_size + wires.len() as u64 * entry_size + pointer_size;
        let mut extra_cursor = start + table_len;
        let mut value_positions = HashMap::new();
        let mut extra_blocks: Vec<(u64, Vec<u8>)> = Vec::new();
        // payload per entry: inline data or the absolute offset of its block
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(wires.len());

        for (index, (tag, wire)) in wires.iter().enumerate() {
            let field_position =
                start + count_size + index as u64 * entry_size + 2 + 2 + (entry_size - 4 - pointer_size);
            if wire.data.len() <= inline_capacity || wire.verbatim_payload {
                let mut payload = wire.data.clone();
                payload.resize(inline_capacity, 0);
                value_positions.insert(*tag, field_position);
                payloads.push(payload);
            } else {
                if extra_cursor % 2 != 0 {
                    extra_cursor += 1;
                }
                value_positions.insert(*tag, extra_cursor);
                payloads.push(offset_payload(extra_cursor, big_tiff, self.byte_order)?);
                extra_blocks.push((extra_cursor, wire.data.clone()));
                extra_cursor += wire.data.len() as u64;
            }
        }

        if big_tiff {
            writer.write_u64(wires.len() as u64)?;
        } else {
            writer.write_u16(wires.len() as u16)?;
        }
        for ((tag, wire), payload) in wires.iter().zip(&payloads) {
            writer.write_u16(*tag)?;
            writer.write_u16(wire.type_code)?;
            if big_tiff {
                writer.write_u64(wire.count)?;
            } else {
                writer.write_u32(u32::try_from(wire.count)?)?;
            }
            writer.write_bytes(payload)?;
        }

        let next_slot_position = writer.offset();
        let next = self.next_ifd_offset.map_or(0, |p| p.0);
        if big_tiff {
            writer.write_u64(next)?;
        } else {
            writer.write_u32(u32::try_from(next)?)?;
        }

        for (block_offset, data) in &extra_blocks {
            while writer.offset() < *block_offset {
                writer.write_u8(0)?;
            }
            writer.write_bytes(data)?;
        }

        self.state = IfdState::EmittedPending;
        self.file_offset_for_writing = Some(start);
        Ok(EmittedIfd {
            offset: start,
            next_slot_position,
            end: writer.offset(),
            value_positions,
        })
    }
}

fn validate_dimensions(width: u32, height: u32) -> TiffResult<()> {
    if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
        return Err(TiffError::FormatError(TiffFormatError::InvalidDimensions(
            width, height,
        )));
    }
    Ok(())
}

fn offset_payload(offset: u64, big_tiff: bool, byte_order: ByteOrder) -> TiffResult<Vec<u8>> {
    if big_tiff {
        Ok(match byte_order {
            ByteOrder::LittleEndian => offset.to_le_bytes().to_vec(),
            ByteOrder::BigEndian => offset.to_be_bytes().to_vec(),
        })
    } else {
        let narrow =
            u32::try_from(offset).map_err(|_| TiffError::TooLargeImage { bytes: offset })?;
        Ok(match byte_order {
            ByteOrder::LittleEndian => narrow.to_le_bytes().to_vec(),
            ByteOrder::BigEndian => narrow.to_be_bytes().to_vec(),
        })
    }
}

/// LONG8 values that fit 32 bits are rewritten as LONG: always in classic
/// files (where LONG8 is not representable at all), and for dimension-like
/// tags in BigTIFF so existing viewers keep working.
fn narrow_wire(
    tag: u16,
    wire: &mut crate::value::WireValue,
    big_tiff: bool,
    byte_order: ByteOrder,
) -> TiffResult<()> {
    if wire.verbatim_payload || wire.type_code != Type::LONG8.to_u16() {
        return Ok(());
    }
    if big_tiff && !DIMENSION_TAGS.contains(&tag) {
        return Ok(());
    }

    let mut narrow = Vec::with_capacity(wire.data.len() / 2);
    for chunk in wire.data.chunks_exact(8) {
        let wide = match byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(chunk.try_into().unwrap()),
            ByteOrder::BigEndian => u64::from_be_bytes(chunk.try_into().unwrap()),
        };
        let Ok(value) = u32::try_from(wide) else {
            if big_tiff {
                // Keep LONG8, the value genuinely needs it.
                return Ok(());
            }
            return Err(TiffError::TooLargeImage { bytes: wide });
        };
        match byte_order {
            ByteOrder::LittleEndian => narrow.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::BigEndian => narrow.extend_from_slice(&value.to_be_bytes()),
        }
    }
    wire.type_code = Type::LONG.to_u16();
    wire.data = narrow;
    Ok(())
}
