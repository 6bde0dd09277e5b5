//! Writing TIFF and BigTIFF files tile by tile

use std::collections::BTreeSet;
use std::io::{Seek, Write};

use log::{debug, trace};

use crate::codec::{CodecContext, CodecRegistry};
use crate::ifd::{EmittedIfd, Ifd};
use crate::predictor;
use crate::samples::{self, TileLayout};
use crate::stream::{ByteOrder, EndianWriter, Truncate};
use crate::tags::{
    CompressionMethod, FillOrder, PhotometricInterpretation, PlanarConfiguration, Predictor, Tag,
};
use crate::tile::{TileIndex, TileMap};
use crate::value::Value;
use crate::{
    SampleType, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError, UsageError,
    MAX_SAMPLES_PER_PIXEL,
};

/// Highest file position at which a classic (non-BigTIFF) IFD may still be
/// placed.
const CLASSIC_OFFSET_CEILING: u64 = u32::MAX as u64 - 16;

/// Encode-side configuration.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Byte order of the file. Big-endian by default, the more widely
    /// tolerated order for classic readers.
    pub byte_order: ByteOrder,
    pub big_tiff: bool,
    /// Emit the IFD before the tile payload so readers find metadata first.
    pub writing_forward_allowed: bool,
    /// Callers supply channel-separated planes and the writer interleaves;
    /// when off, tile data is taken as already interleaved.
    pub auto_interleave_source: bool,
    /// Auto-promote unsupported combinations (odd bit widths, YCbCr with
    /// non-JPEG compression, missing photometric) instead of failing.
    pub smart_ifd_correction: bool,
    /// Prefer an RGB photometric over YCbCr when filling in the photometric
    /// for JPEG images.
    pub prefer_rgb_for_jpeg: bool,
    /// Leave unwritten tiles as zero offset/count instead of materializing a
    /// shared filler tile.
    pub missing_tiles_allowed: bool,
    /// Byte value for filler pixels and the shared filler tile.
    pub byte_filler: u8,
    /// Codec-specific quality knob.
    pub quality: Option<f32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            byte_order: ByteOrder::BigEndian,
            big_tiff: false,
            writing_forward_allowed: true,
            auto_interleave_source: true,
            smart_ifd_correction: false,
            prefer_rgb_for_jpeg: false,
            missing_tiles_allowed: false,
            byte_filler: 0,
            quality: None,
        }
    }
}

/// The representation of a TIFF writer.
///
/// Like the reader, every stream-touching operation takes `&mut self`, so
/// all writes to one file are serialized.
pub struct TiffWriter<W: Write + Seek + Truncate> {
    stream: EndianWriter<W>,
    options: WriterOptions,
    /// Position of the pointer slot the next IFD offset must be patched
    /// into; the header slot until the first image lands.
    last_ifd_slot: u64,
    known_ifd_offsets: BTreeSet<u64>,
    registry: CodecRegistry,
    image_open: bool,
    cancel_check: Option<Box<dyn Fn() -> bool + Send>>,
    progress: Option<Box<dyn FnMut(usize, usize) + Send>>,
}

impl<W: Write + Seek + Truncate> TiffWriter<W> {
    /// Creates the writer and immediately writes the file header, leaving a
    /// zeroed first-IFD slot, then truncates the sink to that length.
    pub fn new(writer: W, options: WriterOptions) -> TiffResult<TiffWriter<W>> {
        let mut stream = EndianWriter::new(writer, options.byte_order)?;
        stream.goto_offset(0)?;

        match options.byte_order {
            ByteOrder::LittleEndian => stream.write_bytes(b"II")?,
            ByteOrder::BigEndian => stream.write_bytes(b"MM")?,
        }
        let last_ifd_slot;
        if options.big_tiff {
            stream.write_u16(43)?;
            // Offset byte size, then the mandatory zero pad.
            stream.write_u16(8)?;
            stream.write_u16(0)?;
            last_ifd_slot = stream.offset();
            stream.write_u64(0)?;
        } else {
            stream.write_u16(42)?;
            last_ifd_slot = stream.offset();
            stream.write_u32(0)?;
        }
        stream.truncate_here()?;

        Ok(TiffWriter {
            stream,
            options,
            last_ifd_slot,
            known_ifd_offsets: BTreeSet::new(),
            registry: CodecRegistry::default(),
            image_open: false,
            cancel_check: None,
            progress: None,
        })
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Consumes the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.stream.into_inner()
    }

    /// An empty directory matching this file's byte order and offset width.
    pub fn base_ifd(&self) -> Ifd {
        Ifd::new(self.options.byte_order, self.options.big_tiff)
    }

    /// Replaces the codec registry, e.g. to add external codecs.
    pub fn set_codec_registry(&mut self, registry: CodecRegistry) {
        self.registry = registry;
    }

    /// Predicate polled between tiles during completion; returning `true`
    /// aborts with an interrupted error. Never called mid-write.
    pub fn set_cancel_check(&mut self, check: Box<dyn Fn() -> bool + Send>) {
        self.cancel_check = Some(check);
    }

    /// Callback invoked between tiles with (done, total).
    pub fn set_progress(&mut self, progress: Box<dyn FnMut(usize, usize) + Send>) {
        self.progress = Some(progress);
    }

    /// Starts a fixed-grid image. The directory must carry the image and
    /// tile (or strip) geometry already.
    pub fn new_image(&mut self, ifd: Ifd) -> TiffResult<ImageWriter<'_, W>> {
        ImageWriter::begin(self, ifd, false)
    }

    /// Starts an image whose tile grid grows with the writes; dimensions
    /// are derived from the data extent at completion.
    pub fn new_resizable_image(&mut self, ifd: Ifd) -> TiffResult<ImageWriter<'_, W>> {
        ImageWriter::begin(self, ifd, true)
    }

    /// Writes one chunked image as a single strip in one call.
    ///
    /// `data` holds channel-separated planes under `auto_interleave_source`,
    /// interleaved samples otherwise. Returns the completed directory.
    pub fn write_image(
        &mut self,
        width: u32,
        height: u32,
        bits_per_sample: &[u16],
        photometric: PhotometricInterpretation,
        data: &[u8],
    ) -> TiffResult<Ifd> {
        let mut ifd = self.base_ifd();
        ifd.set(Tag::ImageWidth, Value::longs(&[width]))?;
        ifd.set(Tag::ImageLength, Value::longs(&[height]))?;
        ifd.set(Tag::BitsPerSample, Value::shorts(bits_per_sample))?;
        ifd.set(
            Tag::SamplesPerPixel,
            Value::shorts(&[bits_per_sample.len() as u16]),
        )?;
        ifd.set(
            Tag::PhotometricInterpretation,
            Value::shorts(&[photometric.to_u16()]),
        )?;
        ifd.set(Tag::RowsPerStrip, Value::longs(&[height]))?;

        let mut image = self.new_image(ifd)?;
        image.write_tile(TileIndex::flat(0, 0), data)?;
        image.finish()
    }

    fn check_cancelled(&self) -> TiffResult<()> {
        if let Some(check) = &self.cancel_check {
            if check() {
                return Err(TiffError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "operation cancelled",
                )));
            }
        }
        Ok(())
    }

    fn guard_classic_range(&self) -> TiffResult<()> {
        if !self.options.big_tiff && self.stream.offset() > CLASSIC_OFFSET_CEILING {
            return Err(TiffError::TooLargeImage {
                bytes: self.stream.offset(),
            });
        }
        Ok(())
    }

    /// Chains a freshly emitted IFD into the file: patches the previous
    /// last-IFD slot and remembers this directory's own slot. Refuses an
    /// offset that is already part of the chain.
    fn link_ifd(&mut self, emitted: &EmittedIfd) -> TiffResult<()> {
        if !self.known_ifd_offsets.insert(emitted.offset) {
            return Err(TiffError::FormatError(TiffFormatError::CycleInOffsets(
                emitted.offset,
            )));
        }
        let resume = self.stream.offset();
        self.stream.goto_offset(self.last_ifd_slot)?;
        if self.options.big_tiff {
            self.stream.write_u64(emitted.offset)?;
        } else {
            self.stream.write_u32(u32::try_from(emitted.offset)?)?;
        }
        self.stream.goto_offset(resume)?;
        self.last_ifd_slot = emitted.next_slot_position;
        debug!("linked IFD at {:#x}", emitted.offset);
        Ok(())
    }
}

/// Cached per-image encode parameters, fixed at [`ImageWriter::begin`].
#[derive(Debug, Clone)]
struct EncodeMeta {
    byte_order: ByteOrder,
    bits: Vec<u16>,
    samples_per_tile: u16,
    sample_type: SampleType,
    compression: CompressionMethod,
    predictor: Predictor,
    fill_order: FillOrder,
}

/// Writes the tiles of one image and completes its directory.
pub struct ImageWriter<'a, W: Write + Seek + Truncate> {
    writer: &'a mut TiffWriter<W>,
    ifd: Ifd,
    map: TileMap,
    meta: EncodeMeta,
    /// `Some` in forward mode: the IFD is already in the file and its
    /// positioning arrays get patched in place at completion.
    emitted: Option<EmittedIfd>,
    tile_ranges: Vec<Option<(u64, u64)>>,
    resizable: bool,
    finished: bool,
}

impl<'a, W: Write + Seek + Truncate> ImageWriter<'a, W> {
    fn begin(
        writer: &'a mut TiffWriter<W>,
        mut ifd: Ifd,
        resizable: bool,
    ) -> TiffResult<Self> {
        if writer.image_open {
            return Err(TiffError::UsageError(UsageError::ImageNotFinished));
        }
        correct_ifd(&mut ifd, &writer.options, resizable)?;
        validate_ifd(&ifd, resizable)?;

        let meta = EncodeMeta {
            byte_order: ifd.byte_order(),
            bits: ifd.bits_per_sample()?,
            samples_per_tile: ifd.samples_per_tile()?,
            sample_type: ifd.sample_type()?,
            compression: ifd.compression()?,
            predictor: ifd.predictor()?,
            fill_order: ifd.fill_order()?,
        };
        predictor::validate(meta.predictor, &meta.bits, ifd.samples_per_pixel()?)?;

        let map = if resizable {
            let tile_width = ifd
                .get(Tag::TileWidth)
                .cloned()
                .ok_or(TiffError::FormatError(TiffFormatError::RequiredTagNotFound(
                    Tag::TileWidth,
                )))?
                .into_u32()?;
            let tile_length = ifd
                .get(Tag::TileLength)
                .cloned()
                .ok_or(TiffError::FormatError(TiffFormatError::RequiredTagNotFound(
                    Tag::TileLength,
                )))?
                .into_u32()?;
            TileMap::new_resizable(
                tile_width,
                tile_length,
                ifd.planes()?,
                meta.samples_per_tile,
                meta.sample_type.bytes_per_sample(),
                meta.sample_type.is_packed(),
            )
        } else {
            TileMap::from_ifd(&ifd, false)?
        };

        ifd.freeze();

        let mut this = ImageWriter {
            writer,
            ifd,
            map,
            meta,
            emitted: None,
            tile_ranges: Vec::new(),
            resizable,
            finished: false,
        };
        this.tile_ranges = vec![None; this.map.tile_count()];

        // Forward mode: reserve the positioning arrays and put the IFD
        // ahead of the payload for better read locality.
        if !resizable && this.writer.options.writing_forward_allowed {
            let placeholders = vec![0u64; this.map.tile_count()];
            this.ifd
                .update_data_positioning(&placeholders, &placeholders)?;
            this.writer.stream.pad_to_even()?;
            this.writer.guard_classic_range()?;
            let emitted = this.ifd.emit(&mut this.writer.stream)?;
            this.writer.link_ifd(&emitted)?;
            this.emitted = Some(emitted);
        }

        this.writer.image_open = true;
        Ok(this)
    }

    pub fn tile_map(&self) -> &TileMap {
        &self.map
    }

    /// Encodes and writes one complete tile.
    ///
    /// `data` holds the tile's samples: channel-separated planes under
    /// `auto_interleave_source`, interleaved otherwise. For resizable
    /// images the tile is buffered and flushed at completion.
    pub fn write_tile(&mut self, index: TileIndex, data: &[u8]) -> TiffResult<()> {
        if self.resizable {
            let right = (index.x + 1) * self.map.tile_width();
            let bottom = (index.y + 1) * self.map.tile_length();
            self.map.expand_to_contain(right, bottom)?;
            self.grow_ranges();

            let layout = self.tile_layout();
            if data.len() != layout.unpacked_len() {
                return Err(TiffError::FormatError(TiffFormatError::Format(format!(
                    "tile data holds {} bytes, geometry needs {}",
                    data.len(),
                    layout.unpacked_len()
                ))));
            }
            let interleaved = !self.writer.options.auto_interleave_source;
            let filler = self.writer.options.byte_filler;
            let planar = if interleaved {
                samples::deinterleave(
                    data,
                    layout.samples as usize,
                    layout.sample_type.bytes_per_sample() as usize,
                )
            } else {
                data.to_vec()
            };
            let (tile_w, tile_l) = (self.map.tile_width(), self.map.tile_length());
            let slot = self.map.slot_mut(index)?;
            slot.ensure_buffer(filler)?;
            *slot.decoded_mut()? = planar;
            slot.cover(crate::tile::Rect::new(0, 0, tile_w, tile_l));
            self.map.note_data_extent(right, bottom);
            return Ok(());
        }

        let linear = self.map.linear_index(index)?;
        let full = self.tile_layout();
        // Boundary strips may come in already cropped to the image edge;
        // they are stored that way.
        let layout = if data.len() == full.unpacked_len() {
            full
        } else {
            let (crop_w, crop_h) = self.map.tile_size(index, true);
            let cropped = TileLayout {
                size_x: crop_w,
                size_y: crop_h,
                ..full.clone()
            };
            if data.len() == cropped.unpacked_len() {
                cropped
            } else {
                return Err(TiffError::FormatError(TiffFormatError::Format(format!(
                    "tile data holds {} bytes, geometry needs {}",
                    data.len(),
                    full.unpacked_len()
                ))));
            }
        };
        let encoded =
            self.encode_tile(&layout, data, !self.writer.options.auto_interleave_source)?;
        let range = self.append_payload(&encoded)?;
        trace!(
            "tile (plane {}, {}, {}) written at {:#x}, {} bytes",
            index.plane,
            index.x,
            index.y,
            range.0,
            range.1
        );
        self.tile_ranges[linear] = Some(range);
        Ok(())
    }

    /// Writes a pixel region into a resizable image, growing the grid as
    /// needed. Data is planar (or interleaved per the options) with `width`
    /// by `height` samples per channel.
    pub fn write_region(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> TiffResult<()> {
        if !self.resizable {
            return Err(TiffError::UsageError(UsageError::MapNotResizable));
        }
        if self.meta.sample_type.is_packed() {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::UnsupportedBitsPerChannel(1),
            ));
        }
        let samples = self.meta.samples_per_tile as usize;
        let bytes = self.meta.sample_type.bytes_per_sample() as usize;
        let region_plane = width as usize * height as usize * bytes;
        if data.len() != region_plane * samples {
            return Err(TiffError::FormatError(TiffFormatError::Format(format!(
                "region data holds {} bytes, geometry needs {}",
                data.len(),
                region_plane * samples
            ))));
        }
        let planar = if self.writer.options.auto_interleave_source {
            data.to_vec()
        } else {
            samples::deinterleave(data, samples, bytes)
        };

        self.map.expand_to_contain(x + width, y + height)?;
        self.grow_ranges();
        let filler = self.writer.options.byte_filler;
        let tile_w = self.map.tile_width();
        let tile_l = self.map.tile_length();

        let first_tx = x / tile_w;
        let last_tx = (x + width - 1) / tile_w;
        let first_ty = y / tile_l;
        let last_ty = (y + height - 1) / tile_l;
        for ty in first_ty..=last_ty {
            for tx in first_tx..=last_tx {
                let index = TileIndex::flat(tx, ty);
                let tile_x0 = tx * tile_w;
                let tile_y0 = ty * tile_l;
                // Overlap of the region with this tile, in tile coordinates.
                let from_x = x.max(tile_x0) - tile_x0;
                let from_y = y.max(tile_y0) - tile_y0;
                let to_x = (x + width).min(tile_x0 + tile_w) - tile_x0;
                let to_y = (y + height).min(tile_y0 + tile_l) - tile_y0;

                let slot = self.map.slot_mut(index)?;
                slot.ensure_buffer(filler)?;
                let tile_plane = tile_w as usize * tile_l as usize * bytes;
                let buffer = slot.decoded_mut()?;
                for channel in 0..samples {
                    for row in from_y..to_y {
                        let src_row = (tile_y0 + row - y) as usize;
                        let src_col = (tile_x0 + from_x - x) as usize;
                        let src = &planar[channel * region_plane
                            + (src_row * width as usize + src_col) * bytes..]
                            [..(to_x - from_x) as usize * bytes];
                        let at = channel * tile_plane
                            + (row as usize * tile_w as usize + from_x as usize) * bytes;
                        buffer[at..at + src.len()].copy_from_slice(src);
                    }
                }
                slot.cover(crate::tile::Rect::new(from_x, from_y, to_x, to_y));
            }
        }
        self.map.note_data_extent(x + width, y + height);
        Ok(())
    }

    /// Completes the image: flushes buffered tiles, fills or zeroes missing
    /// slots, emits or patches the directory and links it into the chain.
    /// Returns the completed directory.
    pub fn finish(mut self) -> TiffResult<Ifd> {
        self.finish_inner()?;
        self.finished = true;
        self.writer.image_open = false;
        Ok(std::mem::replace(&mut self.ifd, Ifd::new(
            self.meta.byte_order,
            self.writer.options.big_tiff,
        )))
    }

    fn finish_inner(&mut self) -> TiffResult<()> {
        // Resizable images learn their dimensions now.
        if self.resizable {
            let (width, height) = self.map.data_extent();
            if width == 0 || height == 0 {
                return Err(TiffError::FormatError(TiffFormatError::InvalidDimensions(
                    width, height,
                )));
            }
            self.ifd.update_image_dimensions(width, height)?;
            self.grow_ranges();
            self.flush_buffered_tiles()?;
        }

        // Missing slots either stay zeroed or share one filler tile.
        let mut filler_range: Option<(u64, u64)> = None;
        for linear in 0..self.tile_ranges.len() {
            if self.tile_ranges[linear].is_some() {
                continue;
            }
            if self.writer.options.missing_tiles_allowed {
                self.tile_ranges[linear] = Some((0, 0));
                continue;
            }
            let range = match filler_range {
                Some(range) => range,
                None => {
                    let layout = self.tile_layout();
                    let filler =
                        vec![self.writer.options.byte_filler; layout.unpacked_len()];
                    let encoded = self.encode_tile(&layout, &filler, false)?;
                    let range = self.append_payload(&encoded)?;
                    debug!("filler tile written at {:#x}, {} bytes", range.0, range.1);
                    filler_range = Some(range);
                    range
                }
            };
            self.tile_ranges[linear] = Some(range);
        }

        let offsets: Vec<u64> = self.tile_ranges.iter().map(|r| r.unwrap().0).collect();
        let byte_counts: Vec<u64> = self.tile_ranges.iter().map(|r| r.unwrap().1).collect();

        match self.emitted.take() {
            Some(emitted) => {
                // Forward mode: rewrite the reserved arrays in place.
                self.patch_positioning(&emitted, &offsets, &byte_counts)?;
                self.ifd.update_data_positioning(&offsets, &byte_counts)?;
            }
            None => {
                self.ifd.update_data_positioning(&offsets, &byte_counts)?;
                self.writer.stream.goto_end()?;
                self.writer.stream.pad_to_even()?;
                self.writer.guard_classic_range()?;
                let emitted = self.ifd.emit(&mut self.writer.stream)?;
                self.writer.link_ifd(&emitted)?;
            }
        }
        self.ifd.complete_writing()?;
        Ok(())
    }

    fn flush_buffered_tiles(&mut self) -> TiffResult<()> {
        let total = self.map.tile_count();
        let mut done = 0usize;
        for index in self.map.indices().collect::<Vec<_>>() {
            self.writer.check_cancelled()?;
            if let Some(progress) = &mut self.writer.progress {
                progress(done, total);
            }
            done += 1;

            let Some(slot) = self.map.slot(index) else {
                continue;
            };
            if !slot.has_any_data() {
                continue;
            }
            let linear = self.map.linear_index(index)?;
            let data = self.map.slot_mut(index)?.take_decoded()?;
            let layout = self.tile_layout();
            let encoded = self.encode_tile(&layout, &data, false)?;
            self.map.slot_mut(index)?.set_encoded(encoded)?;
            // The buffer moves out for the write, freeing the memory early.
            let encoded = self.map.slot_mut(index)?.take_encoded()?;
            let range = self.append_payload(&encoded)?;
            self.tile_ranges[linear] = Some(range);
            self.map.slot_mut(index)?.mark_written(range.0, range.1);
        }
        Ok(())
    }

    fn tile_layout(&self) -> TileLayout {
        TileLayout {
            size_x: self.map.tile_width(),
            size_y: self.map.tile_length(),
            samples: self.meta.samples_per_tile,
            bits: if self.meta.samples_per_tile == 1 && self.meta.bits.len() > 1 {
                vec![self.meta.bits[0]]
            } else {
                self.meta.bits.clone()
            },
            byte_order: self.meta.byte_order,
            sample_type: self.meta.sample_type,
        }
    }

    /// Packs, predicts, bit-reverses and compresses one tile's samples.
    fn encode_tile(
        &mut self,
        layout: &TileLayout,
        data: &[u8],
        input_interleaved: bool,
    ) -> TiffResult<Vec<u8>> {
        let mut packed = samples::pack_tile(data, layout, input_interleaved)?;

        if self.meta.predictor == Predictor::Horizontal {
            let row_bytes = layout.row_bytes();
            for row in packed.chunks_mut(row_bytes) {
                predictor::apply_horizontal_row(
                    row,
                    layout.bits[0],
                    self.meta.samples_per_tile as usize,
                    self.meta.byte_order,
                );
            }
        }

        if self.meta.fill_order == FillOrder::Reversed && !self.meta.compression.is_advanced() {
            samples::reverse_fill_order(&mut packed);
        }

        let ctx = CodecContext {
            expected_len: packed.len(),
            tile_width: layout.size_x,
            tile_length: layout.size_y,
            samples: self.meta.samples_per_tile,
            quality: self.writer.options.quality,
            jpeg_tables: None,
        };
        self.writer
            .registry
            .encode_tile(self.meta.compression.to_u16(), &packed, &ctx)
    }

    /// Appends an encoded payload at the end of the file, returning its
    /// range. The range of a tile is known only once this returns.
    fn append_payload(&mut self, encoded: &[u8]) -> TiffResult<(u64, u64)> {
        self.writer.stream.goto_end()?;
        let offset = self.writer.stream.offset();
        self.writer.stream.write_bytes(encoded)?;
        Ok((offset, encoded.len() as u64))
    }

    fn patch_positioning(
        &mut self,
        emitted: &EmittedIfd,
        offsets: &[u64],
        byte_counts: &[u64],
    ) -> TiffResult<()> {
        let (offsets_tag, counts_tag) = if self.ifd.is_tiled()? {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        for (tag, values) in [(offsets_tag, offsets), (counts_tag, byte_counts)] {
            let position = *emitted
                .value_positions
                .get(&tag.to_u16())
                .ok_or(TiffError::UsageError(UsageError::IfdNotEmitted))?;
            self.writer.stream.goto_offset(position)?;
            for &value in values {
                if self.writer.options.big_tiff {
                    self.writer.stream.write_u64(value)?;
                } else {
                    self.writer.stream.write_u32(u32::try_from(value)?)?;
                }
            }
        }
        self.writer.stream.goto_end()?;
        Ok(())
    }

    fn grow_ranges(&mut self) {
        // Resizable images record ranges only while flushing, after the
        // grid is final, so growing the array never invalidates entries.
        if self.tile_ranges.len() < self.map.tile_count() {
            self.tile_ranges.resize(self.map.tile_count(), None);
        }
    }
}

impl<W: Write + Seek + Truncate> Drop for ImageWriter<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            self.writer.image_open = false;
        }
    }
}

/// Applies the smart corrections the options allow.
fn correct_ifd(ifd: &mut Ifd, options: &WriterOptions, _resizable: bool) -> TiffResult<()> {
    if !options.smart_ifd_correction {
        return Ok(());
    }

    // Round odd bit widths up to the next byte-aligned width, keeping the
    // pure binary layout.
    let bits = ifd.bits_per_sample()?;
    if bits != [1] && bits.iter().any(|&b| b % 8 != 0) {
        let rounded: Vec<u16> = bits.iter().map(|&b| b.div_ceil(8) * 8).collect();
        debug!("smart correction: bits per sample {:?} -> {:?}", bits, rounded);
        ifd.set(Tag::BitsPerSample, Value::shorts(&rounded))?;
    }

    // Fill in a photometric by channel count.
    if !ifd.contains(Tag::PhotometricInterpretation) {
        let samples = ifd.samples_per_pixel()?;
        let compression = ifd.compression()?;
        let photometric = match samples {
            3 => {
                if compression == CompressionMethod::ModernJPEG && !options.prefer_rgb_for_jpeg {
                    PhotometricInterpretation::YCbCr
                } else {
                    PhotometricInterpretation::RGB
                }
            }
            4 => PhotometricInterpretation::CMYK,
            _ => PhotometricInterpretation::BlackIsZero,
        };
        debug!("smart correction: photometric {:?}", photometric);
        ifd.set(
            Tag::PhotometricInterpretation,
            Value::shorts(&[photometric.to_u16()]),
        )?;
    }

    // YCbCr only encodes through JPEG here; substitute RGB otherwise.
    if ifd.photometric()? == PhotometricInterpretation::YCbCr
        && ifd.compression()? != CompressionMethod::ModernJPEG
    {
        debug!("smart correction: YCbCr -> RGB for non-JPEG compression");
        ifd.set(
            Tag::PhotometricInterpretation,
            Value::shorts(&[PhotometricInterpretation::RGB.to_u16()]),
        )?;
    }
    Ok(())
}

/// Enforces the write-side invariants the pipeline depends on.
fn validate_ifd(ifd: &Ifd, resizable: bool) -> TiffResult<()> {
    if !resizable {
        // Validates presence and range of both dimensions.
        ifd.image_width()?;
    }

    let samples = ifd.samples_per_pixel()?;
    if samples > MAX_SAMPLES_PER_PIXEL {
        return Err(TiffError::UnsupportedError(
            TiffUnsupportedError::TooManyChannels(samples),
        ));
    }

    let bits = ifd.bits_per_sample()?;
    ifd.bytes_per_sample()?;
    let sample_type = ifd.sample_type()?;

    // The packer writes whole-byte and binary layouts; other widths only
    // pass through smart correction.
    if bits != [1] && bits.iter().any(|&b| b % 8 != 0) {
        return Err(TiffError::UnsupportedError(
            TiffUnsupportedError::UnsupportedBitsPerChannel(
                bits.iter().copied().max().unwrap_or(0),
            ),
        ));
    }
    if sample_type == SampleType::F32 && bits.iter().any(|&b| b == 24) {
        return Err(TiffError::UnsupportedError(
            TiffUnsupportedError::UnsupportedBitsPerChannel(24),
        ));
    }

    if ifd.is_tiled()? {
        let tile_width = ifd.tile_width()?;
        let tile_length = ifd.tile_length()?;
        if tile_width % 16 != 0 || tile_length % 16 != 0 {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::TileSizeNotMultipleOf16(tile_width, tile_length),
            ));
        }
    } else if resizable {
        return Err(TiffError::FormatError(TiffFormatError::RequiredTagNotFound(
            Tag::TileWidth,
        )));
    }

    let photometric = ifd.photometric()?;
    if photometric == PhotometricInterpretation::RGBPalette && !ifd.contains(Tag::ColorMap) {
        return Err(TiffError::UnsupportedError(
            TiffUnsupportedError::PaletteWithoutColorMap,
        ));
    }
    if photometric == PhotometricInterpretation::YCbCr {
        if ifd.planar_config()? == PlanarConfiguration::Planar {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::YcbcrWithPlanarConfig,
            ));
        }
        if ifd.compression()? != CompressionMethod::ModernJPEG {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::UnsupportedInterpretation(photometric),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::io::Cursor;

    fn gray_ifd(writer: &TiffWriter<Cursor<Vec<u8>>>, bits: u16) -> Ifd {
        let mut ifd = writer.base_ifd();
        ifd.set(Tag::ImageWidth, Value::longs(&[32])).unwrap();
        ifd.set(Tag::ImageLength, Value::longs(&[32])).unwrap();
        ifd.set(Tag::BitsPerSample, Value::shorts(&[bits])).unwrap();
        ifd.set(Tag::SamplesPerPixel, Value::shorts(&[1])).unwrap();
        ifd.set(
            Tag::PhotometricInterpretation,
            Value::shorts(&[PhotometricInterpretation::BlackIsZero.to_u16()]),
        )
        .unwrap();
        ifd
    }

    #[test]
    fn header_matches_declared_order() {
        let writer = TiffWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        let mut stream = writer.stream;
        let bytes = stream.inner().get_ref().clone();
        assert_eq!(&bytes[..4], &[0x4D, 0x4D, 0x00, 0x2A]);
        assert_eq!(bytes.len(), 8);

        let options = WriterOptions {
            byte_order: ByteOrder::LittleEndian,
            big_tiff: true,
            ..WriterOptions::default()
        };
        let writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
        let mut stream = writer.stream;
        let bytes = stream.inner().get_ref().clone();
        assert_eq!(&bytes[..8], &[0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn odd_bit_widths_need_smart_correction() {
        let mut writer =
            TiffWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        let ifd = gray_ifd(&writer, 12);
        assert!(matches!(
            writer.new_image(ifd).err(),
            Some(TiffError::UnsupportedError(
                TiffUnsupportedError::UnsupportedBitsPerChannel(12)
            ))
        ));

        let options = WriterOptions {
            smart_ifd_correction: true,
            ..WriterOptions::default()
        };
        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
        let ifd = gray_ifd(&writer, 12);
        let image = writer.new_image(ifd).unwrap();
        assert_eq!(image.ifd.bits_per_sample().unwrap(), vec![16]);
        drop(image);
    }

    #[test]
    fn ycbcr_without_jpeg_is_substituted_or_fatal() {
        let make_ifd = |writer: &TiffWriter<Cursor<Vec<u8>>>| {
            let mut ifd = writer.base_ifd();
            ifd.set(Tag::ImageWidth, Value::longs(&[32])).unwrap();
            ifd.set(Tag::ImageLength, Value::longs(&[32])).unwrap();
            ifd.set(Tag::BitsPerSample, Value::shorts(&[8, 8, 8])).unwrap();
            ifd.set(Tag::SamplesPerPixel, Value::shorts(&[3])).unwrap();
            ifd.set(
                Tag::PhotometricInterpretation,
                Value::shorts(&[PhotometricInterpretation::YCbCr.to_u16()]),
            )
            .unwrap();
            ifd
        };

        let mut writer =
            TiffWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        let ifd = make_ifd(&writer);
        assert!(writer.new_image(ifd).is_err());

        let options = WriterOptions {
            smart_ifd_correction: true,
            ..WriterOptions::default()
        };
        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
        let ifd = make_ifd(&writer);
        let image = writer.new_image(ifd).unwrap();
        assert_eq!(
            image.ifd.photometric().unwrap(),
            PhotometricInterpretation::RGB
        );
    }

    #[test]
    fn tile_dimensions_must_be_multiples_of_16() {
        let mut writer =
            TiffWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        let mut ifd = gray_ifd(&writer, 8);
        ifd.set(Tag::TileWidth, Value::longs(&[20])).unwrap();
        ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();
        assert!(matches!(
            writer.new_image(ifd).err(),
            Some(TiffError::UnsupportedError(
                TiffUnsupportedError::TileSizeNotMultipleOf16(20, 16)
            ))
        ));
    }
}
