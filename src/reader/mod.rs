//! Reading TIFF and BigTIFF files tile by tile

use std::io::{Read, Seek};

use log::{debug, trace};

use crate::codec::{CodecContext, CodecRegistry};
use crate::ifd::Ifd;
use crate::predictor;
use crate::samples::{self, TileLayout, UnpackOptions};
use crate::stream::{ByteOrder, EndianReader};
use crate::tags::{
    FillOrder, IfdPointer, PhotometricInterpretation, PlanarConfiguration, Predictor, Tag,
};
use crate::tile::{TileIndex, TileMap, TileSlot};
use crate::ycbcr::{self, YcbcrParams};
use crate::{
    CodecError, HeaderError, SampleType, TiffError, TiffFormatError, TiffResult,
    TiffUnsupportedError,
};

mod cycles;

/// Decode-side configuration.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Fail on a malformed header instead of flagging the reader invalid.
    pub require_valid_tiff: bool,
    /// Return interleaved samples instead of channel-separated planes.
    pub interleave_results: bool,
    /// Expand non-byte-aligned precisions (12 bit, 4 bit, ...) instead of
    /// rejecting them.
    pub auto_unpack_unusual_precisions: bool,
    /// Rescale promoted samples into the full range of their widened type.
    pub auto_scale_when_increasing_bit_depth: bool,
    /// Convert WhiteIsZero and CMYK samples to the darker-is-smaller
    /// convention while unpacking.
    pub auto_correct_inverted_brightness: bool,
    /// Shrink boundary tiles to the image edge instead of returning the full
    /// declared tile with filler.
    pub crop_tiles_to_image_boundaries: bool,
    /// Keep parsed directories in memory; otherwise every access re-reads
    /// them from the file.
    pub caching_ifds: bool,
    /// Produce filler pixels for tiles with a zero offset or byte count
    /// instead of failing.
    pub missing_tiles_allowed: bool,
    /// Byte value filling missing tiles.
    pub byte_filler: u8,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            require_valid_tiff: true,
            interleave_results: false,
            auto_unpack_unusual_precisions: true,
            auto_scale_when_increasing_bit_depth: true,
            auto_correct_inverted_brightness: false,
            crop_tiles_to_image_boundaries: false,
            caching_ifds: true,
            missing_tiles_allowed: false,
            byte_filler: 0,
        }
    }
}

/// A fully assembled image, produced by [`TiffReader::read_image`].
#[derive(Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub samples: u16,
    pub sample_type: SampleType,
    /// Channel-separated planes, or interleaved samples when the reader was
    /// configured with `interleave_results`. Binary images stay bit-packed.
    pub data: Vec<u8>,
    pub interleaved: bool,
}

/// The representation of a TIFF reader.
///
/// All operations that touch the underlying stream take `&mut self`, which
/// serializes them per open file; separate files can be processed on
/// separate threads.
pub struct TiffReader<R: Read + Seek> {
    stream: EndianReader<R>,
    big_tiff: bool,
    valid: bool,
    options: ReaderOptions,
    offsets: Vec<IfdPointer>,
    ifds: Vec<Ifd>,
    sub_ifds: Vec<Ifd>,
    registry: CodecRegistry,
    cancel_check: Option<Box<dyn Fn() -> bool + Send>>,
    progress: Option<Box<dyn FnMut(usize, usize) + Send>>,
}

impl<R: Read + Seek> TiffReader<R> {
    pub fn new(reader: R) -> TiffResult<TiffReader<R>> {
        Self::with_options(reader, ReaderOptions::default())
    }

    pub fn with_options(mut reader: R, options: ReaderOptions) -> TiffResult<TiffReader<R>> {
        match Self::read_header(&mut reader) {
            Ok((byte_order, big_tiff, first_offset)) => {
                let mut this = TiffReader {
                    stream: EndianReader::new(reader, byte_order),
                    big_tiff,
                    valid: true,
                    options,
                    offsets: Vec::new(),
                    ifds: Vec::new(),
                    sub_ifds: Vec::new(),
                    registry: CodecRegistry::default(),
                    cancel_check: None,
                    progress: None,
                };
                this.walk_chain(first_offset)?;
                Ok(this)
            }
            Err(err) if !options.require_valid_tiff => {
                debug!("treating unreadable header as not-a-tiff: {}", err);
                Ok(TiffReader {
                    stream: EndianReader::new(reader, ByteOrder::LittleEndian),
                    big_tiff: false,
                    valid: false,
                    options,
                    offsets: Vec::new(),
                    ifds: Vec::new(),
                    sub_ifds: Vec::new(),
                    registry: CodecRegistry::default(),
                    cancel_check: None,
                    progress: None,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn read_header(reader: &mut R) -> TiffResult<(ByteOrder, bool, u64)> {
        let mut signature = [0u8; 2];
        reader.read_exact(&mut signature)?;
        let byte_order = match &signature {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            _ => return Err(TiffError::HeaderError(HeaderError::SignatureNotFound)),
        };

        let mut stream = EndianReader::new(reader, byte_order);
        let big_tiff = match stream.read_u16()? {
            42 => false,
            43 => {
                // Offset byte size; always 8 today, but encoded so that it
                // could grow some day.
                let offset_size = stream.read_u16()?;
                if offset_size != 8 {
                    return Err(TiffError::HeaderError(HeaderError::BigTiffOffsetSize(
                        offset_size,
                    )));
                }
                let padding = stream.read_u16()?;
                if padding != 0 {
                    return Err(TiffError::HeaderError(HeaderError::BigTiffPadding(padding)));
                }
                true
            }
            magic => return Err(TiffError::HeaderError(HeaderError::MagicInvalid(magic))),
        };

        let first_offset = if big_tiff {
            stream.read_u64()?
        } else {
            u64::from(stream.read_u32()?)
        };
        Ok((byte_order, big_tiff, first_offset))
    }

    fn walk_chain(&mut self, first_offset: u64) -> TiffResult<()> {
        if first_offset == 0 {
            if self.options.require_valid_tiff {
                return Err(TiffError::FormatError(TiffFormatError::EmptyIfdChain));
            }
            self.valid = false;
            return Ok(());
        }

        let mut visited = cycles::VisitedOffsets::new();
        let mut next = Some(IfdPointer(first_offset));
        while let Some(pointer) = next {
            visited.insert(pointer)?;
            let ifd = Ifd::parse(&mut self.stream, pointer, self.big_tiff)?;
            debug!(
                "IFD {} at {:#x}: {} entries, next {:?}",
                self.offsets.len(),
                pointer.0,
                ifd.len(),
                ifd.next_ifd()
            );

            // SubIFDs are read but their own next pointers are not followed.
            for sub_pointer in ifd.sub_ifd_pointers()? {
                visited.insert(sub_pointer)?;
                let mut sub = Ifd::parse(&mut self.stream, sub_pointer, self.big_tiff)?;
                sub.sub_ifd_type = sub
                    .get(Tag::NewSubfileType)
                    .cloned()
                    .and_then(|v| v.into_u32().ok());
                self.sub_ifds.push(sub);
            }

            next = ifd.next_ifd();
            self.offsets.push(pointer);
            self.ifds.push(ifd);
        }
        Ok(())
    }

    /// Whether the stream parsed as a TIFF file. Only `false` when opened
    /// with `require_valid_tiff` off.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.stream.byte_order()
    }

    pub fn is_big_tiff(&self) -> bool {
        self.big_tiff
    }

    pub fn image_count(&self) -> usize {
        self.ifds.len()
    }

    /// The directory of one image. With IFD caching disabled this re-reads
    /// it from the file.
    pub fn ifd(&mut self, index: usize) -> TiffResult<&Ifd> {
        if index >= self.ifds.len() {
            return Err(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound(index),
            ));
        }
        if !self.options.caching_ifds {
            self.ifds[index] = Ifd::parse(&mut self.stream, self.offsets[index], self.big_tiff)?;
        }
        Ok(&self.ifds[index])
    }

    /// Directories referenced through `SubIFDs` tags, in discovery order.
    pub fn sub_ifds(&self) -> &[Ifd] {
        &self.sub_ifds
    }

    /// The tile map for one image.
    pub fn tile_map(&self, index: usize) -> TiffResult<TileMap> {
        let ifd = self
            .ifds
            .get(index)
            .ok_or(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound(index),
            ))?;
        TileMap::from_ifd(ifd, false)
    }

    /// Replaces the codec registry, e.g. to add external codecs.
    pub fn set_codec_registry(&mut self, registry: CodecRegistry) {
        self.registry = registry;
    }

    /// Predicate polled between tiles during long operations; returning
    /// `true` aborts with an interrupted error. Never called while the
    /// stream is being accessed.
    pub fn set_cancel_check(&mut self, check: Box<dyn Fn() -> bool + Send>) {
        self.cancel_check = Some(check);
    }

    /// Callback invoked between tiles with (done, total).
    pub fn set_progress(&mut self, progress: Box<dyn FnMut(usize, usize) + Send>) {
        self.progress = Some(progress);
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

    /// Reads and decodes one tile.
    ///
    /// The returned slot owns a decoded buffer: channel-separated planes of
    /// promoted samples (or packed rows for binary images), interleaved
    /// instead when the reader is configured so.
    pub fn read_tile(&mut self, ifd_index: usize, index: TileIndex) -> TiffResult<TileSlot> {
        let crop = self.options.crop_tiles_to_image_boundaries;
        self.read_tile_inner(ifd_index, index, crop, self.options.interleave_results)
    }

    fn read_tile_inner(
        &mut self,
        ifd_index: usize,
        index: TileIndex,
        crop: bool,
        interleave: bool,
    ) -> TiffResult<TileSlot> {
        if !self.options.caching_ifds {
            self.ifd(ifd_index)?;
        }
        let ifd = self
            .ifds
            .get(ifd_index)
            .ok_or(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound(ifd_index),
            ))?;
        let map = TileMap::from_ifd(ifd, false)?;
        let linear = map.linear_index(index)?;
        let offsets = ifd.tile_offsets()?;
        let byte_counts = ifd.tile_byte_counts()?;
        let (offset, byte_count) = (offsets[linear], byte_counts[linear]);

        let (stored_w, stored_h) = stored_tile_size(ifd, &map, index)?;
        let (crop_w, crop_h) = map.tile_size(index, true);
        let (out_w, out_h) = if crop { (crop_w, crop_h) } else { (stored_w, stored_h) };

        trace!(
            "tile (plane {}, {}, {}): offset {:#x}, {} bytes, stored {}x{}",
            index.plane,
            index.x,
            index.y,
            offset,
            byte_count,
            stored_w,
            stored_h
        );

        if offset == 0 || byte_count == 0 {
            if !self.options.missing_tiles_allowed {
                return Err(TiffError::FormatError(TiffFormatError::MissingTileData(
                    index,
                )));
            }
            return filler_tile(
                ifd,
                &map,
                index,
                (out_w, out_h),
                self.options.byte_filler,
                interleave,
            );
        }

        let mut encoded = vec![0u8; usize::try_from(byte_count)?];
        self.stream.goto_offset(offset)?;
        self.stream.read_exact(&mut encoded)?;

        let decoded = decode_tile_payload(
            ifd,
            &self.registry,
            &self.options,
            index,
            (stored_w, stored_h),
            (crop_w, crop_h),
            crop,
            interleave,
            encoded,
        )?;

        let mut result = crate::tile::detached_slot(
            index,
            decoded.size_x,
            decoded.size_y,
            decoded.samples,
            decoded.bytes,
            decoded.packed,
            linear,
        );
        result.set_file_range(offset, byte_count);
        result.set_decoded(decoded.data, decoded.interleaved)?;
        Ok(result)
    }

    /// Decodes the entire image of one directory and assembles the tiles.
    ///
    /// The cancellation predicate and the progress callback run between
    /// tiles.
    pub fn read_image(&mut self, ifd_index: usize) -> TiffResult<DecodedImage> {
        let ifd = self.ifd(ifd_index)?;
        let width = ifd.image_width()?;
        let height = ifd.image_height()?;
        let samples = ifd.samples_per_pixel()?;
        let planar = ifd.planar_config()? == PlanarConfiguration::Planar;
        let photometric = ifd.photometric()?;
        let compression = ifd.compression()?;
        let mut sample_type = ifd.sample_type()?;
        let mut out_samples = samples;
        // Raw YCbCr tiles come back as RGB.
        if photometric == PhotometricInterpretation::YCbCr && !compression.is_advanced() {
            sample_type = SampleType::U8;
            out_samples = 3;
        }
        let map = TileMap::from_ifd(ifd, false)?;
        let (grid_x, _) = map.grid();

        if sample_type.is_packed() && grid_x > 1 {
            // Bit-packed rows of horizontally adjacent tiles do not join on
            // byte boundaries.
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::UnsupportedBitsPerChannel(1),
            ));
        }

        let bytes = sample_type.bytes_per_sample() as usize;
        let image_row_bytes = if sample_type.is_packed() {
            (width as usize).div_ceil(8)
        } else {
            width as usize * bytes
        };
        let plane_len = if sample_type.is_packed() {
            image_row_bytes * height as usize
        } else {
            width as usize * height as usize * bytes
        };
        let mut data = vec![0u8; plane_len * out_samples as usize];

        let total = map.tile_count();
        let mut done = 0usize;
        for tile_index in map.indices().collect::<Vec<_>>() {
            self.check_cancelled()?;
            if let Some(progress) = &mut self.progress {
                progress(done, total);
            }

            let slot = self.read_tile_inner(ifd_index, tile_index, true, false)?;
            let tile_w = slot.size_x() as usize;
            let tile_h = slot.size_y() as usize;
            let x0 = (tile_index.x * map.tile_width()) as usize;
            let y0 = (tile_index.y * map.tile_length()) as usize;
            let tile_samples = slot.samples_per_pixel() as usize;
            let tile_data = slot.decoded()?;

            if sample_type.is_packed() {
                let tile_row_bytes = tile_w.div_ceil(8);
                for row in 0..tile_h {
                    let src = &tile_data[row * tile_row_bytes..][..tile_row_bytes];
                    let at = (y0 + row) * image_row_bytes;
                    data[at..at + tile_row_bytes].copy_from_slice(src);
                }
            } else {
                let tile_plane = tile_w * tile_h * bytes;
                for channel in 0..tile_samples {
                    let out_channel = if planar {
                        tile_index.plane as usize
                    } else {
                        channel
                    };
                    for row in 0..tile_h {
                        let src =
                            &tile_data[channel * tile_plane + row * tile_w * bytes..][..tile_w * bytes];
                        let at = out_channel * plane_len + ((y0 + row) * width as usize + x0) * bytes;
                        data[at..at + tile_w * bytes].copy_from_slice(src);
                    }
                }
            }
            done += 1;
        }
        if let Some(progress) = &mut self.progress {
            progress(done, total);
        }

        let interleaved = if self.options.interleave_results && out_samples > 1 {
            data = samples::interleave(&data, out_samples as usize, bytes);
            true
        } else {
            false
        };

        Ok(DecodedImage {
            width,
            height,
            samples: out_samples,
            sample_type,
            data,
            interleaved,
        })
    }
}

/// Dimensions of the data as stored for one tile: full declared size for
/// tiled images, bottom-cropped for the last strips of a strip image.
fn stored_tile_size(ifd: &Ifd, map: &TileMap, index: TileIndex) -> TiffResult<(u32, u32)> {
    if ifd.is_tiled()? {
        Ok((map.tile_width(), map.tile_length()))
    } else {
        Ok(map.tile_size(index, true))
    }
}

struct DecodedTile {
    data: Vec<u8>,
    size_x: u32,
    size_y: u32,
    samples: u16,
    bytes: u32,
    packed: bool,
    interleaved: bool,
}

fn ycbcr_block_len(size_x: u32, size_y: u32, sub_x: u32, sub_y: u32) -> usize {
    let blocks = size_x.div_ceil(sub_x) as usize * size_y.div_ceil(sub_y) as usize;
    blocks * (sub_x * sub_y + 2) as usize
}

#[allow(clippy::too_many_arguments)]
fn decode_tile_payload(
    ifd: &Ifd,
    registry: &CodecRegistry,
    options: &ReaderOptions,
    index: TileIndex,
    (stored_w, stored_h): (u32, u32),
    (crop_w, crop_h): (u32, u32),
    crop: bool,
    interleave: bool,
    mut encoded: Vec<u8>,
) -> TiffResult<DecodedTile> {
    let compression = ifd.compression()?;
    let code = compression.to_u16();
    let byte_order = ifd.byte_order();
    let photometric = ifd.photometric()?;
    let planar = ifd.planar_config()? == PlanarConfiguration::Planar;
    let bits = ifd.bits_per_sample()?;
    let samples_in_tile = ifd.samples_per_tile()?;
    let tile_bits: Vec<u16> = if planar {
        vec![bits[index.plane as usize]]
    } else {
        bits.clone()
    };
    let sample_type = ifd.sample_type()?;
    let ycbcr_raw =
        photometric == PhotometricInterpretation::YCbCr && !compression.is_advanced();

    // Bit reversal applies to standard-codec payloads only; JPEG-family
    // streams are byte oriented.
    if ifd.fill_order()? == FillOrder::Reversed && !compression.is_advanced() {
        samples::reverse_fill_order(&mut encoded);
    }

    let mut layout = TileLayout {
        size_x: stored_w,
        size_y: stored_h,
        samples: samples_in_tile,
        bits: tile_bits.clone(),
        byte_order,
        sample_type,
    };

    let expected = if ycbcr_raw {
        let (sub_x, sub_y) = ifd.ycbcr_subsampling()?;
        ycbcr_block_len(stored_w, stored_h, sub_x, sub_y)
    } else {
        layout.packed_len()
    };

    let jpeg_tables = ifd.jpeg_tables()?;
    let ctx = CodecContext {
        expected_len: expected,
        tile_width: stored_w,
        tile_length: stored_h,
        samples: samples_in_tile,
        quality: None,
        jpeg_tables: jpeg_tables.as_deref(),
    };
    let mut decoded = registry.decode_tile(code, &encoded, &ctx)?;
    drop(encoded);

    if !ycbcr_raw {
        // Adjust the decoded pixel count to the declared tile size.
        if decoded.len() > expected {
            if compression.is_advanced() {
                return Err(TiffError::FormatError(TiffFormatError::OversizedTile {
                    actual_bytes: decoded.len(),
                    expected_bytes: expected,
                }));
            }
            // Simple codecs may over-produce on boundary tiles.
            decoded.truncate(expected);
        } else if decoded.len() < expected {
            // Some writers store boundary tiles already cropped.
            let cropped_layout = TileLayout {
                size_x: crop_w,
                size_y: crop_h,
                ..layout.clone()
            };
            if decoded.len() == cropped_layout.packed_len() {
                layout = cropped_layout;
            } else {
                return Err(TiffError::CodecError(CodecError::WrongDecodedSize {
                    actual_bytes: decoded.len(),
                    expected_bytes: expected,
                }));
            }
        }

        let predictor_kind = ifd.predictor()?;
        if compression.is_advanced() {
            // JPEG-family output is final pixel data.
        } else {
            predictor::validate(predictor_kind, &tile_bits, samples_in_tile)?;
            if predictor_kind == Predictor::Horizontal {
                let row_bytes = layout.row_bytes();
                for row in decoded.chunks_mut(row_bytes) {
                    predictor::undo_horizontal_row(
                        row,
                        tile_bits[0],
                        samples_in_tile as usize,
                        byte_order,
                    );
                }
            }
        }
    } else if ifd.predictor()? != Predictor::None {
        return Err(TiffError::UnsupportedError(
            TiffUnsupportedError::HorizontalPredictorWithBits(tile_bits),
        ));
    }

    // Sample processing: YCbCr conversion, or bit unpacking with optional
    // scaling and brightness correction.
    let (mut data, size_x, size_y, out_samples, out_bytes, mut interleaved) = if ycbcr_raw {
        if planar {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::YcbcrWithPlanarConfig,
            ));
        }
        if tile_bits != [8, 8, 8] {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::YcbcrWithBits(tile_bits),
            ));
        }
        let (sub_x, sub_y) = ifd.ycbcr_subsampling()?;
        let params = YcbcrParams {
            sub_x,
            sub_y,
            luma: ifd.ycbcr_coefficients()?,
            reference: ifd.reference_black_white()?,
        };
        let mut rgb = ycbcr::ycbcr_to_rgb(&decoded, stored_w, stored_h, &params)?;
        let mut rgb_interleaved = true;
        if !interleave {
            rgb = samples::deinterleave(&rgb, 3, 1);
            rgb_interleaved = false;
        }
        (rgb, stored_w, stored_h, 3u16, 1u32, rgb_interleaved)
    } else {
        let whole_byte = tile_bits.iter().all(|&b| b % 8 == 0);
        if !whole_byte
            && sample_type != SampleType::Bit
            && !options.auto_unpack_unusual_precisions
        {
            return Err(TiffError::UnsupportedError(
                TiffUnsupportedError::UnsupportedBitsPerChannel(
                    tile_bits.iter().copied().max().unwrap_or(0),
                ),
            ));
        }
        let unpack_options = UnpackOptions {
            scale_to_full_range: options.auto_scale_when_increasing_bit_depth
                && !photometric.is_indexed(),
            invert_brightness: options.auto_correct_inverted_brightness
                && photometric.is_inverted(),
        };
        let planes = samples::unpack_tile(&decoded, &layout, &unpack_options)?;
        (
            planes,
            layout.size_x,
            layout.size_y,
            samples_in_tile,
            sample_type.bytes_per_sample(),
            false,
        )
    };

    let packed = sample_type.is_packed() && !ycbcr_raw;

    // Crop to the image boundary when requested and still uncropped.
    let (final_w, final_h) = if crop && (size_x > crop_w || size_y > crop_h) {
        data = crop_planes(
            &data, size_x, size_y, crop_w, crop_h, out_samples, out_bytes, packed, interleaved,
        );
        (crop_w, crop_h)
    } else {
        (size_x, size_y)
    };

    if interleave && !interleaved && out_samples > 1 && !packed {
        data = samples::interleave(&data, out_samples as usize, out_bytes as usize);
        interleaved = true;
    }

    Ok(DecodedTile {
        data,
        size_x: final_w,
        size_y: final_h,
        samples: out_samples,
        bytes: out_bytes,
        packed,
        interleaved,
    })
}

#[allow(clippy::too_many_arguments)]
fn crop_planes(
    data: &[u8],
    from_w: u32,
    from_h: u32,
    to_w: u32,
    to_h: u32,
    samples: u16,
    bytes: u32,
    packed_bits: bool,
    interleaved: bool,
) -> Vec<u8> {
    if packed_bits {
        let from_row = (from_w as usize).div_ceil(8);
        let to_row = (to_w as usize).div_ceil(8);
        let mut out = vec![0u8; to_row * to_h as usize];
        for row in 0..to_h as usize {
            out[row * to_row..][..to_row]
                .copy_from_slice(&data[row * from_row..][..to_row]);
        }
        return out;
    }

    let bytes = bytes as usize;
    if interleaved {
        let from_stride = from_w as usize * samples as usize * bytes;
        let to_stride = to_w as usize * samples as usize * bytes;
        let mut out = vec![0u8; to_stride * to_h as usize];
        for row in 0..to_h as usize {
            out[row * to_stride..][..to_stride]
                .copy_from_slice(&data[row * from_stride..][..to_stride]);
        }
        out
    } else {
        let from_plane = from_w as usize * from_h as usize * bytes;
        let to_plane = to_w as usize * to_h as usize * bytes;
        let mut out = vec![0u8; to_plane * samples as usize];
        for channel in 0..samples as usize {
            for row in 0..to_h as usize {
                let src = &data[channel * from_plane + row * from_w as usize * bytes..]
                    [..to_w as usize * bytes];
                let at = channel * to_plane + row * to_w as usize * bytes;
                out[at..at + to_w as usize * bytes].copy_from_slice(src);
            }
        }
        out
    }
}

fn filler_tile(
    ifd: &Ifd,
    map: &TileMap,
    index: TileIndex,
    (out_w, out_h): (u32, u32),
    filler: u8,
    interleave: bool,
) -> TiffResult<TileSlot> {
    let sample_type = ifd.sample_type()?;
    let samples = ifd.samples_per_tile()?;
    let bytes = sample_type.bytes_per_sample();
    let linear = map.linear_index(index)?;
    let len = if sample_type.is_packed() {
        (out_w as usize).div_ceil(8) * out_h as usize
    } else {
        out_w as usize * out_h as usize * samples as usize * bytes as usize
    };
    let mut slot = crate::tile::detached_slot(
        index,
        out_w,
        out_h,
        samples,
        bytes,
        sample_type.is_packed(),
        linear,
    );
    slot.set_decoded(vec![filler; len], interleave && samples > 1)?;
    slot.set_file_range(0, 0);
    Ok(slot)
}
