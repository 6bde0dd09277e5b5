//! Wire-format behavior over hand-built and generated files

use std::io::Cursor;

use tiletiff::tags::{PhotometricInterpretation, Tag, Type};
use tiletiff::{
    ByteOrder, ReaderOptions, TiffError, TiffFormatError, TiffReader, TiffWriter, TileIndex,
    Value, WriterOptions,
};

/// Little-endian classic TIFF byte builder for hand-crafted fixtures.
#[derive(Default)]
struct FileBuilder {
    bytes: Vec<u8>,
}

impl FileBuilder {
    fn classic_le(first_ifd: u32) -> Self {
        let mut builder = FileBuilder::default();
        builder.bytes.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00]);
        builder.u32(first_ifd);
        builder
    }

    fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// One 12-byte entry with an inline value.
    fn entry(&mut self, tag: u16, type_: Type, count: u32, value: u32) {
        self.u16(tag);
        self.u16(type_.to_u16());
        self.u32(count);
        self.u32(value);
    }
}

#[test]
fn four_bit_palette_reads_unscaled_indices() {
    // 10x4 palette image in a single 16x16 tile; first row holds the
    // nibbles 0..=9, everything else is padding.
    let mut builder = FileBuilder::classic_le(8);
    builder.u16(10); // entry count
    builder.entry(Tag::ImageWidth.to_u16(), Type::LONG, 1, 10);
    builder.entry(Tag::ImageLength.to_u16(), Type::LONG, 1, 4);
    builder.entry(Tag::BitsPerSample.to_u16(), Type::SHORT, 1, 4);
    builder.entry(Tag::Compression.to_u16(), Type::SHORT, 1, 1);
    builder.entry(
        Tag::PhotometricInterpretation.to_u16(),
        Type::SHORT,
        1,
        PhotometricInterpretation::RGBPalette.to_u16() as u32,
    );
    builder.entry(Tag::SamplesPerPixel.to_u16(), Type::SHORT, 1, 1);
    builder.entry(Tag::TileWidth.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::TileLength.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::TileOffsets.to_u16(), Type::LONG, 1, 134);
    builder.entry(Tag::TileByteCounts.to_u16(), Type::LONG, 1, 128);
    builder.u32(0); // next IFD

    assert_eq!(builder.bytes.len(), 134);
    let mut tile = vec![0u8; 128];
    tile[..5].copy_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89]);
    builder.bytes.extend_from_slice(&tile);

    let options = ReaderOptions {
        auto_scale_when_increasing_bit_depth: false,
        crop_tiles_to_image_boundaries: true,
        ..ReaderOptions::default()
    };
    let mut reader = TiffReader::with_options(Cursor::new(builder.bytes), options).unwrap();
    let slot = reader.read_tile(0, TileIndex::flat(0, 0)).unwrap();
    assert_eq!((slot.size_x(), slot.size_y()), (10, 4));

    let data = slot.decoded().unwrap();
    assert_eq!(data.len(), 40);
    // Each nibble expands to one 8-bit index; palette samples are never
    // rescaled.
    assert_eq!(&data[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert!(data[10..].iter().all(|&b| b == 0));
}

#[test]
fn palette_samples_stay_unscaled_even_when_scaling_is_on() {
    let mut builder = FileBuilder::classic_le(8);
    builder.u16(10);
    builder.entry(Tag::ImageWidth.to_u16(), Type::LONG, 1, 10);
    builder.entry(Tag::ImageLength.to_u16(), Type::LONG, 1, 4);
    builder.entry(Tag::BitsPerSample.to_u16(), Type::SHORT, 1, 4);
    builder.entry(Tag::Compression.to_u16(), Type::SHORT, 1, 1);
    builder.entry(
        Tag::PhotometricInterpretation.to_u16(),
        Type::SHORT,
        1,
        PhotometricInterpretation::RGBPalette.to_u16() as u32,
    );
    builder.entry(Tag::SamplesPerPixel.to_u16(), Type::SHORT, 1, 1);
    builder.entry(Tag::TileWidth.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::TileLength.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::TileOffsets.to_u16(), Type::LONG, 1, 134);
    builder.entry(Tag::TileByteCounts.to_u16(), Type::LONG, 1, 128);
    builder.u32(0);
    let mut tile = vec![0u8; 128];
    tile[0] = 0x9F;
    builder.bytes.extend_from_slice(&tile);

    let options = ReaderOptions {
        auto_scale_when_increasing_bit_depth: true,
        crop_tiles_to_image_boundaries: true,
        ..ReaderOptions::default()
    };
    let mut reader = TiffReader::with_options(Cursor::new(builder.bytes), options).unwrap();
    let slot = reader.read_tile(0, TileIndex::flat(0, 0)).unwrap();
    assert_eq!(&slot.decoded().unwrap()[..2], &[9, 15]);
}

#[test]
fn ifd_cycle_is_fatal() {
    // IFD A at 8 with next = B, IFD B at 26 with next = A.
    let mut builder = FileBuilder::classic_le(8);
    builder.u16(1);
    builder.entry(Tag::ImageWidth.to_u16(), Type::LONG, 1, 1);
    builder.u32(26); // next: B
    builder.u16(1);
    builder.entry(Tag::ImageWidth.to_u16(), Type::LONG, 1, 1);
    builder.u32(8); // next: back to A

    match TiffReader::new(Cursor::new(builder.bytes)) {
        Err(TiffError::FormatError(TiffFormatError::CycleInOffsets(offset))) => {
            assert_eq!(offset, 8)
        }
        other => panic!("expected cycle error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn bad_header_is_flagged_or_fatal() {
    let not_a_tiff = b"PK\x03\x04 definitely a zip".to_vec();

    assert!(matches!(
        TiffReader::new(Cursor::new(not_a_tiff.clone())),
        Err(TiffError::HeaderError(_))
    ));

    let options = ReaderOptions {
        require_valid_tiff: false,
        ..ReaderOptions::default()
    };
    let reader = TiffReader::with_options(Cursor::new(not_a_tiff), options).unwrap();
    assert!(!reader.is_valid());
    assert_eq!(reader.image_count(), 0);
}

#[test]
fn bigtiff_preamble_is_validated() {
    // Offset size 4 instead of 8.
    let bytes = vec![0x49, 0x49, 0x2B, 0x00, 0x04, 0x00, 0x00, 0x00];
    assert!(matches!(
        TiffReader::new(Cursor::new(bytes)),
        Err(TiffError::HeaderError(_))
    ));
}

fn small_gray_ifd(writer: &TiffWriter<Cursor<Vec<u8>>>, width: u32, height: u32) -> tiletiff::Ifd {
    let mut ifd = writer.base_ifd();
    ifd.set(Tag::ImageWidth, Value::longs(&[width])).unwrap();
    ifd.set(Tag::ImageLength, Value::longs(&[height])).unwrap();
    ifd.set(Tag::BitsPerSample, Value::shorts(&[8])).unwrap();
    ifd.set(Tag::SamplesPerPixel, Value::shorts(&[1])).unwrap();
    ifd.set(
        Tag::PhotometricInterpretation,
        Value::shorts(&[PhotometricInterpretation::BlackIsZero.to_u16()]),
    )
    .unwrap();
    ifd
}

#[test]
fn emitted_ifds_land_on_even_offsets() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        writing_forward_allowed: false,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    // A 5x1 strip image leaves an odd payload length before each IFD.
    for round in 0..2 {
        let ifd = small_gray_ifd(&writer, 5, 1);
        let mut image = writer.new_image(ifd).unwrap();
        image
            .write_tile(TileIndex::flat(0, 0), &[round as u8; 5])
            .unwrap();
        image.finish().unwrap();
    }

    let bytes = writer.into_inner().into_inner();
    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.image_count(), 2);
    for index in 0..2 {
        let offset = reader.ifd(index).unwrap().file_offset_for_reading().unwrap();
        assert_eq!(offset % 2, 0, "IFD {} at odd offset {}", index, offset);
    }
}

#[test]
fn missing_tiles_zeroed_when_allowed() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        missing_tiles_allowed: true,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
    let mut ifd = small_gray_ifd(&writer, 32, 16);
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();

    let mut image = writer.new_image(ifd).unwrap();
    image
        .write_tile(TileIndex::flat(0, 0), &[7u8; 256])
        .unwrap();
    let ifd = image.finish().unwrap();
    assert_eq!(ifd.tile_offsets().unwrap()[1], 0);
    assert_eq!(ifd.tile_byte_counts().unwrap()[1], 0);

    let bytes = writer.into_inner().into_inner();

    // Strict readers refuse the hole.
    let mut reader = TiffReader::new(Cursor::new(bytes.clone())).unwrap();
    assert!(matches!(
        reader.read_tile(0, TileIndex::flat(1, 0)),
        Err(TiffError::FormatError(TiffFormatError::MissingTileData(_)))
    ));

    // Tolerant readers get filler pixels.
    let options = ReaderOptions {
        missing_tiles_allowed: true,
        byte_filler: 0xAB,
        ..ReaderOptions::default()
    };
    let mut reader = TiffReader::with_options(Cursor::new(bytes), options).unwrap();
    let slot = reader.read_tile(0, TileIndex::flat(1, 0)).unwrap();
    assert!(slot.decoded().unwrap().iter().all(|&b| b == 0xAB));
    assert_eq!(slot.file_range(), Some((0, 0)));
}

#[test]
fn unwritten_tiles_share_one_filler_tile() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        byte_filler: 0x55,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
    let mut ifd = small_gray_ifd(&writer, 32, 32);
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();

    let image = writer.new_image(ifd).unwrap();
    let ifd = image.finish().unwrap();

    let offsets = ifd.tile_offsets().unwrap();
    let counts = ifd.tile_byte_counts().unwrap();
    assert_eq!(offsets.len(), 4);
    // One materialized filler payload, reused for every missing slot.
    assert!(offsets.iter().all(|&o| o == offsets[0] && o != 0));
    assert!(counts.iter().all(|&c| c == 256));

    let bytes = writer.into_inner().into_inner();
    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    let slot = reader.read_tile(0, TileIndex::flat(1, 1)).unwrap();
    assert!(slot.decoded().unwrap().iter().all(|&b| b == 0x55));
}

#[test]
fn reversed_fill_order_round_trips() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
    let mut ifd = small_gray_ifd(&writer, 16, 16);
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();
    ifd.set(Tag::FillOrder, Value::shorts(&[2])).unwrap();

    let tile: Vec<u8> = (0..256).map(|i| i as u8).collect();
    let mut image = writer.new_image(ifd).unwrap();
    image.write_tile(TileIndex::flat(0, 0), &tile).unwrap();
    let ifd = image.finish().unwrap();
    let offset = ifd.tile_offsets().unwrap()[0] as usize;

    let bytes = writer.into_inner().into_inner();
    // Stored bytes carry reversed bit order: 0x01 becomes 0x80.
    assert_eq!(bytes[offset + 1], 0x80);

    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    let slot = reader.read_tile(0, TileIndex::flat(0, 0)).unwrap();
    assert_eq!(slot.decoded().unwrap(), &tile[..]);
}

#[test]
fn sub_ifds_are_collected_but_not_chained() {
    // Main IFD at 8 with a SubIFDs entry pointing at 50; the sub-IFD's own
    // next pointer leads nowhere we should follow.
    let mut builder = FileBuilder::classic_le(8);
    builder.u16(2);
    builder.entry(Tag::ImageWidth.to_u16(), Type::LONG, 1, 1);
    builder.entry(Tag::SubIfd.to_u16(), Type::IFD, 1, 50);
    builder.u32(0); // end of main chain
    while builder.bytes.len() < 50 {
        builder.bytes.push(0);
    }
    builder.u16(1);
    builder.entry(Tag::NewSubfileType.to_u16(), Type::LONG, 1, 1);
    builder.u32(0);

    let mut reader = TiffReader::new(Cursor::new(builder.bytes)).unwrap();
    assert_eq!(reader.image_count(), 1);
    assert_eq!(reader.sub_ifds().len(), 1);
    assert_eq!(reader.sub_ifds()[0].sub_ifd_type(), Some(1));
    assert!(reader.ifd(0).is_ok());
}

#[cfg(feature = "jpeg")]
#[test]
fn jpeg_tile_without_soi_is_corrupt() {
    // JPEG-compressed tile whose payload does not begin with an SOI marker;
    // the tables themselves are a well-formed (empty) stream.
    let mut builder = FileBuilder::classic_le(8);
    builder.u16(11);
    builder.entry(Tag::ImageWidth.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::ImageLength.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::BitsPerSample.to_u16(), Type::SHORT, 1, 8);
    builder.entry(Tag::Compression.to_u16(), Type::SHORT, 1, 7);
    builder.entry(
        Tag::PhotometricInterpretation.to_u16(),
        Type::SHORT,
        1,
        PhotometricInterpretation::BlackIsZero.to_u16() as u32,
    );
    builder.entry(Tag::SamplesPerPixel.to_u16(), Type::SHORT, 1, 1);
    builder.entry(Tag::TileWidth.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::TileLength.to_u16(), Type::LONG, 1, 16);
    builder.entry(Tag::TileOffsets.to_u16(), Type::LONG, 1, 146);
    builder.entry(Tag::TileByteCounts.to_u16(), Type::LONG, 1, 4);
    builder.entry(
        Tag::JPEGTables.to_u16(),
        Type::UNDEFINED,
        4,
        u32::from_le_bytes([0xFF, 0xD8, 0xFF, 0xD9]),
    );
    builder.u32(0);
    assert_eq!(builder.bytes.len(), 146);
    builder.bytes.extend_from_slice(&[0x00, 0x01, 0x02, 0x03]);

    let mut reader = TiffReader::new(Cursor::new(builder.bytes)).unwrap();
    assert!(matches!(
        reader.read_tile(0, TileIndex::flat(0, 0)),
        Err(TiffError::FormatError(TiffFormatError::JpegSoiMissing))
    ));
}

#[test]
fn writer_rewrites_chain_links() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();
    for value in [1u8, 2, 3] {
        let ifd = small_gray_ifd(&writer, 4, 1);
        let mut image = writer.new_image(ifd).unwrap();
        image.write_tile(TileIndex::flat(0, 0), &[value; 4]).unwrap();
        image.finish().unwrap();
    }

    let bytes = writer.into_inner().into_inner();
    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.image_count(), 3);
    // The last directory terminates the chain.
    let last = reader.ifd(2).unwrap();
    assert_eq!(last.next_ifd(), None);
    for (index, expected) in [1u8, 2, 3].iter().enumerate() {
        let image = reader.read_image(index).unwrap();
        assert!(image.data.iter().all(|&b| b == *expected));
    }
}
