//! End-to-end write/read round trips over in-memory files

use std::io::Cursor;

use tiletiff::tags::{CompressionMethod, PhotometricInterpretation, Predictor, Tag};
use tiletiff::{
    ByteOrder, ReaderOptions, TiffReader, TiffWriter, TileIndex, Value, WriterOptions,
};

/// Channel-separated planes of one 16x16 RGB tile cut out of `image`,
/// padded with zero outside the image.
fn rgb_tile_planes(
    image: &[[u8; 3]],
    width: usize,
    height: usize,
    tx: usize,
    ty: usize,
) -> Vec<u8> {
    let mut planes = vec![0u8; 16 * 16 * 3];
    for row in 0..16 {
        for col in 0..16 {
            let (x, y) = (tx * 16 + col, ty * 16 + row);
            if x < width && y < height {
                let pixel = image[y * width + x];
                for channel in 0..3 {
                    planes[channel * 256 + row * 16 + col] = pixel[channel];
                }
            }
        }
    }
    planes
}

#[test]
fn classic_le_rgb_tiled_17x17() {
    let (width, height) = (17usize, 17usize);
    let image: Vec<[u8; 3]> = (0..width * height)
        .map(|i| [(i % 251) as u8, (i * 7 % 253) as u8, (i * 13 % 255) as u8])
        .collect();

    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    let mut ifd = writer.base_ifd();
    ifd.set(Tag::ImageWidth, Value::longs(&[17])).unwrap();
    ifd.set(Tag::ImageLength, Value::longs(&[17])).unwrap();
    ifd.set(Tag::BitsPerSample, Value::shorts(&[8, 8, 8])).unwrap();
    ifd.set(Tag::SamplesPerPixel, Value::shorts(&[3])).unwrap();
    ifd.set(
        Tag::PhotometricInterpretation,
        Value::shorts(&[PhotometricInterpretation::RGB.to_u16()]),
    )
    .unwrap();
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();

    let mut image_writer = writer.new_image(ifd).unwrap();
    for ty in 0..2 {
        for tx in 0..2 {
            let planes = rgb_tile_planes(&image, width, height, tx, ty);
            image_writer
                .write_tile(TileIndex::flat(tx as u32, ty as u32), &planes)
                .unwrap();
        }
    }
    image_writer.finish().unwrap();

    let bytes = writer.into_inner().into_inner();

    // Little-endian classic header; forward writing puts the first IFD
    // right behind it.
    assert_eq!(&bytes[..4], &[0x49, 0x49, 0x2A, 0x00]);
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 8);

    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    assert!(reader.is_valid());
    assert!(!reader.is_big_tiff());
    assert_eq!(reader.image_count(), 1);

    let ifd = reader.ifd(0).unwrap();
    assert_eq!(ifd.image_width().unwrap(), 17);
    assert_eq!(ifd.image_height().unwrap(), 17);
    assert_eq!(ifd.bits_per_sample().unwrap(), vec![8, 8, 8]);
    assert_eq!(ifd.samples_per_pixel().unwrap(), 3);
    assert_eq!(ifd.compression().unwrap(), CompressionMethod::None);
    assert_eq!(
        ifd.photometric().unwrap(),
        PhotometricInterpretation::RGB
    );
    assert_eq!(ifd.tile_width().unwrap(), 16);
    assert_eq!(ifd.tile_length().unwrap(), 16);
    assert_eq!(ifd.tile_count().unwrap(), 4);
    assert_eq!(reader.tile_map(0).unwrap().grid(), (2, 2));

    // Without boundary cropping, tiles come back at their full declared
    // size; the corner tile holds data only in its 1x1 region.
    let corner = reader.read_tile(0, TileIndex::flat(1, 1)).unwrap();
    assert_eq!((corner.size_x(), corner.size_y()), (16, 16));
    let corner_data = corner.decoded().unwrap();
    assert_eq!(corner_data.len(), 16 * 16 * 3);
    assert_eq!(corner_data[0], image[16 * 17 + 16][0]);
    assert_eq!(corner_data[1], 0);

    // Caller assembly of all tiles yields the original image.
    let assembled = reader.read_image(0).unwrap();
    assert_eq!((assembled.width, assembled.height), (17, 17));
    assert!(!assembled.interleaved);
    let plane = 17 * 17;
    for (i, pixel) in image.iter().enumerate() {
        for channel in 0..3 {
            assert_eq!(assembled.data[channel * plane + i], pixel[channel]);
        }
    }
}

#[cfg(feature = "deflate")]
#[test]
fn bigtiff_be_gray16_deflate_predictor_strips() {
    let (width, height) = (512usize, 512usize);
    let ramp: Vec<u16> = (0..width * height).map(|i| (i % 65536) as u16).collect();

    let options = WriterOptions {
        byte_order: ByteOrder::BigEndian,
        big_tiff: true,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    let mut ifd = writer.base_ifd();
    ifd.set(Tag::ImageWidth, Value::longs(&[512])).unwrap();
    ifd.set(Tag::ImageLength, Value::longs(&[512])).unwrap();
    ifd.set(Tag::BitsPerSample, Value::shorts(&[16])).unwrap();
    ifd.set(Tag::SamplesPerPixel, Value::shorts(&[1])).unwrap();
    ifd.set(
        Tag::PhotometricInterpretation,
        Value::shorts(&[PhotometricInterpretation::BlackIsZero.to_u16()]),
    )
    .unwrap();
    ifd.set(
        Tag::Compression,
        Value::shorts(&[CompressionMethod::Deflate.to_u16()]),
    )
    .unwrap();
    ifd.set(Tag::Predictor, Value::shorts(&[Predictor::Horizontal.to_u16()]))
        .unwrap();
    ifd.set(Tag::RowsPerStrip, Value::longs(&[128])).unwrap();

    let mut image_writer = writer.new_image(ifd).unwrap();
    assert_eq!(image_writer.tile_map().grid(), (1, 4));
    for strip in 0..4usize {
        let mut native = Vec::with_capacity(512 * 128 * 2);
        for value in &ramp[strip * 512 * 128..(strip + 1) * 512 * 128] {
            native.extend_from_slice(&value.to_ne_bytes());
        }
        image_writer
            .write_tile(TileIndex::flat(0, strip as u32), &native)
            .unwrap();
    }
    image_writer.finish().unwrap();

    let bytes = writer.into_inner().into_inner();
    assert_eq!(&bytes[..4], &[0x4D, 0x4D, 0x00, 0x2B]);

    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    assert!(reader.is_big_tiff());
    let ifd = reader.ifd(0).unwrap();
    assert_eq!(ifd.predictor().unwrap(), Predictor::Horizontal);
    assert_eq!(ifd.rows_per_strip().unwrap(), 128);

    // Exact equality of every pixel; the predictor restarts per strip, so
    // values across strip boundaries prove independent reversal.
    let assembled = reader.read_image(0).unwrap();
    for (i, &expected) in ramp.iter().enumerate() {
        let actual = u16::from_ne_bytes(assembled.data[i * 2..i * 2 + 2].try_into().unwrap());
        assert_eq!(actual, expected, "pixel {}", i);
    }
}

#[test]
fn uncompressed_tile_bytes_match_exactly() {
    // With compression NONE and no predictor the stored payload is the
    // packed sample data, byte for byte.
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    let mut ifd = writer.base_ifd();
    ifd.set(Tag::ImageWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::ImageLength, Value::longs(&[16])).unwrap();
    ifd.set(Tag::BitsPerSample, Value::shorts(&[8])).unwrap();
    ifd.set(Tag::SamplesPerPixel, Value::shorts(&[1])).unwrap();
    ifd.set(
        Tag::PhotometricInterpretation,
        Value::shorts(&[PhotometricInterpretation::BlackIsZero.to_u16()]),
    )
    .unwrap();
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();

    let tile: Vec<u8> = (0..256).map(|i| (i * 3 % 256) as u8).collect();
    let mut image_writer = writer.new_image(ifd).unwrap();
    image_writer.write_tile(TileIndex::flat(0, 0), &tile).unwrap();
    image_writer.finish().unwrap();

    let bytes = writer.into_inner().into_inner();
    let mut reader = TiffReader::new(Cursor::new(bytes.clone())).unwrap();
    let ifd = reader.ifd(0).unwrap();
    let offsets = ifd.tile_offsets().unwrap();
    let counts = ifd.tile_byte_counts().unwrap();
    assert_eq!(counts, vec![256]);
    let stored = &bytes[offsets[0] as usize..][..256];
    assert_eq!(stored, &tile[..]);

    let slot = reader.read_tile(0, TileIndex::flat(0, 0)).unwrap();
    assert_eq!(slot.decoded().unwrap(), &tile[..]);
    assert_eq!(slot.file_range(), Some((offsets[0], 256)));
}

#[test]
fn planar_rgb_round_trip() {
    let (width, height) = (16usize, 16usize);
    let planes: Vec<Vec<u8>> = (0..3)
        .map(|c| (0..width * height).map(|i| ((i + c * 50) % 256) as u8).collect())
        .collect();

    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    let mut ifd = writer.base_ifd();
    ifd.set(Tag::ImageWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::ImageLength, Value::longs(&[16])).unwrap();
    ifd.set(Tag::BitsPerSample, Value::shorts(&[8, 8, 8])).unwrap();
    ifd.set(Tag::SamplesPerPixel, Value::shorts(&[3])).unwrap();
    ifd.set(Tag::PlanarConfiguration, Value::shorts(&[2])).unwrap();
    ifd.set(
        Tag::PhotometricInterpretation,
        Value::shorts(&[PhotometricInterpretation::RGB.to_u16()]),
    )
    .unwrap();
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();

    let mut image_writer = writer.new_image(ifd).unwrap();
    assert_eq!(image_writer.tile_map().planes(), 3);
    for (plane, data) in planes.iter().enumerate() {
        image_writer
            .write_tile(TileIndex::new(plane as u16, 0, 0), data)
            .unwrap();
    }
    image_writer.finish().unwrap();

    let bytes = writer.into_inner().into_inner();
    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    // Positioning arrays cover all three planes.
    assert_eq!(reader.ifd(0).unwrap().tile_count().unwrap(), 3);

    for (plane, data) in planes.iter().enumerate() {
        let slot = reader
            .read_tile(0, TileIndex::new(plane as u16, 0, 0))
            .unwrap();
        assert_eq!(slot.samples_per_pixel(), 1);
        assert_eq!(slot.decoded().unwrap(), &data[..]);
    }

    let assembled = reader.read_image(0).unwrap();
    for (plane, data) in planes.iter().enumerate() {
        assert_eq!(
            &assembled.data[plane * width * height..][..width * height],
            &data[..]
        );
    }
}

#[test]
fn single_call_write_image_round_trips() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    // 9x5 RGB planes in one call.
    let planes: Vec<u8> = (0..9 * 5 * 3).map(|i| (i * 11 % 256) as u8).collect();
    let ifd = writer
        .write_image(9, 5, &[8, 8, 8], PhotometricInterpretation::RGB, &planes)
        .unwrap();
    assert_eq!(ifd.rows_per_strip().unwrap(), 5);

    let bytes = writer.into_inner().into_inner();
    let mut reader = TiffReader::new(Cursor::new(bytes)).unwrap();
    let image = reader.read_image(0).unwrap();
    assert_eq!((image.width, image.height, image.samples), (9, 5, 3));
    assert_eq!(image.data, planes);
}

#[test]
fn interleaved_results_on_request() {
    let options = WriterOptions {
        byte_order: ByteOrder::LittleEndian,
        ..WriterOptions::default()
    };
    let mut writer = TiffWriter::new(Cursor::new(Vec::new()), options).unwrap();

    let mut ifd = writer.base_ifd();
    ifd.set(Tag::ImageWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::ImageLength, Value::longs(&[16])).unwrap();
    ifd.set(Tag::BitsPerSample, Value::shorts(&[8, 8, 8])).unwrap();
    ifd.set(Tag::SamplesPerPixel, Value::shorts(&[3])).unwrap();
    ifd.set(
        Tag::PhotometricInterpretation,
        Value::shorts(&[PhotometricInterpretation::RGB.to_u16()]),
    )
    .unwrap();
    ifd.set(Tag::TileWidth, Value::longs(&[16])).unwrap();
    ifd.set(Tag::TileLength, Value::longs(&[16])).unwrap();

    let planes: Vec<u8> = (0..16 * 16 * 3).map(|i| (i % 256) as u8).collect();
    let mut image_writer = writer.new_image(ifd).unwrap();
    image_writer.write_tile(TileIndex::flat(0, 0), &planes).unwrap();
    image_writer.finish().unwrap();

    let bytes = writer.into_inner().into_inner();
    let reader_options = ReaderOptions {
        interleave_results: true,
        ..ReaderOptions::default()
    };
    let mut reader = TiffReader::with_options(Cursor::new(bytes), reader_options).unwrap();
    let slot = reader.read_tile(0, TileIndex::flat(0, 0)).unwrap();
    assert!(slot.is_interleaved());
    let data = slot.decoded().unwrap();
    // First pixel: R from plane 0, G from plane 1, B from plane 2.
    assert_eq!(&data[..3], &[planes[0], planes[256], planes[512]]);
}
