//! Horizontal differencing over single scanlines
//!
//! Each sample is replaced by its difference to the previous sample of the
//! same channel on the same row. Multi-byte samples are interpreted in the
//! file's byte order; binary rows difference by XOR.

use crate::stream::ByteOrder;
use crate::tags::Predictor;
use crate::{TiffError, TiffResult, TiffUnsupportedError};

/// Checks that the horizontal predictor is defined for the given layout.
///
/// Supported widths are 1 bit (single channel) and the byte-aligned 8, 16,
/// 32 and 64 bit widths. Anything else, and any predictor other than `None`
/// or `Horizontal`, is fatal.
pub(crate) fn validate(
    predictor: Predictor,
    bits_per_sample: &[u16],
    samples_per_pixel: u16,
) -> TiffResult<()> {
    match predictor {
        Predictor::None => Ok(()),
        Predictor::Horizontal => {
            let supported = match bits_per_sample.first().copied() {
                Some(1) => samples_per_pixel == 1 && bits_per_sample == [1],
                Some(8) | Some(16) | Some(32) | Some(64) => {
                    bits_per_sample.windows(2).all(|w| w[0] == w[1])
                }
                _ => false,
            };
            if supported {
                Ok(())
            } else {
                Err(TiffUnsupportedError::HorizontalPredictorWithBits(
                    bits_per_sample.to_vec(),
                )
                .into())
            }
        }
        Predictor::FloatingPoint => {
            Err(TiffError::UnsupportedError(TiffUnsupportedError::FloatingPointPredictor))
        }
    }
}

#[inline]
fn get_bit(row: &[u8], index: usize) -> bool {
    (row[index / 8] >> (7 - index % 8)) & 1 != 0
}

#[inline]
fn set_bit(row: &mut [u8], index: usize, value: bool) {
    let mask = 1u8 << (7 - index % 8);
    if value {
        row[index / 8] |= mask;
    } else {
        row[index / 8] &= !mask;
    }
}

macro_rules! hpredict_int {
    ($row:expr, $byte_order:expr, $samples:expr, $ty:ty, $undo:expr) => {{
        const WIDTH: usize = std::mem::size_of::<$ty>();
        let stride = WIDTH * $samples;
        let read = |row: &[u8], at: usize| -> $ty {
            let bytes: [u8; WIDTH] = row[at..at + WIDTH].try_into().unwrap();
            match $byte_order {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(bytes),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(bytes),
            }
        };
        let write = |row: &mut [u8], at: usize, value: $ty| {
            let bytes = match $byte_order {
                ByteOrder::LittleEndian => value.to_le_bytes(),
                ByteOrder::BigEndian => value.to_be_bytes(),
            };
            row[at..at + WIDTH].copy_from_slice(&bytes);
        };
        if $undo {
            let mut at = stride;
            while at + WIDTH <= $row.len() {
                let value = read($row, at).wrapping_add(read($row, at - stride));
                write($row, at, value);
                at += WIDTH;
            }
        } else {
            let mut at = ($row.len() / WIDTH) * WIDTH;
            while at > stride {
                at -= WIDTH;
                let value = read($row, at).wrapping_sub(read($row, at - stride));
                write($row, at, value);
            }
        }
    }};
}

fn transform_row(
    row: &mut [u8],
    bits_per_sample: u16,
    samples_per_pixel: usize,
    byte_order: ByteOrder,
    undo: bool,
) {
    match bits_per_sample {
        1 => {
            let bit_count = row.len() * 8;
            if undo {
                let mut previous = get_bit(row, 0);
                for index in 1..bit_count {
                    let current = get_bit(row, index) ^ previous;
                    set_bit(row, index, current);
                    previous = current;
                }
            } else {
                for index in (1..bit_count).rev() {
                    let value = get_bit(row, index) ^ get_bit(row, index - 1);
                    set_bit(row, index, value);
                }
            }
        }
        8 => {
            if undo {
                for index in samples_per_pixel..row.len() {
                    row[index] = row[index].wrapping_add(row[index - samples_per_pixel]);
                }
            } else {
                for index in (samples_per_pixel..row.len()).rev() {
                    row[index] = row[index].wrapping_sub(row[index - samples_per_pixel]);
                }
            }
        }
        16 => hpredict_int!(row, byte_order, samples_per_pixel, u16, undo),
        32 => hpredict_int!(row, byte_order, samples_per_pixel, u32, undo),
        64 => hpredict_int!(row, byte_order, samples_per_pixel, u64, undo),
        _ => unreachable!("predictor layout should have been validated"),
    }
}

/// Reverses horizontal differencing on one scanline after decompression.
pub(crate) fn undo_horizontal_row(
    row: &mut [u8],
    bits_per_sample: u16,
    samples_per_pixel: usize,
    byte_order: ByteOrder,
) {
    transform_row(row, bits_per_sample, samples_per_pixel, byte_order, true)
}

/// Applies horizontal differencing to one scanline before compression.
pub(crate) fn apply_horizontal_row(
    row: &mut [u8],
    bits_per_sample: u16,
    samples_per_pixel: usize,
    byte_order: ByteOrder,
) {
    transform_row(row, bits_per_sample, samples_per_pixel, byte_order, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(bits: u16, samples: usize, byte_order: ByteOrder, row: &[u8]) {
        let mut transformed = row.to_vec();
        apply_horizontal_row(&mut transformed, bits, samples, byte_order);
        undo_horizontal_row(&mut transformed, bits, samples, byte_order);
        assert_eq!(transformed, row, "bits={} samples={}", bits, samples);
    }

    #[test]
    fn known_byte_differences() {
        let mut row = vec![10u8, 20, 30, 45];
        apply_horizontal_row(&mut row, 8, 1, ByteOrder::LittleEndian);
        assert_eq!(row, vec![10, 10, 10, 15]);
        undo_horizontal_row(&mut row, 8, 1, ByteOrder::LittleEndian);
        assert_eq!(row, vec![10, 20, 30, 45]);
    }

    #[test]
    fn rgb_differences_use_channel_stride() {
        let mut row = vec![100u8, 50, 25, 110, 60, 20];
        apply_horizontal_row(&mut row, 8, 3, ByteOrder::LittleEndian);
        assert_eq!(row, vec![100, 50, 25, 10, 10, 251]);
        undo_horizontal_row(&mut row, 8, 3, ByteOrder::LittleEndian);
        assert_eq!(row, vec![100, 50, 25, 110, 60, 20]);
    }

    #[test]
    fn round_trips_all_supported_widths() {
        let row8: Vec<u8> = (0..24).map(|i| (i * 7 + 3) as u8).collect();
        round_trip(8, 3, ByteOrder::LittleEndian, &row8);

        let mut row16 = Vec::new();
        for i in 0u16..12 {
            row16.extend_from_slice(&(i * 1000 + 17).to_be_bytes());
        }
        round_trip(16, 2, ByteOrder::BigEndian, &row16);

        let mut row32 = Vec::new();
        for i in 0u32..8 {
            row32.extend_from_slice(&(i * 100_000 + 5).to_le_bytes());
        }
        round_trip(32, 1, ByteOrder::LittleEndian, &row32);

        let mut row64 = Vec::new();
        for i in 0u64..6 {
            row64.extend_from_slice(&(i * 10_000_000_000 + 3).to_be_bytes());
        }
        round_trip(64, 3, ByteOrder::BigEndian, &row64);
    }

    #[test]
    fn binary_rows_difference_by_xor() {
        let row = vec![0b1011_0010u8, 0b0111_1111];
        round_trip(1, 1, ByteOrder::LittleEndian, &row);

        let mut encoded = vec![0b1111_0000u8];
        undo_horizontal_row(&mut encoded, 1, 1, ByteOrder::LittleEndian);
        // Cumulative XOR of 1111 0000 is 1010 0000.
        assert_eq!(encoded, vec![0b1010_0000]);
    }

    #[test]
    fn unsupported_layouts_are_rejected() {
        assert!(validate(Predictor::Horizontal, &[4], 1).is_err());
        assert!(validate(Predictor::Horizontal, &[1, 1], 2).is_err());
        assert!(validate(Predictor::FloatingPoint, &[32], 1).is_err());
        assert!(validate(Predictor::Horizontal, &[16, 16, 16], 3).is_ok());
        assert!(validate(Predictor::None, &[13], 1).is_ok());
    }
}
