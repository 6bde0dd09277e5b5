use crate::codec::{Codec, CodecContext};
use crate::{CodecError, TiffResult};

/// Codec for Apple's `PackBits` run-length format[^note].
///
/// [^note]: PackBits is often ineffective on continuous tone images,
///          including many grayscale images. In such cases, it is better
///          to leave the image uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Packbits;

impl Codec for Packbits {
    fn decode(&self, data: &[u8], ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        let mut out = Vec::with_capacity(ctx.expected_len);
        let mut at = 0usize;
        while at < data.len() {
            let header = data[at] as i8;
            at += 1;
            if header >= 0 {
                let count = header as usize + 1;
                if at + count > data.len() {
                    return Err(CodecError::Decode("literal run past end".into()).into());
                }
                out.extend_from_slice(&data[at..at + count]);
                at += count;
            } else if header != -128 {
                let count = 1 - header as isize;
                let Some(&value) = data.get(at) else {
                    return Err(CodecError::Decode("repeat run past end".into()).into());
                };
                at += 1;
                out.extend(std::iter::repeat(value).take(count as usize));
            }
            // header == -128 is a no-op.
        }
        Ok(out)
    }

    // Inspired by https://github.com/skirridsystems/packbits
    fn encode(&self, bytes: &[u8], _ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        const MIN_REPT: u8 = 3; // Minimum run to compress between differ blocks
        const MAX_BYTES: u8 = 128; // Maximum number of bytes that can be encoded in a header byte

        // Encoding for header byte based on number of bytes represented.
        fn encode_diff(n: u8) -> u8 {
            n - 1
        }
        fn encode_rept(n: u8) -> u8 {
            (256 - (n - 1) as u16) as u8
        }

        if bytes.is_empty() {
            return Err(CodecError::Encode("empty input".into()).into());
        }

        let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 128 + 1);

        let mut src_index: usize = 0; // Index of the current byte
        let mut src_count = bytes.len(); // The number of bytes remaining to be compressed

        let mut in_run = false; // Indication whether counting of similar bytes is performed
        let mut run_index = 0u8; // Distance into pending bytes that a run starts

        let mut bytes_pending = 0u8; // Bytes looked at but not yet output
        let mut pending_index = 0usize; // Index of the first pending byte

        let mut curr_byte: u8; // Byte currently being considered
        let mut last_byte: u8; // Previous byte

        // Prime compressor with first character.
        last_byte = bytes[src_index];
        src_index += 1;
        bytes_pending += 1;

        while src_count - 1 != 0 {
            src_count -= 1;
            curr_byte = bytes[src_index];
            src_index += 1;
            bytes_pending += 1;

            if in_run {
                if (curr_byte != last_byte) || (bytes_pending > MAX_BYTES) {
                    out.push(encode_rept(bytes_pending - 1));
                    out.push(last_byte);

                    bytes_pending = 1;
                    pending_index = src_index - 1;
                    run_index = 0;
                    in_run = false;
                }
            } else if bytes_pending > MAX_BYTES {
                // We have as much differing data as we can output in one chunk.
                // Output MAX_BYTES leaving one byte.
                out.push(encode_diff(MAX_BYTES));
                out.extend_from_slice(&bytes[pending_index..pending_index + MAX_BYTES as usize]);

                pending_index += MAX_BYTES as usize;
                bytes_pending -= MAX_BYTES;
                run_index = bytes_pending - 1; // A run could start here
            } else if curr_byte == last_byte {
                if (bytes_pending - run_index >= MIN_REPT) || (run_index == 0) {
                    // This is a worthwhile run
                    if run_index != 0 {
                        // Flush differing data out of input buffer
                        out.push(encode_diff(run_index));
                        out.extend_from_slice(
                            &bytes[pending_index..pending_index + run_index as usize],
                        );
                    }
                    bytes_pending -= run_index; // Length of run
                    in_run = true;
                }
            } else {
                run_index = bytes_pending - 1; // A run could start here
            }
            last_byte = curr_byte;
        }

        // Output the remainder
        if in_run {
            out.push(encode_rept(bytes_pending));
            out.push(last_byte);
        } else {
            out.push(encode_diff(bytes_pending));
            out.extend_from_slice(&bytes[pending_index..pending_index + bytes_pending as usize]);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{test_ctx, TEST_DATA};

    #[test]
    fn decode_reference_stream() {
        let encoded = vec![
            0xFEu8, 0xAA, 0x02, 0x80, 0x00, 0x2A, 0xFD, 0xAA, 0x03, 0x80, 0x00, 0x2A, 0x22,
            0xF7, 0xAA,
        ];
        let expected = vec![
            0xAAu8, 0xAA, 0xAA, 0x80, 0x00, 0x2A, 0xAA, 0xAA, 0xAA, 0xAA, 0x80, 0x00, 0x2A,
            0x22, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
        ];
        let decoded = Packbits.decode(&encoded, &test_ctx(expected.len())).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn encode_single_byte() {
        let out = Packbits.encode(&[0x3F], &test_ctx(1)).unwrap();
        assert_eq!(out, vec![0x00, 0x3F]);
    }

    #[test]
    fn encode_repetitive_sequence() {
        const UNCOMPRESSED_DATA: &[u8] =
            b"This strrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrrring hangs.";
        const EXPECTED: &[u8] = b"\x06This st\xD1r\x09ing hangs.";
        let out = Packbits
            .encode(UNCOMPRESSED_DATA, &test_ctx(UNCOMPRESSED_DATA.len()))
            .unwrap();
        assert_eq!(out, EXPECTED);
    }

    #[test]
    fn round_trip_test_string() {
        let ctx = test_ctx(TEST_DATA.len());
        let encoded = Packbits.encode(TEST_DATA, &ctx).unwrap();
        let decoded = Packbits.decode(&encoded, &ctx).unwrap();
        assert_eq!(decoded, TEST_DATA);
    }
}
