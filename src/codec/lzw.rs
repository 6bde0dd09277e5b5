use weezl::{decode, encode, BitOrder};

use crate::codec::{Codec, CodecContext};
use crate::{CodecError, TiffResult};

/// TIFF-flavour LZW: MSB-first with the early code-size switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lzw;

impl Codec for Lzw {
    fn decode(&self, data: &[u8], ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        let mut decoder =
            decode::Configuration::with_tiff_size_switch(BitOrder::Msb, 8).build();
        let mut out = Vec::with_capacity(ctx.expected_len);
        let result = decoder.into_stream(&mut out).decode_all(data);
        result
            .status
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(out)
    }

    fn encode(&self, data: &[u8], _ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        let mut encoder = encode::Encoder::with_tiff_size_switch(BitOrder::Msb, 8);
        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        let result = encoder.into_stream(&mut out).encode_all(data);
        result
            .status
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{test_ctx, TEST_DATA};

    #[test]
    fn lzw_round_trip() {
        let codec = Lzw;
        let ctx = test_ctx(TEST_DATA.len());
        let compressed = codec.encode(TEST_DATA, &ctx).unwrap();
        // TIFF LZW streams always open with the clear code.
        assert_eq!(compressed[0], 0x80);
        let decompressed = codec.decode(&compressed, &ctx).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }
}
