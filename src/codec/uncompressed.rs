use crate::codec::{Codec, CodecContext};
use crate::TiffResult;

/// The no-op codec for compression code 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uncompressed;

impl Codec for Uncompressed {
    fn decode(&self, data: &[u8], _ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn encode(&self, data: &[u8], _ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}
