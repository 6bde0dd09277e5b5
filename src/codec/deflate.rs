use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression as FlateCompression;

use crate::codec::{Codec, CodecContext};
use crate::{CodecError, TiffResult};

/// The Deflate algorithm used to compress image data in TIFF files.
#[derive(Debug, Clone, Copy)]
pub struct Deflate {
    level: FlateCompression,
}

/// The level of compression used by the Deflate algorithm.
/// It allows trading compression ratio for compression speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[non_exhaustive]
pub enum DeflateLevel {
    /// The fastest possible compression mode.
    Fast = 1,
    /// The conservative choice between speed and ratio.
    #[default]
    Balanced = 6,
    /// The best compression available with Deflate.
    Best = 9,
}

impl Deflate {
    /// Create a new deflate codec with a specific level of compression.
    pub fn with_level(level: DeflateLevel) -> Self {
        Self {
            level: FlateCompression::new(level as u32),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Self::with_level(DeflateLevel::default())
    }
}

impl Codec for Deflate {
    fn decode(&self, data: &[u8], ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::with_capacity(ctx.expected_len);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(out)
    }

    fn encode(&self, data: &[u8], _ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| CodecError::Encode(e.to_string()).into())
    }
}
