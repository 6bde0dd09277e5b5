use zune_jpeg::zune_core::bytestream::ZCursor;
use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use crate::codec::{Codec, CodecContext};
use crate::tags::CompressionMethod;
use crate::{CodecError, TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};

/// Baseline JPEG tile decoding (compression code 7).
///
/// Shared tables from the `JPEGTables` tag are spliced in by the registry
/// before this codec runs, so the payload here is always one complete
/// abbreviated or interchange JPEG stream. Encoding is not provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Jpeg;

impl Codec for Jpeg {
    fn decode(&self, data: &[u8], ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        if data.len() < 2 || data[..2] != [0xFF, 0xD8] {
            return Err(TiffError::FormatError(TiffFormatError::JpegSoiMissing));
        }
        let colorspace = match ctx.samples {
            1 => ColorSpace::Luma,
            3 => ColorSpace::RGB,
            samples => {
                return Err(TiffError::UnsupportedError(
                    TiffUnsupportedError::JpegChannelCount(samples),
                ))
            }
        };
        let options = DecoderOptions::default().jpeg_set_out_colorspace(colorspace);
        let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
        decoder
            .decode()
            .map_err(|e| CodecError::Decode(e.to_string()).into())
    }

    fn encode(&self, _data: &[u8], _ctx: &CodecContext) -> TiffResult<Vec<u8>> {
        Err(TiffError::CodecError(CodecError::EncodingUnsupported(
            CompressionMethod::ModernJPEG.to_u16(),
        )))
    }
}
