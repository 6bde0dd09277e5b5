//! Compression dispatch for tile payloads
//!
//! Every compression scheme is a [`Codec`] working on whole byte buffers.
//! A [`CodecRegistry`] maps TIFF compression codes to codecs; additional
//! codecs (CCITT, JPEG 2000, vendor schemes) can be registered at runtime
//! through the builder without touching this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::tags::CompressionMethod;
use crate::{CodecError, TiffError, TiffFormatError, TiffResult};

#[cfg(feature = "deflate")]
mod deflate;
#[cfg(feature = "jpeg")]
mod jpeg;
#[cfg(feature = "lzw")]
mod lzw;
mod packbits;
mod uncompressed;

#[cfg(feature = "deflate")]
pub use self::deflate::{Deflate, DeflateLevel};
#[cfg(feature = "jpeg")]
pub use self::jpeg::Jpeg;
#[cfg(feature = "lzw")]
pub use self::lzw::Lzw;
pub use self::packbits::Packbits;
pub use self::uncompressed::Uncompressed;

/// Everything a codec may need besides the payload itself.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    /// Decoded byte count the tile geometry implies.
    pub expected_len: usize,
    pub tile_width: u32,
    pub tile_length: u32,
    /// Channels stored in the tile.
    pub samples: u16,
    /// Codec-specific quality knob from the writer options.
    pub quality: Option<f32>,
    /// Shared JPEG table stream, already validated.
    pub jpeg_tables: Option<&'a [u8]>,
}

/// A compression scheme over byte buffers.
pub trait Codec: Send + Sync {
    fn decode(&self, data: &[u8], ctx: &CodecContext) -> TiffResult<Vec<u8>>;
    fn encode(&self, data: &[u8], ctx: &CodecContext) -> TiffResult<Vec<u8>>;
}

/// Maps compression codes to codecs.
pub struct CodecRegistry {
    codecs: BTreeMap<u16, Arc<dyn Codec>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codes", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        CodecRegistry::builder().build()
    }
}

impl CodecRegistry {
    /// A builder preloaded with the built-in codecs.
    pub fn builder() -> CodecRegistryBuilder {
        let mut codecs: BTreeMap<u16, Arc<dyn Codec>> = BTreeMap::new();
        codecs.insert(
            CompressionMethod::None.to_u16(),
            Arc::new(Uncompressed),
        );
        codecs.insert(CompressionMethod::PackBits.to_u16(), Arc::new(Packbits));
        #[cfg(feature = "deflate")]
        {
            codecs.insert(
                CompressionMethod::Deflate.to_u16(),
                Arc::new(Deflate::default()),
            );
            codecs.insert(
                CompressionMethod::OldDeflate.to_u16(),
                Arc::new(Deflate::default()),
            );
        }
        #[cfg(feature = "lzw")]
        codecs.insert(CompressionMethod::LZW.to_u16(), Arc::new(Lzw));
        #[cfg(feature = "jpeg")]
        codecs.insert(CompressionMethod::ModernJPEG.to_u16(), Arc::new(Jpeg));
        CodecRegistryBuilder { codecs }
    }

    pub fn get(&self, code: u16) -> TiffResult<&Arc<dyn Codec>> {
        self.codecs
            .get(&code)
            .ok_or_else(|| TiffError::CodecError(CodecError::UnknownCompressionCode(code)))
    }

    /// Decodes one tile payload, prepending the shared JPEG tables first
    /// when the image carries them.
    pub fn decode_tile(
        &self,
        code: u16,
        data: &[u8],
        ctx: &CodecContext,
    ) -> TiffResult<Vec<u8>> {
        let codec = self.get(code)?;
        if code == CompressionMethod::ModernJPEG.to_u16() {
            if let Some(tables) = ctx.jpeg_tables {
                let merged = merge_jpeg_tables(tables, data)?;
                return codec.decode(&merged, ctx);
            }
        }
        codec.decode(data, ctx)
    }

    pub fn encode_tile(
        &self,
        code: u16,
        data: &[u8],
        ctx: &CodecContext,
    ) -> TiffResult<Vec<u8>> {
        self.get(code)?.encode(data, ctx)
    }
}

/// Builder for a [`CodecRegistry`]; starts with the built-in codecs.
pub struct CodecRegistryBuilder {
    codecs: BTreeMap<u16, Arc<dyn Codec>>,
}

impl CodecRegistryBuilder {
    /// Registers `codec` for `code`, replacing any earlier registration.
    pub fn register(mut self, code: u16, codec: Arc<dyn Codec>) -> Self {
        self.codecs.insert(code, codec);
        self
    }

    pub fn build(self) -> CodecRegistry {
        CodecRegistry {
            codecs: self.codecs,
        }
    }
}

/// Splices the shared JPEG table stream into one tile's payload.
///
/// JPEG compression in TIFF allows saving quantization and huffman tables in
/// one central location. The tables are simply prepended to the remaining
/// image data, except that both fragments carry their own SOI marker and the
/// tables end with an EOI marker; one of each pair has to go. The combined
/// stream is the tables minus their trailing EOI, followed by the tile data
/// minus its leading SOI.
pub fn merge_jpeg_tables(tables: &[u8], data: &[u8]) -> TiffResult<Vec<u8>> {
    if tables.len() < 4 || tables[..2] != [0xFF, 0xD8] || tables[tables.len() - 2..] != [0xFF, 0xD9]
    {
        return Err(TiffError::FormatError(TiffFormatError::InvalidJpegTables));
    }
    if data.len() < 2 || data[..2] != [0xFF, 0xD8] {
        return Err(TiffError::FormatError(TiffFormatError::JpegSoiMissing));
    }
    let mut merged = Vec::with_capacity(tables.len() + data.len() - 4);
    merged.extend_from_slice(&tables[..tables.len() - 2]);
    merged.extend_from_slice(&data[2..]);
    Ok(merged)
}
