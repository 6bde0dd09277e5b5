//! All IO functionality needed for TIFF decoding and encoding

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Byte order of the TIFF file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// little endian byte order
    LittleEndian,
    /// big endian byte order
    BigEndian,
}

/// Sinks that can change their length.
///
/// The writer truncates the file right after emitting the header so stale
/// data from an earlier, longer file cannot survive a rewrite.
pub trait Truncate {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().truncate(len);
        Ok(())
    }
}

impl<T: Truncate + ?Sized> Truncate for &mut T {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        (**self).truncate(len)
    }
}

/// Reader that is aware of the byte order.
#[derive(Debug)]
pub struct EndianReader<R> {
    reader: R,
    pub(crate) byte_order: ByteOrder,
}

macro_rules! read_fn {
    ($name:ident, $ty:ty, $bytes:expr) => {
        #[inline(always)]
        pub fn $name(&mut self) -> Result<$ty, io::Error> {
            let mut n = [0u8; $bytes];
            self.reader.read_exact(&mut n)?;
            Ok(match self.byte_order {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(n),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(n),
            })
        }
    };
}

impl<R: Read> EndianReader<R> {
    pub fn new(reader: R, byte_order: ByteOrder) -> Self {
        Self { reader, byte_order }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Switches the byte order mid-stream. Only meaningful before the order
    /// marker of a file has been interpreted.
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    pub fn inner(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads an u8
    #[inline(always)]
    pub fn read_u8(&mut self) -> Result<u8, io::Error> {
        let mut n = [0u8; 1];
        self.reader.read_exact(&mut n)?;
        Ok(n[0])
    }

    /// Reads an i8
    #[inline(always)]
    pub fn read_i8(&mut self) -> Result<i8, io::Error> {
        Ok(self.read_u8()? as i8)
    }

    read_fn!(read_u16, u16, 2);
    read_fn!(read_i16, i16, 2);
    read_fn!(read_u32, u32, 4);
    read_fn!(read_i32, i32, 4);
    read_fn!(read_u64, u64, 8);
    read_fn!(read_i64, i64, 8);

    /// Reads an f32
    #[inline(always)]
    pub fn read_f32(&mut self) -> Result<f32, io::Error> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads an f64
    #[inline(always)]
    pub fn read_f64(&mut self) -> Result<f64, io::Error> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    #[inline]
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), io::Error> {
        self.reader.read_exact(buf)
    }
}

impl<R: Read + Seek> EndianReader<R> {
    pub fn goto_offset(&mut self, offset: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn offset(&mut self) -> io::Result<u64> {
        self.reader.stream_position()
    }

    pub fn stream_len(&mut self) -> io::Result<u64> {
        let position = self.reader.stream_position()?;
        let len = self.reader.seek(SeekFrom::End(0))?;
        self.reader.seek(SeekFrom::Start(position))?;
        Ok(len)
    }
}

/// Writer that tracks its position and writes in a fixed byte order.
///
/// Unlike the reader, the position is tracked rather than queried: writing a
/// tile must not pay a seek per value.
#[derive(Debug)]
pub struct EndianWriter<W> {
    writer: W,
    byte_order: ByteOrder,
    offset: u64,
}

macro_rules! write_fn {
    ($name:ident, $ty:ty) => {
        #[inline(always)]
        pub fn $name(&mut self, n: $ty) -> Result<(), io::Error> {
            let bytes = match self.byte_order {
                ByteOrder::LittleEndian => n.to_le_bytes(),
                ByteOrder::BigEndian => n.to_be_bytes(),
            };
            self.writer.write_all(&bytes)?;
            self.offset += bytes.len() as u64;
            Ok(())
        }
    };
}

impl<W: Write + Seek> EndianWriter<W> {
    pub fn new(mut writer: W, byte_order: ByteOrder) -> io::Result<Self> {
        let offset = writer.stream_position()?;
        Ok(Self {
            writer,
            byte_order,
            offset,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn inner(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), io::Error> {
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    #[inline(always)]
    pub fn write_u8(&mut self, n: u8) -> Result<(), io::Error> {
        self.writer.write_all(&[n])?;
        self.offset += 1;
        Ok(())
    }

    #[inline(always)]
    pub fn write_i8(&mut self, n: i8) -> Result<(), io::Error> {
        self.write_u8(n as u8)
    }

    write_fn!(write_u16, u16);
    write_fn!(write_i16, i16);
    write_fn!(write_u32, u32);
    write_fn!(write_i32, i32);
    write_fn!(write_u64, u64);
    write_fn!(write_i64, i64);

    #[inline(always)]
    pub fn write_f32(&mut self, n: f32) -> Result<(), io::Error> {
        self.write_u32(n.to_bits())
    }

    #[inline(always)]
    pub fn write_f64(&mut self, n: f64) -> Result<(), io::Error> {
        self.write_u64(n.to_bits())
    }

    pub fn goto_offset(&mut self, offset: u64) -> Result<(), io::Error> {
        self.writer.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    pub fn goto_end(&mut self) -> Result<(), io::Error> {
        self.offset = self.writer.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// IFDs and value blocks must begin at even offsets.
    pub fn pad_to_even(&mut self) -> Result<(), io::Error> {
        if self.offset % 2 != 0 {
            self.write_u8(0)?;
        }
        Ok(())
    }
}

impl<W: Write + Seek + Truncate> EndianWriter<W> {
    pub fn truncate_here(&mut self) -> Result<(), io::Error> {
        let offset = self.offset;
        self.writer.truncate(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_honors_byte_order() {
        let data = [0x12u8, 0x34, 0x56, 0x78];
        let mut le = EndianReader::new(Cursor::new(data.to_vec()), ByteOrder::LittleEndian);
        assert_eq!(le.read_u32().unwrap(), 0x7856_3412);
        let mut be = EndianReader::new(Cursor::new(data.to_vec()), ByteOrder::BigEndian);
        assert_eq!(be.read_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn writer_round_trips_values() {
        let mut writer =
            EndianWriter::new(Cursor::new(Vec::new()), ByteOrder::BigEndian).unwrap();
        writer.write_u16(0xBEEF).unwrap();
        writer.write_f64(1.5).unwrap();
        assert_eq!(writer.offset(), 10);

        let cursor = Cursor::new(writer.inner().get_ref().clone());
        let mut reader = EndianReader::new(cursor, ByteOrder::BigEndian);
        assert_eq!(reader.read_u16().unwrap(), 0xBEEF);
        assert_eq!(reader.read_f64().unwrap(), 1.5);
    }

    #[test]
    fn pad_to_even_only_on_odd_offsets() {
        let mut writer =
            EndianWriter::new(Cursor::new(Vec::new()), ByteOrder::LittleEndian).unwrap();
        writer.write_u8(1).unwrap();
        writer.pad_to_even().unwrap();
        assert_eq!(writer.offset(), 2);
        writer.pad_to_even().unwrap();
        assert_eq!(writer.offset(), 2);
    }
}
