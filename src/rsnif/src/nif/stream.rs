
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use super::*;

pub(crate) type Buffer = std::io::Cursor<Vec<u8>>;

/// Byte order of every scalar that follows the header's endian byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NifEndian {
    Big,
    #[default]
    Little,
}

fn short_read(err: std::io::Error) -> NifError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        NifError::Truncated
    } else {
        NifError::Io(err)
    }
}

macro_rules! scalar_accessors {
    ($($read:ident / $write:ident : $ty:ty => $rd:ident / $wr:ident;)*) => {
        $(
            pub fn $read(&mut self) -> NifResult<$ty> {
                match self.endian {
                    NifEndian::Little => self.buffer.$rd::<LittleEndian>().map_err(short_read),
                    NifEndian::Big => self.buffer.$rd::<BigEndian>().map_err(short_read),
                }
            }

            pub fn $write(&mut self, value: $ty) -> NifResult<()> {
                match self.endian {
                    NifEndian::Little => self.buffer.$wr::<LittleEndian>(value)?,
                    NifEndian::Big => self.buffer.$wr::<BigEndian>(value)?,
                }
                Ok(())
            }
        )*
    };
}

/// Positioned byte stream a container is decoded from and encoded into.
///
/// The stream owns its bytes, serves reads and writes through one seekable
/// cursor, and carries the active [`NifVersion`] so that version-conditional
/// payloads can consult it mid-field. Byte order starts little-endian and is
/// switched by the header once the endian byte has been read or written.
/// One stream belongs to one header instance; it is not thread-safe.
pub struct NifStream {
    buffer: Buffer,
    version: NifVersion,
    endian: NifEndian,
}

impl NifStream {
    /// Stream positioned at the start of existing file bytes.
    pub fn for_read(data: Vec<u8>) -> Self {
        NifStream {
            buffer: Buffer::new(data),
            version: NifVersion::default(),
            endian: NifEndian::Little,
        }
    }

    /// Empty stream the given version will be encoded into.
    pub fn for_write(version: NifVersion) -> Self {
        NifStream {
            buffer: Buffer::new(Vec::new()),
            version,
            endian: NifEndian::Little,
        }
    }

    pub fn version(&self) -> &NifVersion {
        &self.version
    }

    pub fn set_version(&mut self, version: NifVersion) {
        self.version = version;
    }

    pub fn endian(&self) -> NifEndian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: NifEndian) {
        self.endian = endian;
    }

    pub fn pos(&self) -> u64 {
        self.buffer.position()
    }

    pub fn seek(&mut self, pos: u64) -> NifResult<()> {
        self.buffer.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.into_inner()
    }

    pub fn read_u8(&mut self) -> NifResult<u8> {
        self.buffer.read_u8().map_err(short_read)
    }

    pub fn write_u8(&mut self, value: u8) -> NifResult<()> {
        self.buffer.write_u8(value)?;
        Ok(())
    }

    scalar_accessors! {
        read_u16 / write_u16 : u16 => read_u16 / write_u16;
        read_u32 / write_u32 : u32 => read_u32 / write_u32;
        read_u64 / write_u64 : u64 => read_u64 / write_u64;
        read_f32 / write_f32 : f32 => read_f32 / write_f32;
        read_f64 / write_f64 : f64 => read_f64 / write_f64;
    }

    pub fn read_bytes(&mut self, count: usize) -> NifResult<Vec<u8>> {
        let mut bytes = vec![0u8; count];
        self.buffer.read_exact(&mut bytes).map_err(short_read)?;
        Ok(bytes)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> NifResult<()> {
        self.buffer.write_all(bytes)?;
        Ok(())
    }

    /// Reads bytes up to a 0x0A terminator or `max` bytes, whichever comes
    /// first. The terminator is consumed and not returned.
    pub fn getline(&mut self, max: usize) -> NifResult<String> {
        let mut line = Vec::new();
        while line.len() < max {
            let byte = self.read_u8()?;
            if byte == 0x0A {
                break;
            }
            line.push(byte);
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Writes the line bytes followed by the 0x0A terminator.
    pub fn writeline(&mut self, line: &str) -> NifResult<()> {
        self.write_bytes(line.as_bytes())?;
        self.write_u8(0x0A)
    }
}
