
use super::*;

/// Largest central-pool index a string reference may carry on the wire.
pub const NIF_STRING_INDEX_LIMIT: u32 = 1_000_000;

/// Inline strings longer than this are cut short on read.
const NIF_INLINE_STRING_CAP: usize = 2048;

/// Length-prefixed byte string.
///
/// The length prefix is 1, 2 or 4 bytes wide depending on the field; a
/// trailing NUL, when present, is counted by the prefix but does not belong
/// to the value. Any other prefix width makes both directions a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NiString {
    str: String,
}

impl NiString {
    pub fn new(value: impl Into<String>) -> Self {
        NiString { str: value.into() }
    }

    pub fn get(&self) -> &str {
        &self.str
    }

    pub fn into_string(self) -> String {
        self.str
    }

    pub fn read(stream: &mut NifStream, sz_size: usize) -> NifResult<NiString> {
        let length = match sz_size {
            1 => stream.read_u8()? as usize,
            2 => stream.read_u16()? as usize,
            4 => stream.read_u32()? as usize,
            _ => return Ok(NiString::default()),
        };
        let mut bytes = stream.read_bytes(length)?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        Ok(NiString {
            str: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// With `null_output` the serialized length is `len + 1` and a trailing
    /// 0x00 follows the bytes.
    pub fn put(&self, stream: &mut NifStream, sz_size: usize, null_output: bool) -> NifResult<()> {
        let length = self.str.len() + usize::from(null_output);
        match sz_size {
            1 => stream.write_u8(length as u8)?,
            2 => stream.write_u16(length as u16)?,
            4 => stream.write_u32(length as u32)?,
            _ => return Ok(()),
        }
        stream.write_bytes(self.str.as_bytes())?;
        if null_output {
            stream.write_u8(0)?;
        }
        Ok(())
    }
}

/// A string field of a block payload.
///
/// Before file 20.1.0.3 the value serializes inline with a 4-byte length.
/// From 20.1.0.3 on, only an index into the header's central string pool is
/// written; the value is cached here once the pool is resolved, and the pool
/// stays the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NiStringRef {
    str: String,
    index: u32,
}

impl Default for NiStringRef {
    fn default() -> Self {
        NiStringRef {
            str: String::new(),
            index: NIF_NPOS,
        }
    }
}

impl NiStringRef {
    pub fn new(value: impl Into<String>) -> Self {
        NiStringRef {
            str: value.into(),
            index: NIF_NPOS,
        }
    }

    pub fn get(&self) -> &str {
        &self.str
    }

    pub fn set(&mut self, value: impl Into<String>) {
        self.str = value.into();
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    pub fn clear(&mut self) {
        self.str.clear();
        self.index = NIF_NPOS;
    }

    pub fn read(&mut self, stream: &mut NifStream) -> NifResult<()> {
        if stream.version().file() < V20_1_0_3 {
            let length = stream.read_u32()? as usize;
            let bytes = stream.read_bytes(length)?;
            let kept = bytes.len().min(NIF_INLINE_STRING_CAP);
            self.str = String::from_utf8_lossy(&bytes[..kept]).into_owned();
            self.index = NIF_NPOS;
        } else {
            let index = stream.read_u32()?;
            if index != NIF_NPOS && index > NIF_STRING_INDEX_LIMIT {
                return Err(NifError::LengthError(format!(
                    "string index {} exceeds the pool limit",
                    index
                )));
            }
            self.index = index;
        }
        Ok(())
    }

    pub fn write(&self, stream: &mut NifStream) -> NifResult<()> {
        if stream.version().file() < V20_1_0_3 {
            stream.write_u32(self.str.len() as u32)?;
            stream.write_bytes(self.str.as_bytes())
        } else {
            stream.write_u32(self.index)
        }
    }
}
