
use log::warn;

use super::*;

/// The version-dependent preamble of a NIF container.
///
/// Every field is gated on the file version, in this canonical order:
///
/// | Field | Present when | Encoding |
/// | ----- | ------------ | -------- |
/// | version string | always | line terminated by 0x0A |
/// | binary version | `file > 3.1`, not NDS | `u32`, authoritative over the string |
/// | NDS version | NDS branch | `u32` |
/// | copyright | `file <= 3.1` | three lines, each up to 128 bytes |
/// | endian byte | `file >= 20.0.0.3` | `u8`, 0 big / 1 little |
/// | user version | `file >= 10.0.1.8` | `u32` |
/// | block count | always | `u32` |
/// | export info | Bethesda `(file, user)` pairs | stream version, creator and export strings |
/// | embed data | otherwise, `file >= 30.0.0.2` | `u32` size + raw bytes |
/// | block types | `file >= 5.0.0.1` | `u32` count, 4-byte-length names, `u16` index per block |
/// | block sizes | `file >= 20.2.0.5` | `u32` per block, backpatched on write |
/// | string pool | `file >= 20.1.0.1` | `u32` count, `u32` max length, 4-byte-length entries |
/// | groups | `file >= 5.0.0.6` | `u32` count + `u32` sizes |
///
/// The header also owns the block-type registry, the per-block type-index and
/// size tables, and the central string pool; the editor keeps those tables
/// coaligned with the block array through the bookkeeping calls below.
pub struct NifHeader {
    pub version: NifVersion,
    valid: bool,
    endian: NifEndian,
    creator: String,
    export_info1: String,
    export_info2: String,
    export_info3: String,
    unk_int1: u32,
    embed_data: Vec<u8>,
    copyright: [String; 3],
    num_blocks: u32,
    num_block_types: u32,
    block_types: Vec<String>,
    block_type_indices: Vec<u16>,
    block_sizes: Vec<u32>,
    num_strings: u32,
    max_string_len: u32,
    strings: Vec<String>,
    group_sizes: Vec<u32>,
    /// Stream offset of the reserved block size table during a write.
    block_size_pos: u64,
}

impl Default for NifHeader {
    fn default() -> Self {
        NifHeader {
            version: NifVersion::default(),
            valid: false,
            endian: NifEndian::Little,
            creator: String::new(),
            export_info1: String::new(),
            export_info2: String::new(),
            export_info3: String::new(),
            unk_int1: 0,
            embed_data: Vec::new(),
            copyright: Default::default(),
            num_blocks: 0,
            num_block_types: 0,
            block_types: Vec::new(),
            block_type_indices: Vec::new(),
            block_sizes: Vec::new(),
            num_strings: 0,
            max_string_len: 0,
            strings: Vec::new(),
            group_sizes: Vec::new(),
            block_size_pos: 0,
        }
    }
}

impl NifHeader {
    /// Empty, valid header for a freshly created graph.
    pub fn new(version: NifVersion) -> Self {
        NifHeader {
            version,
            valid: true,
            ..NifHeader::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn endian(&self) -> NifEndian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: NifEndian) {
        self.endian = endian;
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn set_creator(&mut self, creator: impl Into<String>) {
        self.creator = creator.into();
    }

    pub fn export_info(&self) -> (&str, &str, &str) {
        (&self.export_info1, &self.export_info2, &self.export_info3)
    }

    pub fn set_export_info(
        &mut self,
        info1: impl Into<String>,
        info2: impl Into<String>,
        info3: impl Into<String>,
    ) {
        self.export_info1 = info1.into();
        self.export_info2 = info2.into();
        self.export_info3 = info3.into();
    }

    pub fn embed_data(&self) -> &[u8] {
        &self.embed_data
    }

    pub fn set_embed_data(&mut self, data: Vec<u8>) {
        self.embed_data = data;
    }

    pub fn copyright(&self) -> &[String; 3] {
        &self.copyright
    }

    pub fn set_copyright(&mut self, copyright: [String; 3]) {
        self.copyright = copyright;
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn num_block_types(&self) -> u32 {
        self.num_block_types
    }

    pub fn num_strings(&self) -> u32 {
        self.num_strings
    }

    pub fn max_string_len(&self) -> u32 {
        self.max_string_len
    }

    pub fn block_types(&self) -> &[String] {
        &self.block_types
    }

    pub fn block_type_indices(&self) -> &[u16] {
        &self.block_type_indices
    }

    pub fn block_sizes(&self) -> &[u32] {
        &self.block_sizes
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn string(&self, string_id: u32) -> Option<&str> {
        self.strings.get(string_id as usize).map(|s| s.as_str())
    }

    pub fn group_sizes(&self) -> &[u32] {
        &self.group_sizes
    }

    pub fn set_group_sizes(&mut self, group_sizes: Vec<u32>) {
        self.group_sizes = group_sizes;
    }

    /// Type name of the block at the given ordinal.
    pub fn block_type_name(&self, block_id: u32) -> Option<&str> {
        self.block_type_indices
            .get(block_id as usize)
            .and_then(|&type_id| self.block_types.get(type_id as usize))
            .map(|name| name.as_str())
    }

    pub fn block_size(&self, block_id: u32) -> Option<u32> {
        self.block_sizes.get(block_id as usize).copied()
    }

    // Version gates for the preamble fields. Read and write both go through
    // these, so the two directions cannot disagree on the layout.

    pub fn has_endian(&self) -> bool {
        self.version.file() >= V20_0_0_3
    }

    pub fn has_user(&self) -> bool {
        self.version.file() >= V10_0_1_8
    }

    pub fn has_block_types(&self) -> bool {
        self.version.file() >= V5_0_0_1
    }

    pub fn has_block_sizes(&self) -> bool {
        self.version.file() >= V20_2_0_5
    }

    pub fn has_string_pool(&self) -> bool {
        self.version.file() >= V20_1_0_1
    }

    pub fn has_groups(&self) -> bool {
        self.version.file() >= V5_0_0_6
    }

    pub fn has_embed_data(&self) -> bool {
        self.version.file() >= V30_0_0_2
    }

    fn has_binary_version(&self) -> bool {
        self.version.file() > V3_1 && self.version.nds() == 0
    }

    /// Decodes the preamble. An unrecognized version-string family leaves the
    /// header invalid and returns without error; any other failure is
    /// surfaced and also leaves the header invalid.
    pub fn get(&mut self, stream: &mut NifStream) -> NifResult<()> {
        self.valid = false;
        self.block_types.clear();
        self.block_type_indices.clear();
        self.block_sizes.clear();
        self.strings.clear();
        self.group_sizes.clear();

        let line = stream.getline(128)?;
        let Some((family, file)) = NifVersion::parse_line(&line) else {
            return Ok(());
        };
        self.version.set_file(file);

        if family == NifFamily::Nds {
            self.version.set_nds(stream.read_u32()?);
        } else if file > V3_1 {
            let binary = stream.read_u32()?;
            if binary != file {
                warn!(
                    "version string says 0x{:08X} but the binary version is 0x{:08X}",
                    file, binary
                );
                self.version.set_file(binary);
            }
        } else {
            for line in self.copyright.iter_mut() {
                *line = stream.getline(128)?;
            }
        }

        if self.version.file() > V30_2_0_0 {
            return Err(NifError::VersionUnsupported(self.version.file()));
        }

        if self.has_endian() {
            self.endian = match stream.read_u8()? {
                0 => NifEndian::Big,
                _ => NifEndian::Little,
            };
            stream.set_endian(self.endian);
        } else {
            self.endian = NifEndian::Little;
        }

        if self.has_user() {
            let user = stream.read_u32()?;
            self.version.set_user(user);
        }

        self.num_blocks = stream.read_u32()?;

        if self.version.is_bethesda() {
            self.version.set_stream(stream.read_u32()?);
            self.creator = NiString::read(stream, 1)?.into_string();
            if self.version.stream() > 130 {
                self.unk_int1 = stream.read_u32()?;
            }
            self.export_info1 = NiString::read(stream, 1)?.into_string();
            self.export_info2 = NiString::read(stream, 1)?.into_string();
            if self.version.stream() == 130 {
                self.export_info3 = NiString::read(stream, 1)?.into_string();
            }
        } else if self.has_embed_data() {
            let size = stream.read_u32()? as usize;
            self.embed_data = stream.read_bytes(size)?;
        }

        if self.has_block_types() {
            self.num_block_types = stream.read_u32()?;
            self.block_types.reserve(self.num_block_types as usize);
            for _ in 0..self.num_block_types {
                self.block_types.push(NiString::read(stream, 4)?.into_string());
            }
            self.block_type_indices.reserve(self.num_blocks as usize);
            for _ in 0..self.num_blocks {
                self.block_type_indices.push(stream.read_u16()?);
            }
        }

        if self.has_block_sizes() {
            self.block_sizes.reserve(self.num_blocks as usize);
            for _ in 0..self.num_blocks {
                self.block_sizes.push(stream.read_u32()?);
            }
        }

        if self.has_string_pool() {
            self.num_strings = stream.read_u32()?;
            self.max_string_len = stream.read_u32()?;
            self.strings.reserve(self.num_strings as usize);
            for _ in 0..self.num_strings {
                self.strings.push(NiString::read(stream, 4)?.into_string());
            }
        }

        if self.has_groups() {
            let num_groups = stream.read_u32()?;
            self.group_sizes.reserve(num_groups as usize);
            for _ in 0..num_groups {
                self.group_sizes.push(stream.read_u32()?);
            }
        }

        stream.set_version(self.version);
        self.valid = true;
        Ok(())
    }

    /// Encodes the preamble. When the block size table is present its slot
    /// position is remembered in `block_size_pos`; the table contents written
    /// here are placeholders until [`NifHeader::patch_block_sizes`] runs.
    pub fn put(&mut self, stream: &mut NifStream) -> NifResult<()> {
        stream.set_version(self.version);

        stream.writeline(&self.version.version_string())?;

        if self.version.nds() != 0 {
            stream.write_u32(self.version.nds())?;
        } else if self.has_binary_version() {
            stream.write_u32(self.version.file())?;
        } else {
            for line in self.copyright.iter() {
                stream.writeline(line)?;
            }
        }

        if self.has_endian() {
            stream.write_u8(match self.endian {
                NifEndian::Big => 0,
                NifEndian::Little => 1,
            })?;
            stream.set_endian(self.endian);
        }

        if self.has_user() {
            stream.write_u32(self.version.user())?;
        }

        stream.write_u32(self.num_blocks)?;

        if self.version.is_bethesda() {
            stream.write_u32(self.version.stream())?;
            NiString::new(self.creator.clone()).put(stream, 1, true)?;
            if self.version.stream() > 130 {
                stream.write_u32(self.unk_int1)?;
            }
            NiString::new(self.export_info1.clone()).put(stream, 1, true)?;
            NiString::new(self.export_info2.clone()).put(stream, 1, true)?;
            if self.version.stream() == 130 {
                NiString::new(self.export_info3.clone()).put(stream, 1, true)?;
            }
        } else if self.has_embed_data() {
            stream.write_u32(self.embed_data.len() as u32)?;
            stream.write_bytes(&self.embed_data)?;
        }

        if self.has_block_types() {
            stream.write_u32(self.num_block_types)?;
            for name in self.block_types.iter() {
                NiString::new(name.clone()).put(stream, 4, false)?;
            }
            for &type_id in self.block_type_indices.iter() {
                stream.write_u16(type_id)?;
            }
        }

        if self.has_block_sizes() {
            self.block_size_pos = stream.pos();
            for block_id in 0..self.num_blocks as usize {
                stream.write_u32(self.block_sizes.get(block_id).copied().unwrap_or(0))?;
            }
        }

        if self.has_string_pool() {
            stream.write_u32(self.num_strings)?;
            stream.write_u32(self.max_string_len)?;
            for value in self.strings.iter() {
                NiString::new(value.clone()).put(stream, 4, false)?;
            }
        }

        if self.has_groups() {
            stream.write_u32(self.group_sizes.len() as u32)?;
            for &size in self.group_sizes.iter() {
                stream.write_u32(size)?;
            }
        }

        Ok(())
    }

    /// Rewrites the reserved block size table with the sizes measured while
    /// the blocks were serialized. The caller restores the stream position.
    pub(crate) fn patch_block_sizes(&self, stream: &mut NifStream) -> NifResult<()> {
        if !self.has_block_sizes() {
            return Ok(());
        }
        stream.seek(self.block_size_pos)?;
        for block_id in 0..self.num_blocks as usize {
            stream.write_u32(self.block_sizes.get(block_id).copied().unwrap_or(0))?;
        }
        Ok(())
    }

    pub(crate) fn set_block_size(&mut self, block_id: usize, size: u32) {
        if self.has_block_sizes() {
            if let Some(slot) = self.block_sizes.get_mut(block_id) {
                *slot = size;
            }
        }
    }

    /// Index of a type name in the registry, if registered.
    pub fn find_block_type_id(&self, name: &str) -> Option<u16> {
        self.block_types
            .iter()
            .position(|ty| ty == name)
            .map(|pos| pos as u16)
    }

    /// Returns the registry index for the name, appending it first if absent.
    /// Comparison is byte-exact.
    pub fn add_or_find_block_type_id(&mut self, name: &str) -> u16 {
        if let Some(type_id) = self.find_block_type_id(name) {
            return type_id;
        }
        self.block_types.push(name.to_string());
        self.num_block_types += 1;
        (self.block_types.len() - 1) as u16
    }

    /// Registers the type of the next block row while loading a file whose
    /// header predates the on-disk type table. Keeps the in-memory registry
    /// populated for every version so the editor can rely on it.
    pub(crate) fn register_loaded_block_type(&mut self, name: &str) {
        let type_id = self.add_or_find_block_type_id(name);
        self.block_type_indices.push(type_id);
    }

    /// Appends the bookkeeping rows for a new trailing block and returns its
    /// ordinal.
    pub(crate) fn add_block_info(&mut self, type_name: &str) -> u32 {
        let type_id = self.add_or_find_block_type_id(type_name);
        self.block_type_indices.push(type_id);
        if self.has_block_sizes() {
            self.block_sizes.push(0);
        }
        let block_id = self.num_blocks;
        self.num_blocks += 1;
        block_id
    }

    /// Removes the bookkeeping rows of a block. When the block was the last
    /// user of its type, the type is dropped from the registry and every
    /// later type index shifts down by one.
    pub(crate) fn delete_block_info(&mut self, block_id: u32) {
        let index = block_id as usize;
        let type_id = self.block_type_indices[index];
        self.remove_type_if_last_user(type_id);
        self.block_type_indices.remove(index);
        if index < self.block_sizes.len() {
            self.block_sizes.remove(index);
        }
        self.num_blocks -= 1;
    }

    /// Swaps the type of a block in place; ordinals stay untouched. The size
    /// slot resets to zero for the writer to re-measure.
    pub(crate) fn replace_block_info(&mut self, block_id: u32, new_type_name: &str) {
        let index = block_id as usize;
        let old_type_id = self.block_type_indices[index];
        self.remove_type_if_last_user(old_type_id);
        let new_type_id = self.add_or_find_block_type_id(new_type_name);
        self.block_type_indices[index] = new_type_id;
        if let Some(slot) = self.block_sizes.get_mut(index) {
            *slot = 0;
        }
    }

    fn remove_type_if_last_user(&mut self, type_id: u16) {
        let users = self
            .block_type_indices
            .iter()
            .filter(|&&ty| ty == type_id)
            .count();
        if users == 1 {
            self.block_types.remove(type_id as usize);
            self.num_block_types -= 1;
            for ty in self.block_type_indices.iter_mut() {
                if *ty > type_id {
                    *ty -= 1;
                }
            }
        }
    }

    /// Moves the per-block rows so that the row at `i` lands at
    /// `new_order[i]`. The caller has validated the permutation.
    pub(crate) fn reorder_block_info(&mut self, new_order: &[u32]) {
        let count = self.block_type_indices.len();
        let mut new_type_indices = vec![0u16; count];
        for (from, &ty) in self.block_type_indices.iter().enumerate() {
            new_type_indices[new_order[from] as usize] = ty;
        }
        self.block_type_indices = new_type_indices;

        if self.block_sizes.len() == count {
            let mut new_sizes = vec![0u32; count];
            for (from, &size) in self.block_sizes.iter().enumerate() {
                new_sizes[new_order[from] as usize] = size;
            }
            self.block_sizes = new_sizes;
        }
    }

    /// Returns the pool index for the string, appending it first if absent.
    /// Empty strings resolve to `NIF_NPOS` unless `add_empty` is set; a full
    /// pool also resolves to `NIF_NPOS`.
    pub fn add_or_find_string_id(&mut self, value: &str, add_empty: bool) -> u32 {
        if let Some(pos) = self.strings.iter().position(|s| s == value) {
            return pos as u32;
        }
        if !add_empty && value.is_empty() {
            return NIF_NPOS;
        }
        if self.strings.len() >= u32::MAX as usize {
            return NIF_NPOS;
        }
        self.strings.push(value.to_string());
        self.num_strings += 1;
        (self.strings.len() - 1) as u32
    }

    pub(crate) fn clear_strings(&mut self) {
        self.strings.clear();
        self.num_strings = 0;
        self.max_string_len = 0;
    }

    pub(crate) fn update_max_string_len(&mut self) {
        self.max_string_len = self
            .strings
            .iter()
            .map(|s| s.len() as u32)
            .max()
            .unwrap_or(0);
    }
}
