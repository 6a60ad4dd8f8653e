
use std::collections::HashMap;

use super::*;

/// Contract every block payload fulfills toward the container layer.
///
/// The container never interprets a payload: it asks for the type name that
/// keys the header's type registry, lets the payload serialize itself, and
/// enumerates the reference fields it must rewrite when block ordinals move.
/// The enumerators hand out mutable borrows because every structural edit
/// writes the indices back in place.
pub trait NiBlock {
    /// Stable on-disk type name, byte-exact.
    fn block_name(&self) -> &str;

    /// Deserializes the payload from the stream at its current position.
    fn get(&mut self, stream: &mut NifStream) -> NifResult<()>;

    /// Serializes the payload to the stream at its current position.
    fn put(&self, stream: &mut NifStream) -> NifResult<()>;

    /// Owning child references held by this payload.
    fn child_refs(&mut self) -> Vec<&mut NiRef> {
        Vec::new()
    }

    /// Non-owning back-pointer references held by this payload.
    fn ptr_refs(&mut self) -> Vec<&mut NiPtr> {
        Vec::new()
    }

    /// String-pool references held by this payload.
    fn string_refs(&mut self) -> Vec<&mut NiStringRef> {
        Vec::new()
    }

    /// True only for the verbatim fallback payload.
    fn is_unknown(&self) -> bool {
        false
    }
}

pub type BlockFactory = fn() -> Box<dyn NiBlock>;

/// Maps on-disk block type names to payload constructors.
///
/// The container resolves every block through this table while loading; a
/// name without an entry falls back to [`NiUnknown`] sized from the header's
/// block size table.
#[derive(Default)]
pub struct BlockRegistry {
    factories: HashMap<String, BlockFactory>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        BlockRegistry::default()
    }

    pub fn register(&mut self, name: &str, factory: BlockFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn NiBlock>> {
        self.factories.get(name).map(|factory| factory())
    }
}

/// Fallback payload for unregistered block types.
///
/// Carries the declared number of payload bytes verbatim and writes them back
/// unchanged; the type name round-trips through the header's type registry.
#[derive(Debug, Clone, Default)]
pub struct NiUnknown {
    name: String,
    data: Vec<u8>,
}

impl NiUnknown {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        NiUnknown {
            name: name.into(),
            data: vec![0u8; size],
        }
    }

    pub fn with_data(name: impl Into<String>, data: Vec<u8>) -> Self {
        NiUnknown {
            name: name.into(),
            data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl NiBlock for NiUnknown {
    fn block_name(&self) -> &str {
        &self.name
    }

    fn get(&mut self, stream: &mut NifStream) -> NifResult<()> {
        self.data = stream.read_bytes(self.data.len())?;
        Ok(())
    }

    fn put(&self, stream: &mut NifStream) -> NifResult<()> {
        stream.write_bytes(&self.data)
    }

    fn is_unknown(&self) -> bool {
        true
    }
}
