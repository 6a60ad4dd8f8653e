
use super::*;

/// Sentinel index meaning "no target".
pub const NIF_NPOS: u32 = 0xFFFF_FFFF;

macro_rules! define_block_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub index: u32,
        }

        impl $name {
            pub fn new(index: u32) -> Self {
                $name { index }
            }

            pub fn empty() -> Self {
                $name { index: NIF_NPOS }
            }

            pub fn is_empty(&self) -> bool {
                self.index == NIF_NPOS
            }

            pub fn clear(&mut self) {
                self.index = NIF_NPOS;
            }

            pub fn get(&mut self, stream: &mut NifStream) -> NifResult<()> {
                self.index = stream.read_u32()?;
                Ok(())
            }

            pub fn put(&self, stream: &mut NifStream) -> NifResult<()> {
                stream.write_u32(self.index)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::empty()
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                $name { index }
            }
        }
    };
}

define_block_index! {
    /// Owning child edge: a nullable ordinal index into the block array.
    ///
    /// The block array is the arena that owns every payload; a `NiRef` is the
    /// stable handle into it. Structural edits rewrite the index, never the
    /// payload it lands on.
    NiRef
}

define_block_index! {
    /// Non-owning back edge: same wire shape as [`NiRef`], but the target
    /// does not belong to the referencing block. Scene graphs use these for
    /// cycles (bones pointing back at their skeleton root), which stay safe
    /// because both edge kinds are plain indices into the arena.
    NiPtr
}
