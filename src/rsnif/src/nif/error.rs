
use thiserror::Error;

/// Failure modes of reading, editing and writing NIF containers.
///
/// An unrecognized version-string family is deliberately *not* fatal during
/// header parsing: `NifHeader::get` returns normally with the header left
/// invalid, and only `NifFile::load` turns that into [`NifError::BadSignature`].
#[derive(Error, Debug)]
pub enum NifError {
    /// The stream ended in the middle of a field.
    #[error("stream ended in the middle of a field")]
    Truncated,

    /// The underlying byte stream failed to read or write.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The first line of the file matches none of the known families.
    #[error("unrecognized version string family")]
    BadSignature,

    /// The file version lies outside the accepted range.
    #[error("unsupported file version 0x{0:08X}")]
    VersionUnsupported(u32),

    /// A string index exceeded the pool index limit.
    #[error("string length error: {0}")]
    LengthError(String),

    /// A block type has no registered constructor and the file carries no
    /// block size table to recover its payload verbatim.
    #[error("unknown block type `{0}` and no block size table")]
    UnknownBlockType(String),

    /// A post-edit check found the header tables and the block array out of
    /// step, or a dangling reference.
    #[error("graph invariant violated: {0}")]
    InvariantViolated(String),
}

pub type NifResult<T> = Result<T, NifError>;
