use block_io::IoError;

/// Errors surfaced to VFS callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    /// Malformed input: empty or relative path, bad open mode, an operation
    /// on the root's parent, or a name that already exists where one must
    /// not.
    #[error("invalid argument")]
    InvalidArgument,
    /// A path component does not exist.
    #[error("entry not found")]
    NotFound,
    /// A caller-side allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// No free block or inode is left, or a directory cannot grow.
    #[error("no space left on volume")]
    NoSpace,
    /// The handle lacks the required mode, or the operation would destroy
    /// live state (deleting a non-empty directory or an open file).
    #[error("access denied")]
    AccessDenied,
    /// The volume does not carry a valid GOSFS header.
    #[error("not a gosfs volume")]
    InvalidFs,
    /// A write would extend the file past the last addressable block.
    #[error("file too large")]
    FileTooLarge,
    /// Internal fault, including device errors propagated from the cache.
    #[error("unspecified failure")]
    Unspecified(#[source] Option<IoError>),
}

impl From<IoError> for FsError {
    fn from(err: IoError) -> Self {
        Self::Unspecified(Some(err))
    }
}
