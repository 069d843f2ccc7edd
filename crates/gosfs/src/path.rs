//! Path resolution.
//!
//! Paths are absolute byte strings starting with `/`. Components are the
//! non-empty substrings between separators, so repeated and trailing
//! slashes carry no meaning. Lookup descends from the root directory one
//! component at a time, comparing names case-sensitively.

use crate::{error::FsError, fs::FsInner, repr::InodeNo};

/// Splits `path` into its components.
///
/// `"/a/bb/c"` yields `a`, `bb`, `c`; `"//a//bb/"` yields `a`, `bb`; `"/"`
/// yields nothing; a path without a leading slash is rejected.
pub(crate) fn components(path: &str) -> Result<impl Iterator<Item = &[u8]>, FsError> {
    let rest = path.strip_prefix('/').ok_or(FsError::InvalidArgument)?;
    Ok(rest
        .split('/')
        .filter(|comp| !comp.is_empty())
        .map(str::as_bytes))
}

/// Splits `path` into its parent path and final component.
///
/// The parent of `/a` is `/`; the root has no parent, so `/` is rejected,
/// which keeps create and delete away from it.
pub(crate) fn split_parent(path: &str) -> Result<(&str, &str), FsError> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidArgument);
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FsError::InvalidArgument);
    }
    let pos = trimmed.rfind('/').expect("absolute path keeps its slash");
    let parent = if pos == 0 { "/" } else { &trimmed[..pos] };
    Ok((parent, &trimmed[pos + 1..]))
}

impl FsInner {
    /// Resolves an absolute path to an inode number.
    pub(crate) fn resolve(&self, path: &str) -> Result<InodeNo, FsError> {
        let mut ino = InodeNo::ROOT;
        for comp in components(path)? {
            let inode = self.read_inode(ino)?;
            if !inode.is_dir() {
                return Err(FsError::NotFound);
            }
            match self.dir_lookup(&inode, comp)? {
                Some(next) => ino = next,
                None => return Err(FsError::NotFound),
            }
        }
        Ok(ino)
    }

    /// Resolves the parent directory of `path`, returning its inode and the
    /// final component.
    pub(crate) fn resolve_parent<'p>(&self, path: &'p str) -> Result<(InodeNo, &'p str), FsError> {
        let (parent, name) = split_parent(path)?;
        Ok((self.resolve(parent)?, name))
    }
}
