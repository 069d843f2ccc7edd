use crate::repr::{AclEntry, MAX_ACL_ENTRIES};

/// File or directory metadata, as returned by stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Size in bytes for files; populated entry count for directories.
    pub size: u64,
    /// Whether the inode describes a directory.
    pub is_directory: bool,
    /// Whether the setuid bit is set.
    pub is_setuid: bool,
    /// Access-control entries; the first describes the owner.
    pub acl: [AclEntry; MAX_ACL_ENTRIES],
}
