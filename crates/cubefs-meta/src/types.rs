use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

/// What `lookup`, `get`, `batch_get` and `create` return . Kept
/// deliberately small: permission bits, timestamps and the handful of
/// fields the extent streaming engine and its VFS adaptation caller need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InodeInfo {
    pub ino: u64,
    pub file_type: FileType,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DentryInfo {
    pub name: String,
    pub ino: u64,
    pub file_type: FileType,
}

/// Attribute mutation mask for `set_attr`; `None` fields are left
/// untouched, matching the usual POSIX `setattr` partial-update semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub mtime: Option<u64>,
    pub atime: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub quota_id: u64,
    pub max_files: Option<u64>,
    pub max_bytes: Option<u64>,
}

/// On-wire extent tuple as carried by `get_extents`/`append_extent`
/// ; converted to/from [`cubefs_cache::ExtentDescriptor`] at the
/// meta client boundary since the wire representation is flat and
/// JSON-friendly while the cache's type additionally knows how to compute
/// `end()`/`overlaps()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtentWire {
    pub file_offset: u64,
    pub partition_id: u64,
    pub extent_id: u64,
    pub extent_offset: u64,
    pub size: u32,
}

impl From<cubefs_cache::ExtentDescriptor> for ExtentWire {
    fn from(d: cubefs_cache::ExtentDescriptor) -> Self {
        Self {
            file_offset: d.file_offset,
            partition_id: d.partition_id,
            extent_id: d.extent_id,
            extent_offset: d.extent_offset,
            size: d.size,
        }
    }
}

impl From<ExtentWire> for cubefs_cache::ExtentDescriptor {
    fn from(w: ExtentWire) -> Self {
        cubefs_cache::ExtentDescriptor::new(w.file_offset, w.partition_id, w.extent_id, w.extent_offset, w.size)
    }
}
