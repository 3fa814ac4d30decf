use crate::types::{DentryInfo, ExtentWire, FileType, IAttr, InodeInfo, QuotaInfo};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct LookupReq<'a> {
    pub parent_ino: u64,
    pub name: &'a str,
}
#[derive(Debug, Deserialize)]
pub struct LookupResp {
    pub inode: InodeInfo,
}

#[derive(Debug, Serialize)]
pub struct GetReq {
    pub ino: u64,
}
#[derive(Debug, Deserialize)]
pub struct GetResp {
    pub inode: InodeInfo,
}

#[derive(Debug, Serialize)]
pub struct BatchGetReq<'a> {
    pub inos: &'a [u64],
}
#[derive(Debug, Deserialize)]
pub struct BatchGetResp {
    pub inodes: Vec<InodeInfo>,
}

#[derive(Debug, Serialize)]
pub struct CreateReq<'a> {
    pub parent_ino: u64,
    pub name: &'a str,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub target: Option<&'a str>,
    pub quota: Option<u64>,
    pub file_type: FileType,
}
#[derive(Debug, Deserialize)]
pub struct CreateResp {
    pub inode: InodeInfo,
}

#[derive(Debug, Serialize)]
pub struct LinkReq<'a> {
    pub parent_ino: u64,
    pub name: &'a str,
    pub ino: u64,
}
#[derive(Debug, Deserialize)]
pub struct LinkResp {}

#[derive(Debug, Serialize)]
pub struct DeleteReq<'a> {
    pub parent_ino: u64,
    pub name: &'a str,
    pub is_dir: bool,
}
#[derive(Debug, Deserialize)]
pub struct DeleteResp {
    pub ino: u64,
}

#[derive(Debug, Serialize)]
pub struct RenameReq<'a> {
    pub old_parent: u64,
    pub old_name: &'a str,
    pub new_parent: u64,
    pub new_name: &'a str,
    pub overwrite: bool,
}
#[derive(Debug, Deserialize)]
pub struct RenameResp {}

#[derive(Debug, Serialize)]
pub struct ReadDirReq<'a> {
    pub ino: u64,
    pub marker: Option<&'a str>,
    pub limit: u32,
}
#[derive(Debug, Deserialize)]
pub struct ReadDirResp {
    pub entries: Vec<DentryInfo>,
}

#[derive(Debug, Serialize)]
pub struct SetAttrReq {
    pub ino: u64,
    pub iattr: IAttr,
}
#[derive(Debug, Deserialize)]
pub struct SetAttrResp {}

#[derive(Debug, Serialize)]
pub struct GetExtentsReq {
    pub ino: u64,
}
#[derive(Debug, Deserialize)]
pub struct GetExtentsResp {
    pub extents: Vec<ExtentWire>,
}

#[derive(Debug, Serialize)]
pub struct AppendExtentReq {
    pub ino: u64,
    pub extent: ExtentWire,
}
#[derive(Debug, Deserialize)]
pub struct AppendExtentResp {
    pub discards: Vec<ExtentWire>,
}

#[derive(Debug, Serialize)]
pub struct TruncateReq {
    pub ino: u64,
    pub new_size: u64,
}
#[derive(Debug, Deserialize)]
pub struct TruncateResp {}

#[derive(Debug, Serialize)]
pub struct QuotaGetReq {
    pub ino: u64,
}
#[derive(Debug, Deserialize)]
pub struct QuotaGetResp {
    pub quota: Option<QuotaInfo>,
}
