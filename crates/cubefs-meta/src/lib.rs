//! Request/reply against metadata partitions: inode CRUD, dentry CRUD,
//! extent list get/append, batched inode fetch, quota fetch . Hides partition routing and leader discovery behind a
//! synchronous-looking async API.

mod client;
mod routing;
mod types;
mod wire;

pub use client::MetaClient;
pub use routing::{MetaPartition, MetaPartitionDirectory};
pub use types::{DentryInfo, ExtentWire, FileType, IAttr, InodeInfo, QuotaInfo};
