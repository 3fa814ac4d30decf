//! Volume statistics surface exposed the way a mounted filesystem's
//! `statfs(2)` would report them.

use cubefs_master::VolumeStat;

/// Fixed by the data model, not negotiated with the master: every regular
/// file is addressed in 4 KiB blocks and inode ids are 63-bit (the top bit
/// is reserved).
pub const BLOCK_SIZE: u64 = 4096;
pub const MAX_INODE_ID: u64 = (1u64 << 63) - 1;

#[derive(Debug, Clone, Copy)]
pub struct Statfs {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
}

impl Statfs {
    pub fn from_volume_stat(stat: &VolumeStat) -> Self {
        let total_blocks = stat.total_size / BLOCK_SIZE;
        let used_blocks = stat.used_size / BLOCK_SIZE;
        Self {
            block_size: BLOCK_SIZE,
            total_blocks,
            free_blocks: total_blocks.saturating_sub(used_blocks),
            total_inodes: MAX_INODE_ID,
            free_inodes: MAX_INODE_ID.saturating_sub(stat.inode_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_bytes_to_blocks() {
        let stat = VolumeStat {
            total_size: 4096 * 1000,
            used_size: 4096 * 400,
            inode_count: 10,
        };
        let statfs = Statfs::from_volume_stat(&stat);
        assert_eq!(statfs.block_size, 4096);
        assert_eq!(statfs.total_blocks, 1000);
        assert_eq!(statfs.free_blocks, 600);
        assert_eq!(statfs.total_inodes, MAX_INODE_ID);
    }
}
