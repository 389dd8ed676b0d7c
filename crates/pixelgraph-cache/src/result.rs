//! Structured counts returned by the cache service's bulk operations.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveClearResult {
    pub removed_entries: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryClearResult {
    pub cleared_nodes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSaveResult {
    pub saved_nodes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskSyncResult {
    pub saved_nodes: usize,
    pub removed_files: u64,
    pub removed_dirs: u64,
}
