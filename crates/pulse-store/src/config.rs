use std::time::Duration;

/// Limits applied to one feature's batch directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePersistenceConfig {
    /// A batch file keeps receiving writes for this long after creation,
    /// and is not read before this age unless a newer file replaced it.
    pub recent_delay: Duration,
    pub max_batch_size: u64,
    pub max_item_size: u64,
    pub max_items_per_batch: usize,
    /// Files older than this are deleted unread.
    pub old_file_threshold: Duration,
    pub max_disk_space: u64,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        Self {
            recent_delay: Duration::from_secs(5),
            max_batch_size: 4 * 1024 * 1024,
            max_item_size: 512 * 1024,
            max_items_per_batch: 500,
            old_file_threshold: Duration::from_secs(18 * 60 * 60),
            max_disk_space: 128 * 1024 * 1024,
        }
    }
}
