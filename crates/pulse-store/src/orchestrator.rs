use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::FilePersistenceConfig;
use crate::error::StoreError;

/// Batch files are named after their creation time in epoch milliseconds.
pub fn batch_created_at(path: &Path) -> Option<i64> {
    path.file_name()?.to_str()?.parse().ok()
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn delete_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[derive(Debug, Default)]
struct WriteState {
    current: Option<PathBuf>,
    current_items: usize,
    last_name_ms: i64,
}

/// Decides which file of one directory receives the next record and which
/// file is handed to the reader next. Also enforces the age and disk limits.
#[derive(Debug)]
pub struct BatchFileOrchestrator {
    dir: PathBuf,
    config: FilePersistenceConfig,
    state: Mutex<WriteState>,
}

impl BatchFileOrchestrator {
    pub fn new(dir: impl Into<PathBuf>, config: FilePersistenceConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            state: Mutex::new(WriteState::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    /// Batch files present on disk, oldest first.
    pub fn batch_files(&self) -> Result<Vec<(i64, PathBuf)>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(ts) = batch_created_at(&path) {
                files.push((ts, path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Run `append` against the file that should receive `incoming` more
    /// bytes. The choice and the append happen under one lock, so a reader
    /// never picks a file halfway through a write.
    pub fn with_writable_file<R>(
        &self,
        incoming: u64,
        append: impl FnOnce(&Path) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let files = self.enforce_limits(self.batch_files()?);
        let now = now_ms();

        let mut state = self.state.lock();
        let reusable = state
            .current
            .as_deref()
            .is_some_and(|path| self.can_append(path, state.current_items, incoming, now));

        if !reusable {
            let newest_on_disk = files.last().map_or(0, |(ts, _)| *ts);
            let name = now.max(state.last_name_ms + 1).max(newest_on_disk + 1);
            state.last_name_ms = name;
            state.current = Some(self.dir.join(name.to_string()));
            state.current_items = 0;
            debug!(dir = %self.dir.display(), batch_id = name, "starting new batch file");
        }

        let path = state.current.clone().ok_or_else(|| {
            StoreError::InvalidRecord("no writable batch file".into())
        })?;
        let result = append(&path)?;
        state.current_items += 1;
        Ok(result)
    }

    fn can_append(&self, path: &Path, items: usize, incoming: u64, now: i64) -> bool {
        let Some(created) = batch_created_at(path) else {
            return false;
        };
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        let recent = now - created < self.recent_delay_ms();
        recent
            && items < self.config.max_items_per_batch
            && meta.len() + incoming <= self.config.max_batch_size
    }

    /// The oldest file eligible for reading that is not in `excluded`.
    ///
    /// A file is eligible once it is older than the recent delay, or as soon
    /// as the writer has moved on to a newer file.
    pub fn readable_file(&self, excluded: &HashSet<PathBuf>) -> Result<Option<PathBuf>, StoreError> {
        let files = self.enforce_limits(self.batch_files()?);
        let now = now_ms();
        let mut state = self.state.lock();
        let picked = files.into_iter().map(|(_, p)| p).find(|path| {
            if excluded.contains(path) {
                return false;
            }
            let is_current = state.current.as_deref() == Some(path.as_path());
            let aged = batch_created_at(path).is_some_and(|ts| now - ts >= self.recent_delay_ms());
            !is_current || aged
        });
        // Once handed to a reader, the file must not receive more records.
        if picked.is_some() && picked == state.current {
            state.current = None;
            state.current_items = 0;
        }
        Ok(picked)
    }

    /// Stop appending to the current file so it becomes readable right away.
    pub fn close_writable_file(&self) {
        let mut state = self.state.lock();
        if let Some(path) = state.current.take() {
            debug!(path = %path.display(), "closed batch file for reading");
        }
        state.current_items = 0;
    }

    fn recent_delay_ms(&self) -> i64 {
        i64::try_from(self.config.recent_delay.as_millis()).unwrap_or(i64::MAX)
    }

    /// Delete files past the age threshold, then the oldest files while the
    /// directory is over its disk budget. Returns the surviving files.
    fn enforce_limits(&self, files: Vec<(i64, PathBuf)>) -> Vec<(i64, PathBuf)> {
        let now = now_ms();
        let max_age = i64::try_from(self.config.old_file_threshold.as_millis()).unwrap_or(i64::MAX);

        let mut kept = Vec::with_capacity(files.len());
        for (ts, path) in files {
            if now - ts > max_age {
                match delete_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "deleted obsolete batch file"),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to delete obsolete batch file"),
                }
            } else {
                kept.push((ts, path));
            }
        }

        let size_of = |p: &Path| fs::metadata(p).map(|m| m.len()).unwrap_or(0);
        let mut total: u64 = kept.iter().map(|(_, p)| size_of(p)).sum();
        if total <= self.config.max_disk_space {
            return kept;
        }
        warn!(
            dir = %self.dir.display(),
            total,
            max = self.config.max_disk_space,
            "batch storage over capacity, deleting oldest files"
        );
        let mut survivors = Vec::with_capacity(kept.len());
        for (ts, path) in kept {
            if total > self.config.max_disk_space {
                let size = size_of(&path);
                match delete_file(&path) {
                    Ok(()) => {
                        total = total.saturating_sub(size);
                        continue;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to free batch file"),
                }
            }
            survivors.push((ts, path));
        }
        survivors
    }
}
