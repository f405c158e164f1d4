use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pulse_core::TrackingConsent;
use tracing::{debug, error, warn};

use crate::orchestrator::batch_created_at;

pub const MAX_MOVE_ATTEMPTS: u32 = 3;
pub const MOVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// One-shot operation on batch directories after a consent change.
pub trait DataMigration: Send {
    fn run(&self);
}

/// Retry `op` until it succeeds or `attempts` are exhausted.
pub fn retry_with_delay(attempts: u32, delay: Duration, mut op: impl FnMut() -> bool) -> bool {
    for attempt in 1..=attempts {
        if op() {
            return true;
        }
        if attempt < attempts {
            std::thread::sleep(delay);
        }
    }
    false
}

/// Move every file of `from` into `to`.
#[derive(Debug)]
pub struct MoveDataMigration {
    pub from: PathBuf,
    pub to: PathBuf,
    pub attempts: u32,
    pub delay: Duration,
}

impl MoveDataMigration {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            attempts: MAX_MOVE_ATTEMPTS,
            delay: MOVE_RETRY_DELAY,
        }
    }
}

fn move_files(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let src = entry?.path();
        if !src.is_file() {
            continue;
        }
        let Some(dest) = free_destination(&src, to) else {
            warn!(file = %src.display(), "batch name already taken in destination, leaving it behind");
            continue;
        };
        fs::rename(&src, dest)?;
    }
    Ok(())
}

/// Where `src` lands in `to` without replacing an existing batch. A taken
/// name is shifted to the closest older free millisecond, which keeps it
/// clear of names the writer will pick next.
fn free_destination(src: &Path, to: &Path) -> Option<PathBuf> {
    let dest = to.join(src.file_name()?);
    if !dest.exists() {
        return Some(dest);
    }
    let created = batch_created_at(src)?;
    (1..=1_000)
        .map(|shift| to.join((created - shift).to_string()))
        .find(|candidate| !candidate.exists())
}

impl DataMigration for MoveDataMigration {
    fn run(&self) {
        if !self.from.exists() {
            debug!(from = %self.from.display(), "nothing to move");
            return;
        }
        let moved = retry_with_delay(self.attempts, self.delay, || {
            match move_files(&self.from, &self.to) {
                Ok(()) => true,
                Err(e) => {
                    warn!(from = %self.from.display(), to = %self.to.display(), error = %e, "batch move failed");
                    false
                }
            }
        });
        if !moved {
            error!(
                from = %self.from.display(),
                to = %self.to.display(),
                attempts = self.attempts,
                "giving up moving batch files"
            );
        }
    }
}

/// Delete every file of `dir`.
#[derive(Debug)]
pub struct WipeDataMigration {
    pub dir: PathBuf,
}

impl DataMigration for WipeDataMigration {
    fn run(&self) {
        let wiped = retry_with_delay(MAX_MOVE_ATTEMPTS, MOVE_RETRY_DELAY, || {
            match fs::remove_dir_all(&self.dir) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => true,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "failed to wipe batch directory");
                    false
                }
            }
        });
        if wiped {
            debug!(dir = %self.dir.display(), "wiped batch directory");
        }
    }
}

/// Migration to run when consent moves from `previous` to `next`.
/// `previous` is `None` at startup, when leftover pending data is discarded.
pub fn migration_for(
    previous: Option<TrackingConsent>,
    next: TrackingConsent,
    pending_dir: &Path,
    granted_dir: &Path,
) -> Option<Box<dyn DataMigration>> {
    use TrackingConsent::{Granted, NotGranted, Pending};
    let wipe_pending = || -> Box<dyn DataMigration> {
        Box::new(WipeDataMigration {
            dir: pending_dir.to_path_buf(),
        })
    };
    match (previous, next) {
        (None, _) => Some(wipe_pending()),
        (Some(Pending), Granted) => Some(Box::new(MoveDataMigration::new(pending_dir, granted_dir))),
        (Some(Pending), NotGranted) | (Some(Granted), Pending) | (Some(NotGranted), Pending) => {
            Some(wipe_pending())
        }
        _ => None,
    }
}
