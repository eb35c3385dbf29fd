use audit_core::{Error, ErrorCode, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Process-wide writer lock on the history database. Exactly one writer at
/// a time; acquired on open, released on drop.
#[derive(Debug)]
pub struct HistoryLock {
    path: PathBuf,
}

impl HistoryLock {
    pub fn acquire(db_path: &Path) -> Result<HistoryLock> {
        let path = lock_path(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                debug!(lock = %path.display(), "acquired history lock");
                Ok(HistoryLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::new(
                ErrorCode::HistoryLocked,
                format!(
                    "history database is locked by another process ({}); \
                     remove the lock file if no audit is running",
                    path.display()
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove history lock");
        }
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("history.db");

        let lock = HistoryLock::acquire(&db).expect("first acquire");
        let second = HistoryLock::acquire(&db);
        assert!(second.is_err());
        assert_eq!(second.unwrap_err().code, ErrorCode::HistoryLocked);

        drop(lock);
        let third = HistoryLock::acquire(&db);
        assert!(third.is_ok());
    }
}
