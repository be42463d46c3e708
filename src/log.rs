use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::concurrency::TransactionId;
use crate::error::Result;

/// The write-ahead log hooks the buffer pool depends on. A flush of a dirty
/// page first appends an update record (before and after image) and forces
/// the log, only then may the page itself be written. The full record format
/// and replay are owned by the recovery manager, not the core.
pub struct LogFile {
    file: Mutex<File>,
}

impl LogFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends an update record for one page.
    pub fn log_write(&self, tid: TransactionId, before: &[u8], after: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.write_all(&tid.to_be_bytes())?;
        file.write_all(&(before.len() as u32).to_be_bytes())?;
        file.write_all(before)?;
        file.write_all(&(after.len() as u32).to_be_bytes())?;
        file.write_all(after)?;
        Ok(())
    }

    /// Forces everything appended so far to stable storage.
    pub fn force(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::LogFile;

    #[test]
    fn records_are_appended_and_forced() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("log.dat");
        let log = LogFile::open(&path)?;

        log.log_write(1, &[1, 2, 3], &[4, 5, 6])?;
        log.force()?;
        log.log_write(2, &[], &[7])?;
        log.force()?;

        // tid (8) + len (4) + 3 + len (4) + 3, then 8 + 4 + 0 + 4 + 1
        let size = std::fs::metadata(&path)?.len();
        assert_eq!(size, 22 + 17);
        Ok(())
    }
}
