//! Durable attempt store backed by an append-only JSON-lines file.
//!
//! Each record is one line. Inserts append and sync a single line; cleanup
//! and flag updates rewrite the whole file to a temporary path and rename it
//! into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use super::{address_filter, AttemptId, AttemptLog, AttemptQuery, AttemptRecord, AttemptStore};
use crate::clock::{sub_secs, Clock, SystemClock};
use crate::error::{Result, ThrottleError};

/// An [`AttemptStore`] persisted to a JSON-lines file.
pub struct FileAttemptStore {
    path: PathBuf,
    log: RwLock<AttemptLog>,
    clock: Arc<dyn Clock>,
}

impl FileAttemptStore {
    /// Open (or create on first write) the log at `path` on the system clock.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    /// Open the log at `path`, loading every stored record.
    pub async fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = load_records(&path).await?;

        info!(
            path = %path.display(),
            records = records.len(),
            "Opened attempt log"
        );

        Ok(Self {
            path,
            log: RwLock::new(AttemptLog::from_records(records)),
            clock,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.log.read().await.records().len()
    }

    /// Whether the log holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn count(&self, address: Option<&str>, account: Option<&str>, window_secs: u64) -> u64 {
        let query = AttemptQuery {
            client_address: address,
            account_identifier: account,
            since: sub_secs(self.clock.now(), window_secs),
        };
        self.log.read().await.count(&query)
    }

    async fn append(&self, record: &AttemptRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(ThrottleError::storage)?;
        }

        let mut line = serde_json::to_vec(record).map_err(ThrottleError::storage)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(ThrottleError::storage)?;
        file.write_all(&line).await.map_err(ThrottleError::storage)?;
        file.sync_data().await.map_err(ThrottleError::storage)?;
        Ok(())
    }

    async fn rewrite(&self, records: &[AttemptRecord]) -> Result<()> {
        let mut data = Vec::new();
        for record in records {
            serde_json::to_writer(&mut data, record).map_err(ThrottleError::storage)?;
            data.push(b'\n');
        }

        let temp_path = self.path.with_extension("tmp");
        let mut temp = fs::File::create(&temp_path)
            .await
            .map_err(ThrottleError::storage)?;
        temp.write_all(&data).await.map_err(ThrottleError::storage)?;
        temp.sync_all().await.map_err(ThrottleError::storage)?;
        drop(temp);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(ThrottleError::storage)?;
        Ok(())
    }
}

async fn load_records(path: &Path) -> Result<Vec<AttemptRecord>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ThrottleError::storage(e)),
    };

    // Everything up to the last newline was fully written
    let terminated = if contents.ends_with('\n') {
        contents.len()
    } else {
        contents.rfind('\n').map_or(0, |i| i + 1)
    };
    let (complete, tail) = contents.split_at(terminated);

    let mut records = complete
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                ThrottleError::StorageUnavailable(format!(
                    "{}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                ))
            })
        })
        .collect::<Result<Vec<AttemptRecord>>>()?;

    if tail.trim().is_empty() {
        return Ok(records);
    }

    match serde_json::from_str::<AttemptRecord>(tail) {
        Ok(record) => {
            // Complete record whose newline never made it to disk
            repair_tail(path, None).await?;
            records.push(record);
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                bytes = tail.len(),
                "Dropping torn final line of attempt log"
            );
            repair_tail(path, Some(terminated as u64)).await?;
        }
    }
    Ok(records)
}

/// Truncate the log to `len` bytes, or terminate its last line when `len`
/// is `None`.
async fn repair_tail(path: &Path, len: Option<u64>) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .append(len.is_none())
        .open(path)
        .await
        .map_err(ThrottleError::storage)?;

    match len {
        Some(len) => file.set_len(len).await.map_err(ThrottleError::storage)?,
        None => file.write_all(b"\n").await.map_err(ThrottleError::storage)?,
    }
    file.sync_all().await.map_err(ThrottleError::storage)?;
    Ok(())
}

#[async_trait]
impl AttemptStore for FileAttemptStore {
    async fn record(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
    ) -> Result<AttemptRecord> {
        let mut log = self.log.write().await;
        let record = log.next_record(client_address, account_identifier, self.clock.now());

        // Only visible to readers once it is on disk
        self.append(&record).await?;
        log.push(record.clone());

        trace!(
            id = %record.id,
            client_address = %record.client_address,
            account = ?record.account_identifier,
            "Appended attempt"
        );
        Ok(record)
    }

    async fn count_attempts(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
        window_secs: u64,
    ) -> Result<u64> {
        Ok(self
            .count(Some(client_address), account_identifier, window_secs)
            .await)
    }

    async fn count_by_address(&self, client_address: &str, window_secs: u64) -> Result<u64> {
        Ok(self.count(Some(client_address), None, window_secs).await)
    }

    async fn count_by_account(&self, account_identifier: &str, window_secs: u64) -> Result<u64> {
        Ok(self.count(None, Some(account_identifier), window_secs).await)
    }

    async fn list_recent(
        &self,
        client_address: Option<&str>,
        account_identifier: Option<&str>,
        window_secs: u64,
    ) -> Result<Vec<AttemptRecord>> {
        let query = AttemptQuery {
            client_address: address_filter(client_address),
            account_identifier,
            since: sub_secs(self.clock.now(), window_secs),
        };
        Ok(self.log.read().await.list_newest_first(&query))
    }

    async fn set_blocked(&self, id: AttemptId, blocked: bool) -> Result<bool> {
        let mut log = self.log.write().await;
        let previous = match log.find(id) {
            Some(record) => record.blocked,
            None => return Ok(false),
        };
        if previous == blocked {
            return Ok(true);
        }

        log.set_blocked(id, blocked);
        if let Err(e) = self.rewrite(log.records()).await {
            log.set_blocked(id, previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn cleanup(&self, watch_period_secs: u64) -> Result<u64> {
        let before = sub_secs(self.clock.now(), watch_period_secs);
        let mut log = self.log.write().await;

        let kept: Vec<AttemptRecord> = log
            .records()
            .iter()
            .filter(|r| r.occurred_at >= before)
            .cloned()
            .collect();
        let removed = (log.records().len() - kept.len()) as u64;
        if removed == 0 {
            return Ok(0);
        }

        self.rewrite(&kept).await?;
        log.purge_before(before);

        debug!(
            path = %self.path.display(),
            removed = removed,
            watch_period_secs = watch_period_secs,
            "Compacted attempt log"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    async fn open_at(dir: &TempDir, clock: Arc<MockClock>) -> FileAttemptStore {
        FileAttemptStore::open_with_clock(dir.path().join("attempts.jsonl"), clock)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_at(&dir, Arc::new(MockClock::at_unix(1_000))).await;

        assert!(store.is_empty().await);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));

        {
            let store = open_at(&dir, clock.clone()).await;
            assert_ok!(store.record("10.0.0.1", Some("alice")).await);
            assert_ok!(store.record("10.0.0.1", None).await);
        }

        let store = open_at(&dir, clock.clone()).await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.count_attempts("10.0.0.1", None, 600).await.unwrap(), 2);
        assert_eq!(store.count_by_account("alice", 600).await.unwrap(), 1);

        // Ids continue after the highest stored id
        let next = store.record("10.0.0.2", None).await.unwrap();
        assert_eq!(next.id, AttemptId(3));
    }

    #[tokio::test]
    async fn test_cleanup_compacts_file() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = open_at(&dir, clock.clone()).await;

        store.record("10.0.0.1", None).await.unwrap();
        clock.advance_secs(4_000);
        store.record("10.0.0.1", None).await.unwrap();

        assert_eq!(store.cleanup(3_600).await.unwrap(), 1);
        assert_eq!(store.cleanup(3_600).await.unwrap(), 0);

        let reopened = open_at(&dir, clock.clone()).await;
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_blocked_is_persisted() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = open_at(&dir, clock.clone()).await;

        let record = store.record("10.0.0.1", None).await.unwrap();
        assert!(store.set_blocked(record.id, true).await.unwrap());
        assert!(!store.set_blocked(AttemptId(42), true).await.unwrap());

        let reopened = open_at(&dir, clock).await;
        let listed = reopened.list_recent(None, None, 600).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].blocked);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attempts.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let result = FileAttemptStore::open(&path).await;
        assert!(matches!(result, Err(ThrottleError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let path = dir.path().join("attempts.jsonl");
        {
            let store = open_at(&dir, clock.clone()).await;
            store.record("10.0.0.1", None).await.unwrap();
        }

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.insert_str(0, "{\"id\":9,\"client\n");
        std::fs::write(&path, contents).unwrap();

        let result = FileAttemptStore::open(&path).await;
        assert!(matches!(result, Err(ThrottleError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_torn_final_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let path = dir.path().join("attempts.jsonl");
        {
            let store = open_at(&dir, clock.clone()).await;
            store.record("10.0.0.1", None).await.unwrap();
            store.record("10.0.0.1", None).await.unwrap();
        }
        let intact = std::fs::read_to_string(&path).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, b"{\"id\":3,\"client_addr").unwrap();
        drop(file);

        let store = open_at(&dir, clock.clone()).await;
        assert_eq!(store.len().await, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), intact);

        // New appends start on a clean line
        let next = store.record("10.0.0.2", None).await.unwrap();
        assert_eq!(next.id, AttemptId(3));
        let reopened = open_at(&dir, clock).await;
        assert_eq!(reopened.len().await, 3);
    }

    #[tokio::test]
    async fn test_unterminated_complete_record_is_kept() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let path = dir.path().join("attempts.jsonl");
        {
            let store = open_at(&dir, clock.clone()).await;
            store.record("10.0.0.1", Some("alice")).await.unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, contents.trim_end()).unwrap();

        let store = open_at(&dir, clock.clone()).await;
        assert_eq!(store.len().await, 1);
        store.record("10.0.0.1", None).await.unwrap();

        let reopened = open_at(&dir, clock).await;
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_append_does_not_reuse_id() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let path = dir.path().join("attempts.jsonl");
        let store = open_at(&dir, clock.clone()).await;

        let first = store.record("10.0.0.1", None).await.unwrap();

        // A directory in place of the log makes the append fail
        let saved = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(store.record("10.0.0.1", None).await.is_err());
        std::fs::remove_dir(&path).unwrap();
        std::fs::write(&path, saved).unwrap();

        let next = store.record("10.0.0.1", None).await.unwrap();
        assert_eq!(first.id, AttemptId(1));
        assert_eq!(next.id, AttemptId(3));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_rewrite_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(MockClock::at_unix(1_000));
        let store = open_at(&dir, clock.clone()).await;

        let record = store.record("10.0.0.1", None).await.unwrap();
        assert!(store.set_blocked(record.id, true).await.unwrap());

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("attempts.jsonl")]);
    }
}
