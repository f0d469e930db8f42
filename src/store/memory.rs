//! Process-local attempt store.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{address_filter, AttemptId, AttemptLog, AttemptQuery, AttemptRecord, AttemptStore};
use crate::clock::{sub_secs, Clock, SystemClock};
use crate::error::Result;

/// An [`AttemptStore`] that keeps every record in memory.
///
/// Records live as long as the store does; nothing is persisted.
pub struct MemoryAttemptStore {
    log: RwLock<AttemptLog>,
    clock: Arc<dyn Clock>,
}

impl MemoryAttemptStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: RwLock::new(AttemptLog::default()),
            clock,
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.log.read().records().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a record by id.
    pub fn get(&self, id: AttemptId) -> Option<AttemptRecord> {
        self.log.read().find(id).cloned()
    }

    fn count(&self, address: Option<&str>, account: Option<&str>, window_secs: u64) -> u64 {
        let query = AttemptQuery {
            client_address: address,
            account_identifier: account,
            since: sub_secs(self.clock.now(), window_secs),
        };
        self.log.read().count(&query)
    }
}

impl Default for MemoryAttemptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn record(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
    ) -> Result<AttemptRecord> {
        let mut log = self.log.write();
        let record = log.next_record(client_address, account_identifier, self.clock.now());
        log.push(record.clone());

        trace!(
            id = %record.id,
            client_address = %record.client_address,
            account = ?record.account_identifier,
            "Recorded attempt"
        );
        Ok(record)
    }

    async fn count_attempts(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
        window_secs: u64,
    ) -> Result<u64> {
        Ok(self.count(Some(client_address), account_identifier, window_secs))
    }

    async fn count_by_address(&self, client_address: &str, window_secs: u64) -> Result<u64> {
        Ok(self.count(Some(client_address), None, window_secs))
    }

    async fn count_by_account(&self, account_identifier: &str, window_secs: u64) -> Result<u64> {
        Ok(self.count(None, Some(account_identifier), window_secs))
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
        Ok(self.log.read().list_newest_first(&query))
    }

    async fn set_blocked(&self, id: AttemptId, blocked: bool) -> Result<bool> {
        Ok(self.log.write().set_blocked(id, blocked))
    }

    async fn cleanup(&self, watch_period_secs: u64) -> Result<u64> {
        let before = sub_secs(self.clock.now(), watch_period_secs);
        let removed = self.log.write().purge_before(before);
        debug!(removed = removed, watch_period_secs = watch_period_secs, "Cleaned up attempts");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn store_at(secs: i64) -> (Arc<MockClock>, MemoryAttemptStore) {
        let clock = Arc::new(MockClock::at_unix(secs));
        let store = MemoryAttemptStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_record_assigns_increasing_ids() {
        let (_clock, store) = store_at(1_000);

        let first = store.record("10.0.0.1", Some("alice")).await.unwrap();
        let second = store.record("10.0.0.1", None).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.occurred_at.timestamp(), 1_000);
        assert!(!first.blocked);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_count_attempts_ignores_identifier_when_absent() {
        let (_clock, store) = store_at(1_000);

        store.record("10.0.0.1", Some("alice")).await.unwrap();
        store.record("10.0.0.1", Some("bob")).await.unwrap();
        store.record("10.0.0.1", None).await.unwrap();

        assert_eq!(store.count_attempts("10.0.0.1", None, 600).await.unwrap(), 3);
        assert_eq!(store.count_attempts("10.0.0.1", Some("alice"), 600).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_single_dimension_counts() {
        let (_clock, store) = store_at(1_000);

        store.record("10.0.0.1", Some("alice")).await.unwrap();
        store.record("10.0.0.2", Some("alice")).await.unwrap();
        store.record("10.0.0.1", Some("bob")).await.unwrap();

        assert_eq!(store.count_by_address("10.0.0.1", 600).await.unwrap(), 2);
        assert_eq!(store.count_by_account("alice", 600).await.unwrap(), 2);
        assert_eq!(store.count_by_account("carol", 600).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attempts_outside_window_do_not_count() {
        let (clock, store) = store_at(1_000);

        store.record("10.0.0.1", None).await.unwrap();
        clock.advance_secs(601);
        store.record("10.0.0.1", None).await.unwrap();

        assert_eq!(store.count_by_address("10.0.0.1", 600).await.unwrap(), 1);
        assert_eq!(store.count_by_address("10.0.0.1", 601).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_is_blocked_at_threshold() {
        let (_clock, store) = store_at(1_000);

        for _ in 0..2 {
            store.record("10.0.0.1", Some("alice")).await.unwrap();
        }
        assert!(!store.is_blocked("10.0.0.1", Some("alice"), 3, 600).await.unwrap());

        store.record("10.0.0.1", Some("alice")).await.unwrap();
        assert!(store.is_blocked("10.0.0.1", Some("alice"), 3, 600).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_recent_filters_and_orders() {
        let (clock, store) = store_at(1_000);

        store.record("10.0.0.1", Some("alice")).await.unwrap();
        clock.advance_secs(10);
        store.record("10.0.0.2", Some("alice")).await.unwrap();
        clock.advance_secs(10);
        store.record("10.0.0.1", Some("bob")).await.unwrap();

        let by_account = store.list_recent(Some(""), Some("alice"), 600).await.unwrap();
        assert_eq!(by_account.len(), 2);
        assert_eq!(by_account[0].client_address, "10.0.0.2");
        assert_eq!(by_account[1].occurred_at.timestamp(), 1_000);

        let everything = store.list_recent(None, None, 600).await.unwrap();
        assert_eq!(everything.len(), 3);
        assert_eq!(everything[0].account_identifier.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_set_blocked_flag() {
        let (_clock, store) = store_at(1_000);
        let record = store.record("10.0.0.1", None).await.unwrap();

        assert!(store.set_blocked(record.id, true).await.unwrap());
        assert!(store.get(record.id).unwrap().blocked);
        assert!(!store.set_blocked(AttemptId(999), true).await.unwrap());

        // The flag is advisory and never affects counting
        assert_eq!(store.count_by_address("10.0.0.1", 600).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_and_is_idempotent() {
        let (clock, store) = store_at(1_000);

        store.record("10.0.0.1", None).await.unwrap();
        clock.advance_secs(100);
        store.record("10.0.0.1", None).await.unwrap();
        clock.advance_secs(3_550);

        // now = 4_650, cutoff = 1_050
        assert_eq!(store.cleanup(3_600).await.unwrap(), 1);
        assert_eq!(store.cleanup(3_600).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }
}
