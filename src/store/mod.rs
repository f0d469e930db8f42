//! Attempt storage.
//!
//! The store is an append-only log of login attempts with time-windowed
//! counting queries. Records are never edited except for the advisory
//! `blocked` flag, and are removed only by retention cleanup.

mod file;
mod memory;

pub use file::FileAttemptStore;
pub use memory::MemoryAttemptStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Store-assigned identity of an attempt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single recorded login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: AttemptId,
    /// Network origin of the attempt
    pub client_address: String,
    /// Account identifier, absent when the attempt is tracked by address only
    #[serde(default)]
    pub account_identifier: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Advisory marker, never consulted when counting
    #[serde(default)]
    pub blocked: bool,
}

/// Filter applied by the counting and listing queries.
///
/// `None` on a dimension leaves it unconstrained.
#[derive(Debug, Clone, Copy)]
pub struct AttemptQuery<'a> {
    pub client_address: Option<&'a str>,
    pub account_identifier: Option<&'a str>,
    /// Inclusive lower bound on `occurred_at`
    pub since: DateTime<Utc>,
}

impl AttemptQuery<'_> {
    /// Check whether a record falls inside this query.
    pub fn matches(&self, record: &AttemptRecord) -> bool {
        if record.occurred_at < self.since {
            return false;
        }
        if let Some(address) = self.client_address {
            if record.client_address != address {
                return false;
            }
        }
        match self.account_identifier {
            Some(account) => record.account_identifier.as_deref() == Some(account),
            None => true,
        }
    }
}

/// Durable log of login attempts.
///
/// Window arguments are in seconds and are measured back from the store's
/// own clock. All `count_*` and `list_recent` calls are read-only.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Append an attempt stamped with the current time.
    async fn record(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
    ) -> Result<AttemptRecord>;

    /// Count attempts from `client_address` within the window. When an
    /// identifier is given it must match too; when it is absent the
    /// identifier is ignored entirely.
    async fn count_attempts(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
        window_secs: u64,
    ) -> Result<u64>;

    /// Count attempts from `client_address` regardless of identifier.
    async fn count_by_address(&self, client_address: &str, window_secs: u64) -> Result<u64>;

    /// Count attempts for `account_identifier` regardless of address.
    async fn count_by_account(&self, account_identifier: &str, window_secs: u64) -> Result<u64>;

    /// Attempts within the window, newest first. An empty or absent address
    /// and an absent identifier widen the match.
    async fn list_recent(
        &self,
        client_address: Option<&str>,
        account_identifier: Option<&str>,
        window_secs: u64,
    ) -> Result<Vec<AttemptRecord>>;

    /// Set the advisory `blocked` flag. Returns `false` if no record has `id`.
    async fn set_blocked(&self, id: AttemptId, blocked: bool) -> Result<bool>;

    /// Delete every record older than the watch period; returns how many went.
    async fn cleanup(&self, watch_period_secs: u64) -> Result<u64>;

    /// True once the address/identifier pair reached `max_attempts` within
    /// the window.
    async fn is_blocked(
        &self,
        client_address: &str,
        account_identifier: Option<&str>,
        max_attempts: u32,
        window_secs: u64,
    ) -> Result<bool> {
        let count = self
            .count_attempts(client_address, account_identifier, window_secs)
            .await?;
        Ok(count >= u64::from(max_attempts))
    }
}

/// In-memory record set shared by the store implementations.
#[derive(Debug, Default)]
pub(crate) struct AttemptLog {
    records: Vec<AttemptRecord>,
    next_id: u64,
}

impl AttemptLog {
    pub(crate) fn from_records(records: Vec<AttemptRecord>) -> Self {
        let next_id = records.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
        Self { records, next_id }
    }

    /// Build the next record without storing it. The id is reserved even if
    /// the record is never pushed.
    pub(crate) fn next_record(
        &mut self,
        client_address: &str,
        account_identifier: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> AttemptRecord {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        AttemptRecord {
            id: AttemptId(id),
            client_address: client_address.to_string(),
            account_identifier: account_identifier.map(str::to_string),
            occurred_at,
            blocked: false,
        }
    }

    pub(crate) fn push(&mut self, record: AttemptRecord) {
        self.next_id = self.next_id.max(record.id.0 + 1);
        self.records.push(record);
    }

    pub(crate) fn count(&self, query: &AttemptQuery<'_>) -> u64 {
        self.records.iter().filter(|r| query.matches(r)).count() as u64
    }

    pub(crate) fn list_newest_first(&self, query: &AttemptQuery<'_>) -> Vec<AttemptRecord> {
        let mut matched: Vec<AttemptRecord> = self
            .records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        matched
    }

    pub(crate) fn set_blocked(&mut self, id: AttemptId, blocked: bool) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.blocked = blocked;
                true
            }
            None => false,
        }
    }

    /// Drop records strictly older than `before`.
    pub(crate) fn purge_before(&mut self, before: DateTime<Utc>) -> u64 {
        let len = self.records.len();
        self.records.retain(|r| r.occurred_at >= before);
        (len - self.records.len()) as u64
    }

    pub(crate) fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub(crate) fn find(&self, id: AttemptId) -> Option<&AttemptRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// Treat an empty address as "no address filter".
pub(crate) fn address_filter(client_address: Option<&str>) -> Option<&str> {
    client_address.filter(|a| !a.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, address: &str, account: Option<&str>, at: i64) -> AttemptRecord {
        AttemptRecord {
            id: AttemptId(id),
            client_address: address.to_string(),
            account_identifier: account.map(str::to_string),
            occurred_at: DateTime::from_timestamp(at, 0).unwrap(),
            blocked: false,
        }
    }

    #[test]
    fn test_query_without_account_ignores_identifier() {
        let query = AttemptQuery {
            client_address: Some("10.0.0.1"),
            account_identifier: None,
            since: DateTime::from_timestamp(0, 0).unwrap(),
        };

        assert!(query.matches(&record(1, "10.0.0.1", Some("alice"), 10)));
        assert!(query.matches(&record(2, "10.0.0.1", None, 10)));
        assert!(!query.matches(&record(3, "10.0.0.2", None, 10)));
    }

    #[test]
    fn test_query_with_account_requires_exact_match() {
        let query = AttemptQuery {
            client_address: None,
            account_identifier: Some("alice"),
            since: DateTime::from_timestamp(0, 0).unwrap(),
        };

        assert!(query.matches(&record(1, "10.0.0.1", Some("alice"), 10)));
        assert!(query.matches(&record(2, "10.0.0.9", Some("alice"), 10)));
        assert!(!query.matches(&record(3, "10.0.0.1", None, 10)));
        assert!(!query.matches(&record(4, "10.0.0.1", Some("bob"), 10)));
    }

    #[test]
    fn test_query_since_is_inclusive() {
        let query = AttemptQuery {
            client_address: None,
            account_identifier: None,
            since: DateTime::from_timestamp(100, 0).unwrap(),
        };

        assert!(query.matches(&record(1, "a", None, 100)));
        assert!(!query.matches(&record(2, "a", None, 99)));
    }

    #[test]
    fn test_log_assigns_ids_after_loaded_records() {
        let mut log = AttemptLog::from_records(vec![record(7, "a", None, 1), record(3, "a", None, 2)]);
        let next = log.next_record("b", None, DateTime::from_timestamp(3, 0).unwrap());
        assert_eq!(next.id, AttemptId(8));
    }

    #[test]
    fn test_unpushed_record_burns_its_id() {
        let mut log = AttemptLog::default();
        let at = DateTime::from_timestamp(1, 0).unwrap();

        // A write that failed after the id was handed out
        let lost = log.next_record("a", None, at);
        let next = log.next_record("a", None, at);
        assert_eq!(lost.id, AttemptId(1));
        assert_eq!(next.id, AttemptId(2));

        log.push(next);
        assert_eq!(log.next_record("a", None, at).id, AttemptId(3));
    }

    #[test]
    fn test_log_lists_newest_first() {
        let mut log = AttemptLog::default();
        log.push(record(1, "a", None, 10));
        log.push(record(2, "a", None, 30));
        log.push(record(3, "a", None, 20));

        let query = AttemptQuery {
            client_address: Some("a"),
            account_identifier: None,
            since: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let ids: Vec<u64> = log.list_newest_first(&query).iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_log_purge_before_is_strict() {
        let mut log = AttemptLog::default();
        log.push(record(1, "a", None, 10));
        log.push(record(2, "a", None, 20));
        log.push(record(3, "a", None, 30));

        let removed = log.purge_before(DateTime::from_timestamp(20, 0).unwrap());
        assert_eq!(removed, 1);
        assert_eq!(log.records().len(), 2);
    }

    #[test]
    fn test_empty_address_filter_is_widened() {
        assert_eq!(address_filter(Some("")), None);
        assert_eq!(address_filter(Some("10.0.0.1")), Some("10.0.0.1"));
        assert_eq!(address_filter(None), None);
    }
}
