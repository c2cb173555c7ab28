//! Session-scoped store of anonymization mappings

use crate::error::{Result, WardenError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Placeholder to original value, for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationMapping {
    pub session_id: String,
    pub entries: BTreeMap<String, String>,
}

impl AnonymizationMapping {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.entries.get(placeholder).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sessions kept before the least recently used one is evicted
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Idle time after which a session's mapping is dropped
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Append-only mapping state of one session
#[derive(Debug, Default)]
struct SessionVault {
    by_placeholder: HashMap<String, String>,
    by_value: HashMap<String, String>,
    counters: HashMap<String, usize>,
}

impl SessionVault {
    /// Placeholder for `value`, never one that occurs literally in `text`
    fn placeholder_for(&mut self, category: &str, value: &str, text: &str) -> String {
        if let Some(existing) = self.by_value.get(value) {
            if !text.contains(existing.as_str()) {
                return existing.clone();
            }
        }

        let counter = self.counters.entry(category.to_string()).or_insert(0);
        let placeholder = loop {
            *counter += 1;
            let candidate = format!("<{category}_{counter}>");
            if !text.contains(&candidate) {
                break candidate;
            }
        };

        // Older aliases of the same value stay resolvable
        self.by_value.insert(value.to_string(), placeholder.clone());
        self.by_placeholder
            .insert(placeholder.clone(), value.to_string());
        placeholder
    }
}

#[derive(Debug, Default)]
struct SessionEntry {
    state: Mutex<SessionVault>,
    /// Milliseconds since the vault was created
    touched_ms: AtomicU64,
}

/// Process-wide vault, one lock per session
///
/// Sessions never contend with each other; calls for the same session
/// serialize on that session's lock, so placeholder allocation stays
/// idempotent under concurrency. Idle sessions expire after the TTL and the
/// least recently used one is dropped once `max_sessions` is reached.
#[derive(Debug)]
pub struct Vault {
    sessions: DashMap<String, Arc<SessionEntry>>,
    epoch: Instant,
    ttl: Duration,
    max_sessions: usize,
}

impl Default for Vault {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_TTL, DEFAULT_MAX_SESSIONS)
    }
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            epoch: Instant::now(),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn touch(&self, entry: &SessionEntry) {
        entry.touched_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    fn session(&self, session_id: &str) -> Arc<SessionEntry> {
        if let Some(entry) = self.existing(session_id) {
            return entry;
        }

        if self.sessions.len() >= self.max_sessions {
            self.make_room();
        }

        // Clone the Arc out so no map shard lock is held across an await
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone();
        self.touch(&entry);
        entry
    }

    fn existing(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let entry = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())?;
        self.touch(&entry);
        Some(entry)
    }

    fn make_room(&self) {
        if self.evict_idle() > 0 {
            return;
        }

        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().touched_ms.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());
        if let Some(session_id) = oldest {
            debug!(session_id = %session_id, "vault full, evicting least recently used session");
            self.sessions.remove(&session_id);
        }
    }

    /// Allocate (or reuse) placeholders for `(category, value)` pairs
    ///
    /// All pairs are handled under a single acquisition of the session lock.
    /// Placeholders that already occur literally in `text` are never handed
    /// out, so restoring the rewritten text cannot touch what the user typed.
    pub async fn placeholders(
        &self,
        session_id: &str,
        values: &[(&str, &str)],
        text: &str,
    ) -> Vec<String> {
        let session = self.session(session_id);
        let mut vault = session.state.lock().await;
        values
            .iter()
            .map(|(category, value)| vault.placeholder_for(category, value, text))
            .collect()
    }

    /// Snapshot of a session's mapping
    pub async fn mapping(&self, session_id: &str) -> Result<AnonymizationMapping> {
        let session = self
            .existing(session_id)
            .ok_or_else(|| WardenError::VaultMiss(session_id.to_string()))?;
        let vault = session.state.lock().await;

        Ok(AnonymizationMapping {
            session_id: session_id.to_string(),
            entries: vault
                .by_placeholder
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Drop every session idle for longer than the TTL
    pub fn evict_idle(&self) -> usize {
        let ttl_ms = self.ttl.as_millis() as u64;
        let now = self.now_ms();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            now.saturating_sub(entry.touched_ms.load(Ordering::Relaxed)) <= ttl_ms
        });

        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "evicted idle vault sessions");
        }
        evicted
    }

    /// Drop a session's mapping at the end of its lifetime
    pub fn forget(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_are_per_category() {
        let vault = Vault::new();
        let placeholders = vault
            .placeholders(
                "s1",
                &[
                    ("EMAIL_ADDRESS", "a@x.io"),
                    ("SSN", "123-45-6789"),
                    ("EMAIL_ADDRESS", "b@x.io"),
                ],
                "",
            )
            .await;

        assert_eq!(
            placeholders,
            vec!["<EMAIL_ADDRESS_1>", "<SSN_1>", "<EMAIL_ADDRESS_2>"]
        );
    }

    #[tokio::test]
    async fn test_same_value_same_placeholder() {
        let vault = Vault::new();
        let first = vault.placeholders("s1", &[("SSN", "123-45-6789")], "").await;
        let second = vault.placeholders("s1", &[("SSN", "123-45-6789")], "").await;
        assert_eq!(first, second);
        assert_eq!(vault.mapping("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let vault = Vault::new();
        vault.placeholders("alice", &[("SSN", "111-11-1111")], "").await;
        let bob = vault.placeholders("bob", &[("SSN", "222-22-2222")], "").await;

        assert_eq!(bob, vec!["<SSN_1>"]);
        let alice = vault.mapping("alice").await.unwrap();
        assert_eq!(alice.get("<SSN_1>"), Some("111-11-1111"));
        assert_eq!(vault.session_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let vault = Vault::new();
        assert!(matches!(
            vault.mapping("ghost").await,
            Err(WardenError::VaultMiss(_))
        ));
    }

    #[tokio::test]
    async fn test_forget() {
        let vault = Vault::new();
        vault.placeholders("s1", &[("SSN", "123-45-6789")], "").await;
        assert!(vault.forget("s1"));
        assert!(!vault.forget("s1"));
        assert_eq!(vault.session_count(), 0);
    }

    #[tokio::test]
    async fn test_literal_placeholders_are_skipped() {
        let vault = Vault::new();
        let text = "field <SSN_1> holds 123-45-6789";
        let placeholders = vault.placeholders("s1", &[("SSN", "123-45-6789")], text).await;

        assert_eq!(placeholders, vec!["<SSN_2>"]);
        let mapping = vault.mapping("s1").await.unwrap();
        assert_eq!(mapping.get("<SSN_1>"), None);
    }

    #[tokio::test]
    async fn test_known_value_gets_alias_when_placeholder_is_typed() {
        let vault = Vault::new();
        vault.placeholders("s1", &[("SSN", "123-45-6789")], "").await;

        let aliased = vault
            .placeholders("s1", &[("SSN", "123-45-6789")], "<SSN_1> is 123-45-6789")
            .await;
        assert_eq!(aliased, vec!["<SSN_2>"]);

        let mapping = vault.mapping("s1").await.unwrap();
        assert_eq!(mapping.get("<SSN_1>"), Some("123-45-6789"));
        assert_eq!(mapping.get("<SSN_2>"), Some("123-45-6789"));
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let vault = Vault::with_limits(Duration::from_millis(20), DEFAULT_MAX_SESSIONS);
        vault.placeholders("stale", &[("SSN", "123-45-6789")], "").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        vault.placeholders("fresh", &[("SSN", "987-65-4321")], "").await;

        assert_eq!(vault.evict_idle(), 1);
        assert!(vault.mapping("stale").await.is_err());
        assert!(vault.mapping("fresh").await.is_ok());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let vault = Vault::with_limits(Duration::from_secs(3600), 2);
        vault.placeholders("a", &[("SSN", "111-11-1111")], "").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        vault.placeholders("b", &[("SSN", "222-22-2222")], "").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Reading "a" makes "b" the oldest
        vault.mapping("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        vault.placeholders("c", &[("SSN", "333-33-3333")], "").await;

        assert_eq!(vault.session_count(), 2);
        assert!(vault.mapping("a").await.is_ok());
        assert!(vault.mapping("b").await.is_err());
        assert!(vault.mapping("c").await.is_ok());
    }
}
