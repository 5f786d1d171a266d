use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::{CurrencyBalance, PositionSummary};

/// String-keyed in-memory cache where every entry lives for the same TTL.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        // Check if the key is cached and still valid
        if let Some((value, stored)) = entries.get(key) {
            if now.duration_since(*stored) < self.ttl {
                return Some(value.clone());
            }
            entries.remove(key);
        }
        None
    }

    pub async fn insert(&self, key: String, value: V) {
        self.entries
            .lock()
            .await
            .insert(key, (value, Instant::now()));
    }

    pub async fn remove(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Drops every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, stored)| now.duration_since(*stored) < self.ttl);
        before - entries.len()
    }
}

pub fn currencies_key(username: &str) -> String {
    format!("currencies_{}", username)
}

pub fn stocks_key(username: &str) -> String {
    format!("stocks_{}", username)
}

/// Per-user portfolio halves, cached independently.
pub struct PortfolioCache {
    currencies: TtlCache<Vec<CurrencyBalance>>,
    stocks: TtlCache<Vec<PositionSummary>>,
}

impl PortfolioCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            currencies: TtlCache::new(ttl),
            stocks: TtlCache::new(ttl),
        }
    }

    pub async fn currencies(&self, username: &str) -> Option<Vec<CurrencyBalance>> {
        self.currencies.get(&currencies_key(username)).await
    }

    pub async fn store_currencies(&self, username: &str, balances: Vec<CurrencyBalance>) {
        self.currencies
            .insert(currencies_key(username), balances)
            .await;
    }

    pub async fn stocks(&self, username: &str) -> Option<Vec<PositionSummary>> {
        self.stocks.get(&stocks_key(username)).await
    }

    pub async fn store_stocks(&self, username: &str, positions: Vec<PositionSummary>) {
        self.stocks.insert(stocks_key(username), positions).await;
    }

    /// Evicts both entries for a user. Must run after every committed trade.
    pub async fn invalidate(&self, username: &str) {
        self.currencies.remove(&currencies_key(username)).await;
        self.stocks.remove(&stocks_key(username)).await;
        tracing::debug!("Portfolio cache invalidated for {}", username);
    }

    pub async fn purge_expired(&self) -> usize {
        self.currencies.purge_expired().await + self.stocks.purge_expired().await
    }

    /// Purges expired entries every `period`, forever.
    pub async fn continuously_purge_expired(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = self.purge_expired().await;
            if removed > 0 {
                tracing::debug!("Purged {} expired portfolio cache entries", removed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balances() -> Vec<CurrencyBalance> {
        vec![CurrencyBalance {
            amount: dec!(10.5),
            sign: "$".to_string(),
        }]
    }

    #[test]
    fn keys_are_namespaced_by_user() {
        assert_eq!(currencies_key("alice"), "currencies_alice");
        assert_eq!(stocks_key("alice"), "stocks_alice");
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.insert("k".to_string(), 1).await;

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("k").await, Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired_entries() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.insert("old".to_string(), "a").await;
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.insert("new".to_string(), "b").await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.get("new").await, Some("b"));
    }

    #[tokio::test]
    async fn invalidate_evicts_both_halves_for_that_user_only() {
        let cache = PortfolioCache::new(Duration::from_secs(300));
        cache.store_currencies("alice", balances()).await;
        cache.store_stocks("alice", Vec::new()).await;
        cache.store_currencies("bob", balances()).await;

        cache.invalidate("alice").await;

        assert!(cache.currencies("alice").await.is_none());
        assert!(cache.stocks("alice").await.is_none());
        assert_eq!(cache.currencies("bob").await, Some(balances()));
    }
}
