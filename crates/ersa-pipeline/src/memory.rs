use std::time::Duration;

use moka::future::Cache;

use ersa_models::market::TickerUniverseEntry;

/// In-memory hot cache of validation verdicts backed by moka.
///
/// Sits in front of the `ticker_universe` table so repeat validations of
/// the same symbol skip both SQLite and the provider. Entries evict after
/// the verdict TTL.
pub struct VerdictCache {
    inner: Cache<String, TickerUniverseEntry>,
}

impl VerdictCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<TickerUniverseEntry> {
        self.inner.get(symbol).await
    }

    pub async fn insert(&self, entry: TickerUniverseEntry) {
        self.inner.insert(entry.symbol.clone(), entry).await;
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.inner.invalidate(symbol).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(symbol: &str) -> TickerUniverseEntry {
        TickerUniverseEntry {
            symbol: symbol.to_string(),
            rejection: None,
            exchange: Some("NYQ".to_string()),
            quote_type: Some("EQUITY".to_string()),
            market_cap: Some(10_000_000_000),
            history_days: Some(504),
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = VerdictCache::new(100, Duration::from_secs(60));
        cache.insert(entry("AAPL")).await;
        assert!(cache.get("AAPL").await.is_some());
        assert!(cache.get("MSFT").await.is_none());
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = VerdictCache::new(100, Duration::from_millis(50));
        cache.insert(entry("AAPL")).await;
        assert!(cache.get("AAPL").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("AAPL").await.is_none());
    }

    #[tokio::test]
    async fn invalidate() {
        let cache = VerdictCache::new(100, Duration::from_secs(60));
        cache.insert(entry("AAPL")).await;
        cache.invalidate("AAPL").await;
        assert!(cache.get("AAPL").await.is_none());
    }
}
