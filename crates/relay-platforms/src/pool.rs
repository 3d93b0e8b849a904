//! Bounded-concurrency enrichment pool.
//!
//! Used wherever the bulk APIs do not return a needed per-item figure and
//! the engine has to issue one call per item (child listings, creative
//! details, per-media insights). A small fixed worker count pulls item ids
//! from a shared FIFO queue; each worker swallows its own per-item errors
//! so one failing item never aborts the batch.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub concurrency: usize,
    /// Hard cap on items considered, protecting a rate-limited API from
    /// an accidental enumeration of thousands of items.
    pub max_items: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_items: 500,
        }
    }
}

/// Partial result map plus the count of items that failed enrichment.
#[derive(Debug)]
pub struct EnrichmentOutcome<K, V> {
    pub values: HashMap<K, V>,
    pub failed: usize,
}

/// Run `fetch` for every item with `min(config.concurrency, items.len())`
/// workers. Errors are logged and counted, never propagated.
pub async fn enrich_many<K, V, F, Fut>(
    mut items: Vec<K>,
    config: PoolConfig,
    fetch: F,
) -> EnrichmentOutcome<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, ApiError>> + Send,
{
    if items.len() > config.max_items {
        warn!(
            total = items.len(),
            cap = config.max_items,
            "enrichment item list exceeds cap, truncating"
        );
        items.truncate(config.max_items);
    }

    let workers = config.concurrency.max(1).min(items.len());
    if workers == 0 {
        return EnrichmentOutcome {
            values: HashMap::new(),
            failed: 0,
        };
    }

    let items = Arc::new(items);
    let cursor = Arc::new(AtomicUsize::new(0));
    let results = Arc::new(Mutex::new(HashMap::new()));
    let failures = Arc::new(AtomicUsize::new(0));
    let fetch = Arc::new(fetch);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let items = Arc::clone(&items);
        let cursor = Arc::clone(&cursor);
        let results = Arc::clone(&results);
        let failures = Arc::clone(&failures);
        let fetch = Arc::clone(&fetch);
        handles.push(tokio::spawn(async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    break;
                };
                match fetch(item.clone()).await {
                    Ok(value) => {
                        results.lock().await.insert(item.clone(), value);
                    }
                    Err(err) => {
                        warn!(item = %item, error = %err, "enrichment failed, skipping item");
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let values = Arc::try_unwrap(results)
        .map(|m| m.into_inner())
        .unwrap_or_default();
    EnrichmentOutcome {
        values,
        failed: failures.load(Ordering::SeqCst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("item-{i}")).collect()
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_the_batch() {
        let config = PoolConfig {
            concurrency: 4,
            max_items: 500,
        };
        let outcome = enrich_many(ids(10), config, |id: String| async move {
            if id == "item-7" {
                Err(ApiError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(id.len())
            }
        })
        .await;

        assert_eq!(outcome.values.len(), 9);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.values.contains_key("item-7"));
    }

    #[tokio::test]
    async fn item_cap_truncates_the_queue() {
        let config = PoolConfig {
            concurrency: 2,
            max_items: 3,
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let outcome = enrich_many(ids(10), config, move |id: String| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            }
        })
        .await;

        assert_eq!(outcome.values.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let outcome =
            enrich_many(Vec::<String>::new(), PoolConfig::default(), |id: String| {
                async move { Ok(id) }
            })
            .await;
        assert!(outcome.values.is_empty());
        assert_eq!(outcome.failed, 0);
    }
}
