//! Entry-count and byte-budget enforcement.
//!
//! Eviction is FIFO over insertion order, not LRU: reading an entry never
//! refreshes its position, only rewriting it does.

use tracing::{debug, warn};

use crate::cache::SharedCaches;

/// Trim `name` down to `max_entries`, oldest first. Returns how many were removed.
pub async fn enforce_limit(caches: &SharedCaches, name: &str, max_entries: usize) -> usize {
    let mut storage = caches.write().await;
    let Some(cache) = storage.get_mut(name) else {
        debug!(cache = %name, "Eviction skipped, cache does not exist");
        return 0;
    };

    let count = cache.len();
    if count <= max_entries {
        return 0;
    }

    let victims: Vec<String> = cache
        .keys()
        .into_iter()
        .take(count - max_entries)
        .map(str::to_string)
        .collect();

    let mut removed = 0;
    for key in &victims {
        if cache.delete(key) {
            removed += 1;
        } else {
            warn!(cache = %name, key = %key, "Eviction delete failed");
        }
    }

    debug!(cache = %name, removed, limit = max_entries, "Evicted oldest entries");
    removed
}

/// Evict oldest entries across `names`, in the given order, until their combined
/// size fits `max_bytes`. Best-effort; returns how many were removed.
pub async fn enforce_byte_budget(caches: &SharedCaches, names: &[&str], max_bytes: u64) -> usize {
    let mut storage = caches.write().await;

    let mut total: u64 = names
        .iter()
        .filter_map(|n| storage.get(n))
        .map(|c| c.approximate_size())
        .sum();
    if total <= max_bytes {
        return 0;
    }

    let mut removed = 0;
    for name in names {
        let Some(cache) = storage.get_mut(name) else {
            continue;
        };
        while total > max_bytes {
            let Some((key, size)) = cache
                .entries()
                .next()
                .map(|e| (e.url.clone(), e.size()))
            else {
                break;
            };
            if !cache.delete(&key) {
                warn!(cache = %name, key = %key, "Eviction delete failed");
                break;
            }
            total = total.saturating_sub(size);
            removed += 1;
        }
        if total <= max_bytes {
            break;
        }
    }

    debug!(removed, remaining_bytes = total, budget = max_bytes, "Byte budget enforced");
    removed
}
