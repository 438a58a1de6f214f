//! Deletion of cache generations left behind by earlier versions.

use futures::future::join_all;
use tracing::info;

use crate::CacheStorage;

/// What a reaping pass removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapReport {
    /// The generation that was kept.
    pub current: String,
    /// Generations that were deleted, sorted.
    pub deleted: Vec<String>,
}

/// Delete every cache named `<prefix>*` except `current`.
///
/// Caches outside the namespace are left alone. All deletions have completed
/// when this returns.
pub async fn reap(storage: &CacheStorage, prefix: &str, current: &str) -> ReapReport {
    let stale: Vec<String> = storage
        .keys()
        .await
        .into_iter()
        .filter(|name| name.starts_with(prefix) && name != current)
        .collect();

    join_all(stale.iter().map(|name| storage.delete(name))).await;

    if !stale.is_empty() {
        info!(current = %current, deleted = ?stale, "Reaped stale cache generations");
    }

    ReapReport {
        current: current.to_string(),
        deleted: stale,
    }
}
