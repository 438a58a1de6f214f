//! Best-effort app-shell download during install.

use futures::future::join_all;
use http::StatusCode;
use shellcache_net::{CacheMode, NetError, Network, Request};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{Cache, CacheError};

/// Why one manifest entry was not stored.
#[derive(Error, Debug)]
pub enum PrecacheFailure {
    #[error("network error: {0}")]
    Network(#[from] NetError),

    #[error("unexpected status {0}")]
    Status(StatusCode),
}

/// Result for one manifest entry.
#[derive(Debug)]
pub enum PrecacheOutcome {
    Cached,
    Failed(PrecacheFailure),
}

#[derive(Debug)]
pub struct PrecacheItem {
    pub url: Url,
    pub outcome: PrecacheOutcome,
}

impl PrecacheItem {
    pub fn is_cached(&self) -> bool {
        matches!(self.outcome, PrecacheOutcome::Cached)
    }
}

/// Aggregated outcome of a precache batch, in manifest order.
#[derive(Debug)]
pub struct PrecacheReport {
    pub cache_name: String,
    pub items: Vec<PrecacheItem>,
}

impl PrecacheReport {
    /// URLs that were stored.
    pub fn cached(&self) -> impl Iterator<Item = &Url> {
        self.items.iter().filter(|i| i.is_cached()).map(|i| &i.url)
    }

    /// Entries that were skipped.
    pub fn failed(&self) -> impl Iterator<Item = &PrecacheItem> {
        self.items.iter().filter(|i| !i.is_cached())
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Whether every manifest entry was stored.
    pub fn is_complete(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Fetch every URL independently and store each 2xx response in `cache`.
///
/// Individual fetch failures are recorded in the report and never fail the
/// batch. Only cache write errors propagate.
pub async fn precache(
    cache: &Cache,
    network: &dyn Network,
    urls: &[Url],
) -> Result<PrecacheReport, CacheError> {
    info!(cache = %cache.name(), count = urls.len(), "Precaching");

    let attempts = urls.iter().map(|url| async move {
        let request = Request::get(url.clone()).cache_mode(CacheMode::Reload);
        let outcome = match network.fetch(request.clone()).await {
            Ok(response) if response.ok() => {
                cache.put(&request, &response).await?;
                debug!(url = %url, "Precached");
                PrecacheOutcome::Cached
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status, "Precache skipped");
                PrecacheOutcome::Failed(PrecacheFailure::Status(response.status))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Precache skipped");
                PrecacheOutcome::Failed(PrecacheFailure::Network(e))
            }
        };
        Ok::<_, CacheError>(PrecacheItem {
            url: url.clone(),
            outcome,
        })
    });

    let items = join_all(attempts)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let report = PrecacheReport {
        cache_name: cache.name().to_string(),
        items,
    };

    info!(
        cache = %report.cache_name,
        cached = report.items.len() - report.failure_count(),
        failed = report.failure_count(),
        "Precache finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheStorage;
    use shellcache_net::MockNetwork;

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|s| Url::parse(s).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_all_cached() {
        let network = MockNetwork::new()
            .with_ok("https://example.com/", "<html>")
            .with_ok("https://example.com/styles.css", "body{}");
        let cache = CacheStorage::new().open("admin-cache-v1").await;

        let report = precache(
            &cache,
            &network,
            &urls(&["https://example.com/", "https://example.com/styles.css"]),
        )
        .await
        .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.cached().count(), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let network = MockNetwork::new().with_ok("https://example.com/a.js", "a");
        network.fail("https://example.com/b.js");
        let cache = CacheStorage::new().open("v1").await;

        let report = precache(
            &cache,
            &network,
            &urls(&[
                "https://example.com/a.js",
                "https://example.com/b.js",
                "https://example.com/missing.js",
            ]),
        )
        .await
        .unwrap();

        assert_eq!(report.failure_count(), 2);
        let failed: Vec<_> = report.failed().collect();
        assert!(matches!(
            failed[0].outcome,
            PrecacheOutcome::Failed(PrecacheFailure::Network(_))
        ));
        assert!(matches!(
            failed[1].outcome,
            PrecacheOutcome::Failed(PrecacheFailure::Status(StatusCode::NOT_FOUND))
        ));
        assert_eq!(cache.keys().await, vec!["https://example.com/a.js"]);
    }

    #[tokio::test]
    async fn test_report_keeps_manifest_order() {
        let network = MockNetwork::new();
        let cache = CacheStorage::new().open("v1").await;
        let manifest = urls(&["https://example.com/z.js", "https://example.com/a.js"]);

        let report = precache(&cache, &network, &manifest).await.unwrap();
        let order: Vec<_> = report.items.iter().map(|i| i.url.clone()).collect();
        assert_eq!(order, manifest);
    }
}
