//! Network-first and stale-while-revalidate fetch strategies.
//!
//! Network failures are expected here and never escape: the caller always
//! gets a well-formed [`Response`]. Only cache store errors propagate.

use std::sync::Arc;

use shellcache_net::{NetError, Network, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::{Cache, CacheError};

/// A response handed back to the interception hook.
#[derive(Debug)]
pub struct StrategyResponse {
    pub response: Response,
    /// Background refresh still running after the response was returned.
    pub revalidation: Option<Revalidation>,
}

impl StrategyResponse {
    fn settled(response: Response) -> Self {
        Self {
            response,
            revalidation: None,
        }
    }
}

/// How a background refresh ended.
#[derive(Debug)]
pub enum RevalidationOutcome {
    /// Fresh 2xx response stored.
    Updated(Response),
    /// Fresh response was not 2xx and was not stored.
    NotCached(Response),
    /// The network failed; the cache is unchanged.
    Failed(NetError),
    /// Writing the fresh response failed.
    StoreFailed(CacheError),
    /// The task did not run to completion.
    Aborted,
}

impl RevalidationOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Handle to a detached cache refresh.
///
/// Dropping the handle does not cancel the refresh.
#[derive(Debug)]
pub struct Revalidation {
    url: Url,
    handle: JoinHandle<RevalidationOutcome>,
}

impl Revalidation {
    fn spawn(cache: Cache, network: Arc<dyn Network>, request: Request) -> Self {
        let url = request.url.clone();
        let handle = tokio::spawn(async move {
            match network.fetch(request.clone()).await {
                Ok(response) if response.ok() => match cache.put(&request, &response).await {
                    Ok(()) => {
                        trace!(url = %request.url, "Revalidated");
                        RevalidationOutcome::Updated(response)
                    }
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "Revalidation write failed");
                        RevalidationOutcome::StoreFailed(e)
                    }
                },
                Ok(response) => RevalidationOutcome::NotCached(response),
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Revalidation fetch failed");
                    RevalidationOutcome::Failed(e)
                }
            }
        });
        Self { url, handle }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the refresh to finish.
    pub async fn settled(self) -> RevalidationOutcome {
        self.handle.await.unwrap_or(RevalidationOutcome::Aborted)
    }
}

/// Network first, falling back to the cached copy, then to the fallback document.
///
/// A successful 2xx response is stored before it is returned.
pub async fn network_first(
    cache: &Cache,
    network: &dyn Network,
    request: Request,
    fallback: &Url,
) -> Result<StrategyResponse, CacheError> {
    match network.fetch(request.clone()).await {
        Ok(fresh) => {
            if fresh.ok() {
                cache.put(&request, &fresh).await?;
            }
            Ok(StrategyResponse::settled(fresh))
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Navigation fetch failed, using cache");

            if let Some(cached) = cache.match_request(&request).await {
                return Ok(StrategyResponse::settled(cached));
            }
            if let Some(offline_page) = cache.match_url(fallback).await {
                return Ok(StrategyResponse::settled(offline_page));
            }

            warn!(url = %request.url, fallback = %fallback, "No cached page or fallback document");
            Ok(StrategyResponse::settled(Response::offline(request.url)))
        }
    }
}

/// Serve the cached copy immediately and refresh it in the background.
///
/// On a cache miss the refresh is awaited instead; if it fails the synthetic
/// offline response is returned.
pub async fn stale_while_revalidate(
    cache: &Cache,
    network: &Arc<dyn Network>,
    request: Request,
) -> Result<StrategyResponse, CacheError> {
    let cached = cache.match_request(&request).await;
    let revalidation = Revalidation::spawn(cache.clone(), Arc::clone(network), request.clone());

    if let Some(cached) = cached {
        return Ok(StrategyResponse {
            response: cached,
            revalidation: Some(revalidation),
        });
    }

    let response = match revalidation.settled().await {
        RevalidationOutcome::Updated(response) | RevalidationOutcome::NotCached(response) => {
            response
        }
        RevalidationOutcome::StoreFailed(e) => return Err(e),
        RevalidationOutcome::Failed(_) | RevalidationOutcome::Aborted => {
            Response::offline(request.url)
        }
    };
    Ok(StrategyResponse::settled(response))
}
