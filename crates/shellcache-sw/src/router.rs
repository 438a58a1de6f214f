//! Classification of intercepted requests.

use http::Method;
use shellcache_net::{ExclusionRules, Request};
use url::Url;

/// Why a request is left to the network untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    NonGet,
    CrossOrigin,
    /// Backend traffic (database, auth, server functions).
    Excluded,
}

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Passthrough(PassReason),
    /// Top-level documents: freshest HTML when online.
    NetworkFirst,
    /// Same-origin static assets.
    StaleWhileRevalidate,
}

/// Classify a request. Rules apply in order; the first match wins.
pub fn classify(request: &Request, scope: &Url, exclusions: &ExclusionRules) -> Route {
    if request.method != Method::GET {
        return Route::Passthrough(PassReason::NonGet);
    }
    if request.url.origin() != scope.origin() {
        return Route::Passthrough(PassReason::CrossOrigin);
    }
    if exclusions.is_excluded(&request.url) {
        return Route::Passthrough(PassReason::Excluded);
    }
    if request.is_navigation() {
        return Route::NetworkFirst;
    }
    Route::StaleWhileRevalidate
}
