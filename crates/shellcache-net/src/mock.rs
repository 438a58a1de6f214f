//! Scripted in-memory networks for exercising strategies without sockets.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use hashbrown::HashMap;
use http::{HeaderValue, StatusCode};

use crate::{NetError, Network, Request, Response};

/// Scripted behaviour for one URL.
#[derive(Debug, Clone)]
pub enum MockRoute {
    /// Answer with a response.
    Respond {
        status: StatusCode,
        body: Bytes,
        content_type: Option<&'static str>,
    },
    /// Reject the fetch as a network failure.
    Fail,
    /// Never settle.
    Hang,
}

/// A network whose answers are set per URL.
///
/// Unknown URLs answer `404 Not Found`.
#[derive(Debug, Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, MockRoute>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a 200 response.
    pub fn with_ok(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.respond(url, StatusCode::OK, body);
        self
    }

    /// Script a response with an arbitrary status.
    pub fn respond(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) {
        self.route(
            url,
            MockRoute::Respond {
                status,
                body: body.into(),
                content_type: None,
            },
        );
    }

    /// Script a network failure.
    pub fn fail(&self, url: &str) {
        self.route(url, MockRoute::Fail);
    }

    /// Script a fetch that never settles.
    pub fn hang(&self, url: &str) {
        self.route(url, MockRoute::Hang);
    }

    pub fn route(&self, url: &str, route: MockRoute) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), route);
    }

    /// Make every fetch fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }
}

impl Network for MockNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        let url = request.url_without_fragment();
        let key = url.to_string();

        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return future::ready(Err(NetError::Offline(key))).boxed();
        }

        let route = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        match route {
            Some(MockRoute::Respond {
                status,
                body,
                content_type,
            }) => {
                let mut response = Response::new(url, status, body);
                if let Some(content_type) = content_type {
                    response = response.with_header(
                        http::header::CONTENT_TYPE,
                        HeaderValue::from_static(content_type),
                    );
                }
                future::ready(Ok(response)).boxed()
            }
            Some(MockRoute::Fail) => future::ready(Err(NetError::Offline(key))).boxed(),
            Some(MockRoute::Hang) => future::pending::<Result<Response, NetError>>().boxed(),
            None => future::ready(Ok(Response::new(url, StatusCode::NOT_FOUND, Bytes::new()))).boxed(),
        }
    }
}

/// A network where every fetch stays pending forever.
#[derive(Debug, Default)]
pub struct PendingNetwork {
    calls: AtomicUsize,
}

impl PendingNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Network for PendingNetwork {
    fn fetch(&self, _request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        future::pending::<Result<Response, NetError>>().boxed()
    }
}
