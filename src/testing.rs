//! Network-free fetcher and context helpers used by the crate's tests.

use crate::context::{Context, Shared, SharedParts};
use crate::crawler::MiddlewareManager;
use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::hooks::Hooks;
use crate::request::Request;
use crate::response::Response;
use crate::task::ScrapedItem;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

struct Route {
    status: u16,
    content_type: &'static str,
    body: String,
}

/// Answers every request with `200 Hello` unless a route or failure rule
/// says otherwise, and records what it was asked.
#[derive(Default)]
pub(crate) struct StubFetcher {
    routes: HashMap<String, Route>,
    failing_hosts: Vec<String>,
    delay: Option<Duration>,
    seen: Mutex<Vec<Request>>,
}

impl StubFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(mut self, url: &str, status: u16, content_type: &'static str, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status,
                content_type,
                body: body.to_string(),
            },
        );
        self
    }

    pub(crate) fn fail_host(mut self, host: &str) -> Self {
        self.failing_hosts.push(host.to_string());
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.seen.lock().clone()
    }

    pub(crate) fn count_path(&self, path: &str) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|r| r.url().is_some_and(|u| u.path() == path))
            .count()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.seen.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let url = request
            .url()
            .cloned()
            .ok_or_else(|| FetchError::MissingUrl(request.raw_url().to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(FetchError::Other(format!("unsupported scheme `{}`", url.scheme())));
        }
        if let Some(host) = url.host_str() {
            if self.failing_hosts.iter().any(|h| h == host) {
                return Err(FetchError::Other(format!("dns error: failed to lookup {host}")));
            }
        }
        match self.routes.get(url.as_str()) {
            Some(route) => Ok(Response::new(url, route.status, route.body.clone())
                .with_header("content-type", route.content_type)),
            None => Ok(Response::new(url, 200, "Hello").with_header("content-type", "text/plain")),
        }
    }
}

/// Shared crawler state wired to a default `StubFetcher` with no hooks.
pub(crate) fn detached_shared<I: ScrapedItem>() -> (Arc<Shared<I>>, SharedParts<I>) {
    let transport = MiddlewareManager::new(Arc::new(StubFetcher::new()), Vec::new());
    let parts = Shared::new("test".to_string(), Hooks::new(), transport, Span::none(), false);
    (Arc::clone(&parts.shared), parts)
}

/// A root context whose pending sets nobody reads.
pub(crate) fn detached_context<I: ScrapedItem>() -> Context<I> {
    Context::root(detached_shared().0)
}
