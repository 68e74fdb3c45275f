//! Transport layer: the fetcher wrapped in the middleware chain.
//!
//! Middlewares take `&self`, so the manager is shared between task workers
//! behind an `Arc` without a lock.

use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::middleware::{Middleware, MiddlewareAction};
use crate::request::Request;
use crate::response::Response;
use log::{debug, trace};
use std::sync::Arc;

pub struct MiddlewareManager {
    fetcher: Arc<dyn Fetcher>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareManager {
    pub fn new(fetcher: Arc<dyn Fetcher>, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            fetcher,
            middlewares,
        }
    }

    /// Runs `request` through the request middlewares, the fetcher, and the
    /// response middlewares in reverse order.
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut current = request.clone();

        for middleware in &self.middlewares {
            match middleware.process_request(current).await? {
                MiddlewareAction::Continue(req) => current = req,
                MiddlewareAction::Drop(reason) => {
                    debug!(
                        "Request dropped by middleware '{}' for {}: {}",
                        middleware.name(),
                        request,
                        reason
                    );
                    return Err(FetchError::Dropped {
                        middleware: middleware.name().to_string(),
                        reason,
                    });
                }
                MiddlewareAction::ReturnResponse(resp) => {
                    trace!(
                        "Middleware '{}' returned a response for {}",
                        middleware.name(),
                        request
                    );
                    return Ok(resp);
                }
            }
        }

        trace!("Fetching {}", current);
        let mut response = self.fetcher.fetch(&current).await?;

        for middleware in self.middlewares.iter().rev() {
            match middleware.process_response(response).await? {
                MiddlewareAction::Continue(res) => response = res,
                MiddlewareAction::ReturnResponse(res) => return Ok(res),
                MiddlewareAction::Drop(reason) => {
                    debug!(
                        "Response dropped by middleware '{}' for {}: {}",
                        middleware.name(),
                        request,
                        reason
                    );
                    return Err(FetchError::Dropped {
                        middleware: middleware.name().to_string(),
                        reason,
                    });
                }
            }
        }

        Ok(response)
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{AllowedDomains, DefaultHeaders};
    use crate::testing::StubFetcher;
    use async_trait::async_trait;

    struct Tagger;

    #[async_trait]
    impl Middleware for Tagger {
        fn name(&self) -> &str {
            "Tagger"
        }

        async fn process_response(&self, response: Response) -> Result<MiddlewareAction<Response>, FetchError> {
            Ok(MiddlewareAction::Continue(response.with_header("x-tagged", "1")))
        }
    }

    #[tokio::test]
    async fn request_and_response_chains_run() {
        let fetcher = Arc::new(StubFetcher::new());
        let manager = MiddlewareManager::new(
            fetcher.clone(),
            vec![Arc::new(DefaultHeaders::new().user_agent("spider")), Arc::new(Tagger)],
        );
        let resp = manager
            .fetch(&Request::get("https://example.com/"))
            .await
            .unwrap();
        assert_eq!(resp.header("x-tagged"), Some("1"));
        let seen = fetcher.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].header("user-agent"), Some("spider"));
    }

    #[tokio::test]
    async fn drops_become_fetch_errors() {
        let fetcher = Arc::new(StubFetcher::new());
        let manager = MiddlewareManager::new(
            fetcher.clone(),
            vec![Arc::new(AllowedDomains::new(["example.org"]))],
        );
        let err = manager
            .fetch(&Request::get("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Dropped { .. }));
        assert!(fetcher.requests().is_empty());
    }
}
