//! Transport middlewares wrapped around the fetch collaborator.
//!
//! Middlewares see every request on its way to the `Fetcher` (in registration
//! order) and every response on its way back (in reverse order). They belong
//! to the transport layer: a drop here surfaces as a fetch error, not as a
//! veto.

use crate::error::FetchError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

/// What a middleware wants to happen next.
#[derive(Debug)]
pub enum MiddlewareAction<T> {
    /// Hand the (possibly modified) value to the next stage.
    Continue(T),
    /// Stop here; the task fails with `FetchError::Dropped`.
    Drop(String),
    /// Short-circuit with a ready response.
    ReturnResponse(Response),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process_request(&self, request: Request) -> Result<MiddlewareAction<Request>, FetchError> {
        Ok(MiddlewareAction::Continue(request))
    }

    async fn process_response(&self, response: Response) -> Result<MiddlewareAction<Response>, FetchError> {
        Ok(MiddlewareAction::Continue(response))
    }
}

/// Adds headers that the request does not already carry.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: Vec<(String, String)>,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(self, ua: impl Into<String>) -> Self {
        self.header("User-Agent", ua)
    }
}

#[async_trait]
impl Middleware for DefaultHeaders {
    fn name(&self) -> &str {
        "DefaultHeaders"
    }

    async fn process_request(&self, mut request: Request) -> Result<MiddlewareAction<Request>, FetchError> {
        for (name, value) in &self.headers {
            if request.header(name).is_none() {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        Ok(MiddlewareAction::Continue(request))
    }
}

/// Drops requests whose host is not on the allow list. An entry of the form
/// `*.example.org` matches every subdomain of `example.org`.
#[derive(Debug, Clone)]
pub struct AllowedDomains {
    domains: Vec<String>,
}

impl AllowedDomains {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.domains.iter().any(|d| match d.strip_prefix("*.") {
            Some(suffix) => host.len() > suffix.len() && host.ends_with(&format!(".{suffix}")),
            None => *d == host,
        })
    }
}

#[async_trait]
impl Middleware for AllowedDomains {
    fn name(&self) -> &str {
        "AllowedDomains"
    }

    async fn process_request(&self, request: Request) -> Result<MiddlewareAction<Request>, FetchError> {
        match request.host() {
            Some(host) if self.is_allowed(host) => Ok(MiddlewareAction::Continue(request)),
            host => Ok(MiddlewareAction::Drop(format!(
                "host {} is not allowed",
                host.unwrap_or("<none>")
            ))),
        }
    }
}
