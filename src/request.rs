//! The request descriptor handed to the fetch collaborator.
//!
//! A `Request` may carry a construction error (for example an unparsable
//! URL). The crawler checks it before fetching and routes such tasks straight
//! to the request-error chain.

use crate::fingerprint::Fingerprint;
use crate::meta::Meta;
use bytes::Bytes;
use reqwest::Method;
use std::fmt;
use url::Url;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    raw_url: String,
    url: Option<Url>,
    /// Header name/value pairs. Repeated names are allowed.
    pub headers: Vec<(String, String)>,
    /// Cookie name/value pairs, sent in insertion order.
    pub cookies: Vec<(String, String)>,
    pub body: Bytes,
    /// Request-scoped metadata, e.g. the crawl depth tag.
    pub meta: Meta,
    error: Option<String>,
    relative: bool,
}

impl Request {
    /// Creates a request, recording a construction error when `url` does not
    /// parse. Relative URLs are kept and resolved later against the parent
    /// context's request.
    pub fn new(method: Method, url: &str) -> Self {
        let (parsed, error, relative) = match Url::parse(url) {
            Ok(u) => (Some(u), None, false),
            Err(url::ParseError::RelativeUrlWithoutBase) => (
                None,
                Some("relative URL without a base".to_string()),
                true,
            ),
            Err(e) => (None, Some(e.to_string()), false),
        };
        Request {
            method,
            raw_url: url.to_string(),
            url: parsed,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Bytes::new(),
            meta: Meta::new(),
            error,
            relative,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn from_url(url: Url) -> Self {
        Request {
            method: Method::GET,
            raw_url: url.to_string(),
            url: Some(url),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Bytes::new(),
            meta: Meta::new(),
            error: None,
            relative: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks the request as malformed; it will never be fetched.
    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self.relative = false;
        self
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The URL exactly as it was given at construction.
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.as_ref().and_then(Url::host_str)
    }

    /// Returns the first header value with the given name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Resolves a relative URL against `base`. Absolute and already-broken
    /// requests are left as they are.
    pub(crate) fn resolve_against(&mut self, base: &Url) {
        if !self.relative {
            return;
        }
        match base.join(&self.raw_url) {
            Ok(joined) => {
                self.raw_url = joined.to_string();
                self.url = Some(joined);
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
        self.relative = false;
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "{} {}", self.method, url),
            None => write!(f, "{} {}", self.method, self.raw_url),
        }
    }
}
