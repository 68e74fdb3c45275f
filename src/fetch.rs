//! The fetch collaborator.
//!
//! The crawler never talks to the network itself; it hands each request to a
//! `Fetcher`. `ReqwestFetcher` is the default implementation.

use crate::error::FetchError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// Performs one request/response exchange.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// A `Fetcher` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request
            .url()
            .cloned()
            .ok_or_else(|| FetchError::MissingUrl(request.raw_url().to_string()))?;

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Other(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::Other(format!("invalid header value: {e}")))?;
            builder = builder.header(name, value);
        }
        if !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await?;
        let final_url = resp.url().clone();
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(Response {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_reported_without_network() {
        let fetcher = ReqwestFetcher::default();
        let err = fetcher
            .fetch(&Request::get("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MissingUrl(_)));
    }
}
