//! Units of work: `Task` (something to fetch) and `Item` (something produced).

use crate::context::Context;
use crate::error::SpiderError;
use crate::hooks::Handler;
use crate::meta::{Meta, MetaValue};
use crate::request::Request;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A payload that can travel through the item pool.
///
/// `as_error` lets sinks such as the error log recognise payloads that
/// represent failures.
pub trait ScrapedItem: Send + Sync + 'static {
    fn as_error(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl ScrapedItem for String {}
impl ScrapedItem for &'static str {}
impl ScrapedItem for serde_json::Value {}
impl ScrapedItem for Vec<u8> {}
impl ScrapedItem for bytes::Bytes {}

impl ScrapedItem for SpiderError {
    fn as_error(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self)
    }
}

impl ScrapedItem for anyhow::Error {
    fn as_error(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let err: &(dyn std::error::Error + Send + Sync + 'static) = self.as_ref();
        Some(err)
    }
}

impl<T, E> ScrapedItem for Result<T, E>
where
    T: ScrapedItem,
    E: std::error::Error + Send + Sync + 'static,
{
    fn as_error(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Ok(item) => item.as_error(),
            Err(e) => Some(e),
        }
    }
}

/// One request to fetch, plus the handlers bound to its completion.
pub struct Task<I: ScrapedItem> {
    pub request: Request,
    pub handlers: Vec<Arc<dyn Handler<I>>>,
    /// Metadata overlaid on the spawning context's snapshot at admission.
    pub meta: Meta,
}

impl<I: ScrapedItem> Task<I> {
    pub fn new(request: Request) -> Self {
        Task {
            request,
            handlers: Vec::new(),
            meta: Meta::new(),
        }
    }

    /// Appends a closure handler.
    pub fn then<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<I>) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(f));
        self
    }

    /// Appends an already-built handler.
    pub fn with_handler(mut self, handler: Arc<dyn Handler<I>>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key, value);
        self
    }
}

impl<I: ScrapedItem> fmt::Debug for Task<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("request", &self.request)
            .field("handlers", &self.handlers.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// One produced result together with the context that produced it.
pub struct Item<I: ScrapedItem> {
    pub ctx: Context<I>,
    pub payload: I,
}
