//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for configuring a `Crawler`:
//! pool sizes, the fetcher, transport middlewares, extensions and hooks.
//!
//! Everything registered through the builder lands in call order. Plugins,
//! extensions and hooks share the same chains, so an extension added after a
//! hook sees what that hook produced.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! let crawler = CrawlerBuilder::<String>::new("quotes")
//!     .task_pool_size(8)
//!     .with(Plugin::extension(Deduplicate::new()))
//!     .with(Plugin::middleware(DefaultHeaders::new().user_agent("quotes-bot")))
//!     .on_item(|_ctx, quote| Box::pin(async move {
//!         println!("{quote}");
//!         Ok(Some(quote))
//!     }))
//!     .build()
//!     .await?;
//! ```

use crate::context::{Context, Shared};
use crate::crawler::{Crawler, MiddlewareManager};
use crate::error::SpiderError;
use crate::extensions::Extension;
use crate::extract::{HtmlHandler, JsonHandler, Selection};
use crate::fetch::{Fetcher, ReqwestFetcher};
use crate::hooks::{ErrorStage, Handler, Hooks};
use crate::middleware::Middleware;
use crate::task::{ScrapedItem, Task};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// Configuration for the crawler's pools, drain detection and reporting.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Identity used in logs, progress lines and error records.
    pub name: String,
    /// Maximum number of tasks executing at once.
    pub task_pool_size: usize,
    /// Maximum number of items executing at once.
    pub item_pool_size: usize,
    /// How long the crawler must stay idle before `wait` returns.
    pub quiescence_window: Duration,
    /// Upper bound on how long `wait` sleeps between idleness checks.
    pub drain_poll_interval: Duration,
    /// Throughput sampling window.
    pub status_interval: Duration,
    /// When set, the progress line is logged at this interval.
    pub progress_log_interval: Option<Duration>,
    /// Log every fetched context at debug level.
    pub log_tasks: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            name: "crawler".to_string(),
            task_pool_size: num_cpus::get().max(10),
            item_pool_size: num_cpus::get().clamp(4, 10),
            quiescence_window: Duration::from_millis(50),
            drain_poll_interval: Duration::from_millis(100),
            status_interval: Duration::from_secs(5),
            progress_log_interval: None,
            log_tasks: false,
        }
    }
}

impl CrawlerConfig {
    pub(crate) fn validate(&self) -> Result<(), SpiderError> {
        if self.task_pool_size == 0 {
            return Err(SpiderError::ConfigurationError(
                "task_pool_size must be greater than 0.".to_string(),
            ));
        }
        if self.item_pool_size == 0 {
            return Err(SpiderError::ConfigurationError(
                "item_pool_size must be greater than 0.".to_string(),
            ));
        }
        if self.status_interval.is_zero() {
            return Err(SpiderError::ConfigurationError(
                "status_interval must be greater than 0.".to_string(),
            ));
        }
        if self.progress_log_interval.is_some_and(|d| d.is_zero()) {
            return Err(SpiderError::ConfigurationError(
                "progress_log_interval must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }
}

/// A configuration value handed to [`CrawlerBuilder::with`]: either an
/// extension installing hooks or a transport middleware.
pub enum Plugin<I: ScrapedItem> {
    Extension(Box<dyn Extension<I>>),
    Middleware(Arc<dyn Middleware>),
}

impl<I: ScrapedItem> Plugin<I> {
    pub fn extension(extension: impl Extension<I> + 'static) -> Self {
        Plugin::Extension(Box::new(extension))
    }

    pub fn middleware(middleware: impl Middleware + 'static) -> Self {
        Plugin::Middleware(Arc::new(middleware))
    }
}

pub struct CrawlerBuilder<I: ScrapedItem> {
    config: CrawlerConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    hooks: Hooks<I>,
    span: Option<Span>,
    deferred_errors: Vec<SpiderError>,
}

impl<I: ScrapedItem> Default for CrawlerBuilder<I> {
    fn default() -> Self {
        Self {
            config: CrawlerConfig::default(),
            fetcher: None,
            middlewares: Vec::new(),
            hooks: Hooks::new(),
            span: None,
            deferred_errors: Vec::new(),
        }
    }
}

impl<I: ScrapedItem> CrawlerBuilder<I> {
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = Self::default();
        builder.config.name = name.into();
        builder
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn task_pool_size(mut self, size: usize) -> Self {
        self.config.task_pool_size = size;
        self
    }

    pub fn item_pool_size(mut self, size: usize) -> Self {
        self.config.item_pool_size = size;
        self
    }

    pub fn quiescence_window(mut self, window: Duration) -> Self {
        self.config.quiescence_window = window;
        self
    }

    pub fn drain_poll_interval(mut self, interval: Duration) -> Self {
        self.config.drain_poll_interval = interval;
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.config.status_interval = interval;
        self
    }

    pub fn progress_log_interval(mut self, interval: Duration) -> Self {
        self.config.progress_log_interval = Some(interval);
        self
    }

    pub fn log_tasks(mut self, enabled: bool) -> Self {
        self.config.log_tasks = enabled;
        self
    }

    /// Sets the fetch collaborator. Defaults to [`ReqwestFetcher`].
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Sets the span every pool and unit of work runs in. Defaults to an
    /// `info` span named `crawler` carrying the crawler name.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Registers a plugin according to its kind.
    pub fn with(mut self, plugin: Plugin<I>) -> Self {
        match plugin {
            Plugin::Extension(extension) => extension.install(&mut self.hooks),
            Plugin::Middleware(middleware) => self.middlewares.push(middleware),
        }
        self
    }

    pub fn add_extension(self, extension: impl Extension<I> + 'static) -> Self {
        self.with(Plugin::extension(extension))
    }

    pub fn add_middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.with(Plugin::middleware(middleware))
    }

    pub fn on_task<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Context<I>, Task<I>) -> BoxFuture<'a, Result<Option<Task<I>>, SpiderError>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_task(f);
        self
    }

    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<I>) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync + 'static,
    {
        self.hooks.on_response(f);
        self
    }

    /// Registers an already-built post-fetch handler.
    pub fn add_response_handler(mut self, handler: impl Handler<I> + 'static) -> Self {
        self.hooks.register(crate::hooks::Hook::Response(Arc::new(handler)));
        self
    }

    /// Runs `f` for every element matching `selector` in HTML responses. An
    /// invalid selector makes `build` fail.
    pub fn on_html<F>(self, selector: &str, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<I>, Selection) -> BoxFuture<'a, Result<(), SpiderError>>
            + Send
            + Sync
            + 'static,
    {
        match HtmlHandler::new(selector, f) {
            Ok(handler) => self.add_response_handler(handler),
            Err(e) => {
                let mut builder = self;
                builder.deferred_errors.push(e);
                builder
            }
        }
    }

    /// Runs `f` with the value at `pointer` in JSON responses.
    pub fn on_json<F>(self, pointer: &str, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context<I>, Value) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync + 'static,
    {
        self.add_response_handler(JsonHandler::new(pointer, f))
    }

    pub fn on_item<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Context<I>, I) -> BoxFuture<'a, Result<Option<I>, SpiderError>> + Send + Sync + 'static,
    {
        self.hooks.on_item(f);
        self
    }

    pub fn on_error<F>(mut self, stage: ErrorStage, f: F) -> Self
    where
        F: for<'a> Fn(&'a Context<I>, &'a SpiderError) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.hooks.on_error(stage, f);
        self
    }

    pub fn on_recover<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Context<I>, &'a SpiderError) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.on_error(ErrorStage::Recover, f)
    }

    pub fn on_request_error<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Context<I>, &'a SpiderError) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.on_error(ErrorStage::Request, f)
    }

    pub fn on_response_error<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Context<I>, &'a SpiderError) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.on_error(ErrorStage::Response, f)
    }

    /// Validates the configuration, freezes the hook chains and starts the
    /// pools. Must be called inside a Tokio runtime.
    pub async fn build(mut self) -> Result<Crawler<I>, SpiderError> {
        self.config.validate()?;
        if let Some(e) = self.deferred_errors.drain(..).next() {
            return Err(e);
        }

        let fetcher = self
            .fetcher
            .take()
            .unwrap_or_else(|| Arc::new(ReqwestFetcher::default()));
        let transport = MiddlewareManager::new(fetcher, self.middlewares);
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("crawler", name = %self.config.name));

        let parts = Shared::new(
            self.config.name.clone(),
            self.hooks,
            transport,
            span,
            self.config.log_tasks,
        );
        Ok(Crawler::new(parts, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubFetcher;

    #[tokio::test]
    async fn zero_sized_pools_are_rejected() {
        let err = CrawlerBuilder::<String>::new("t")
            .fetcher(StubFetcher::new())
            .task_pool_size(0)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SpiderError::ConfigurationError(_)));

        let err = CrawlerBuilder::<String>::new("t")
            .fetcher(StubFetcher::new())
            .item_pool_size(0)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SpiderError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn bad_selector_fails_build() {
        let result = CrawlerBuilder::<String>::new("t")
            .fetcher(StubFetcher::new())
            .on_html("a[", |_ctx, _sel| Box::pin(async { Ok(()) }))
            .build()
            .await;
        assert!(matches!(result, Err(SpiderError::ConfigurationError(_))));
    }

    #[test]
    fn plugins_are_dispatched_by_kind() {
        let builder = CrawlerBuilder::<String>::new("t")
            .with(Plugin::middleware(crate::middleware::DefaultHeaders::new()))
            .with(Plugin::extension(|hooks: &mut Hooks<String>| {
                hooks.on_item(|_ctx, item| Box::pin(async move { Ok(Some(item)) }));
            }));
        assert_eq!(builder.middlewares.len(), 1);
        assert_eq!(builder.hooks.item_hook_count(), 1);
    }

    #[test]
    fn defaults_follow_cpu_count() {
        let config = CrawlerConfig::default();
        assert!(config.task_pool_size >= 10);
        assert!((4..=10).contains(&config.item_pool_size));
        assert!(config.validate().is_ok());
    }
}
