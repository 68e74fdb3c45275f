//! # spider-engine
//!
//! An asynchronous crawler core built around hook chains.
//!
//! A [`Crawler`] owns two bounded worker pools. The task pool fetches
//! [`Task`]s and runs their handlers; the item pool runs every emitted item
//! through the on-result chain. Behavior is attached at build time through
//! [`Hooks`], either as closures or as [`extensions`] such as
//! [`Deduplicate`](extensions::Deduplicate) and
//! [`RobotsTxt`](extensions::RobotsTxt).
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::prelude::*;
//!
//! async fn run() -> Result<(), SpiderError> {
//!     let crawler = CrawlerBuilder::<String>::new("titles")
//!         .add_extension(Deduplicate::new())
//!         .add_extension(DepthLimit::new(2))
//!         .on_html("title", |ctx, title| Box::pin(async move {
//!             ctx.add_item(title.text)
//!         }))
//!         .on_item(|_ctx, title| Box::pin(async move {
//!             println!("{title}");
//!             Ok(Some(title))
//!         }))
//!         .build()
//!         .await?;
//!
//!     crawler.seed(Task::new(Request::get("https://example.com/"))).await?;
//!     crawler.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod concurrency;
pub mod context;
pub mod crawler;
pub mod error;
pub mod extensions;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod hooks;
pub mod meta;
pub mod middleware;
pub mod prelude;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod task;

#[cfg(test)]
mod testing;

pub use builder::{CrawlerBuilder, CrawlerConfig, Plugin};
pub use context::Context;
pub use crawler::Crawler;
pub use error::{FetchError, SpiderError};
pub use fetch::{Fetcher, ReqwestFetcher};
pub use hooks::{ErrorHook, ErrorStage, Handler, Hook, Hooks, ItemHook, TaskHook};
pub use meta::{Meta, MetaValue};
pub use request::Request;
pub use response::Response;
pub use scheduler::Scheduler;
pub use stats::{StatusSnapshot, StatusTracker};
pub use task::{Item, ScrapedItem, Task};

pub use async_trait::async_trait;
pub use futures_util::future::BoxFuture;
pub use reqwest::Method;
pub use tokio;
