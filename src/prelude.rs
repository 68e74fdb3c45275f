//! A "prelude" for users of the `spider-engine` crate.
//!
//! ```
//! use spider_engine::prelude::*;
//! ```

pub use crate::{
    BoxFuture, Context, Crawler, CrawlerBuilder, CrawlerConfig, ErrorStage, FetchError, Fetcher, Handler, Hooks,
    ItemHook, Meta, Plugin, Request, Response, ScrapedItem, SpiderError, Task, TaskHook, async_trait,
};

pub use crate::extensions::{Deduplicate, DepthLimit, ErrorLog, Extension, MaxRequestLimit, RobotsTxt};
pub use crate::extract::Selection;
pub use crate::middleware::{DefaultHeaders, Middleware, MiddlewareAction};
