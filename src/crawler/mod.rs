//! # Crawler Module
//!
//! The orchestration core. A `Crawler` owns two pools:
//!
//! - the task pool (`request_handler`) pulls admitted tasks, fetches them
//!   through the transport (`middleware_manager`) and runs the post-fetch
//!   chain and task-bound handlers (`response_parser`);
//! - the item pool (`item_processor`) pulls items and runs the on-result chain.
//!
//! Each pool is a dispatcher loop that receives from its pending set, waits
//! for a slot in its `PoolLimiter` and spawns the unit of work into a
//! `JoinSet`. Failures are routed to the error chains from inside the unit of
//! work; a panic never leaves it.

mod core;
mod item_processor;
mod middleware_manager;
mod request_handler;
mod response_parser;

pub use core::Crawler;
pub(crate) use item_processor::spawn_item_pool;
pub use middleware_manager::MiddlewareManager;
pub(crate) use request_handler::spawn_task_pool;

use crate::context::{Context, Shared};
use crate::error::SpiderError;
use crate::hooks::ErrorStage;
use crate::task::ScrapedItem;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Hands `err` to the error chain for `stage`. A panicking error hook is
/// logged and swallowed.
pub(crate) async fn route_error<I: ScrapedItem>(shared: &Shared<I>, stage: ErrorStage, ctx: &Context<I>, err: &SpiderError) {
    debug!("{} for {}: {}", stage, ctx, err);
    let dispatch = shared.hooks.run_on_error(stage, ctx, err);
    if let Err(payload) = AssertUnwindSafe(dispatch).catch_unwind().await {
        let panic = SpiderError::from_panic("error hook", payload);
        error!("Error hook panicked while handling {} for {}: {}", stage, ctx, panic);
    }
}
