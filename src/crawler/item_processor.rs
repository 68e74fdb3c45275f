//! The item pool: runs every submitted item through the on-result chain,
//! at most `limiter.size()` items at a time.

use super::route_error;
use crate::concurrency::PoolLimiter;
use crate::context::Shared;
use crate::error::SpiderError;
use crate::hooks::ErrorStage;
use crate::task::{Item, ScrapedItem};
use futures_util::FutureExt;
use kanal::AsyncReceiver;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinSet;
use tracing::{Instrument, error, trace, warn};

pub(crate) fn spawn_item_pool<I: ScrapedItem>(
    shared: Arc<Shared<I>>,
    item_rx: AsyncReceiver<Item<I>>,
    limiter: Arc<PoolLimiter>,
) -> tokio::task::JoinHandle<()> {
    let span = shared.span.clone();
    tokio::spawn(
        async move {
            let mut jobs = JoinSet::new();
            trace!("Item pool started with size {}", limiter.size());
            loop {
                let item = tokio::select! {
                    received = item_rx.recv() => match received {
                        Ok(item) => item,
                        Err(_) => {
                            trace!("Pending item set closed, stopping item pool");
                            break;
                        }
                    },
                    Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                        if let Err(e) = joined {
                            error!("An item job failed: {:?}", e);
                        }
                        continue;
                    }
                };
                shared.state.queued_items.fetch_sub(1, Ordering::SeqCst);

                let Some(permit) = limiter.acquire().await else {
                    warn!("Item pool limiter closed, dropping item from {}", item.ctx);
                    shared.state.finish_work();
                    break;
                };
                shared.state.running_items.fetch_add(1, Ordering::SeqCst);

                let shared = Arc::clone(&shared);
                jobs.spawn(
                    async move {
                        run_item(&shared, item).await;
                        shared.state.running_items.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                        shared.state.finish_work();
                    }
                    .in_current_span(),
                );
            }

            trace!("Waiting for {} running item jobs", jobs.len());
            while let Some(joined) = jobs.join_next().await {
                if let Err(e) = joined {
                    error!("An item job failed: {:?}", e);
                }
            }
            trace!("Item pool finished");
        }
        .instrument(span),
    )
}

async fn run_item<I: ScrapedItem>(shared: &Shared<I>, item: Item<I>) {
    let Item { ctx, payload } = item;
    let outcome = AssertUnwindSafe(shared.hooks.run_on_result(&ctx, payload))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(Some(_))) => {
            trace!("Item from {} passed every on-result hook", ctx);
            shared.status.increment_finished_items();
            return;
        }
        Ok(Ok(None)) => {
            trace!("Item from {} vetoed", ctx);
            shared.status.increment_dropped_items();
            return;
        }
        Ok(Err(e)) => e,
        Err(payload) => SpiderError::from_panic("item hook", payload),
    };
    shared.status.increment_dropped_items();
    route_error(shared, ErrorStage::Recover, &ctx, &failure).await;
}
