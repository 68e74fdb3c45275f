//! The task pool.
//!
//! `spawn_task_pool` starts a dispatcher that takes admitted tasks from the
//! pending task set and runs each one in its own job, at most `limiter.size()`
//! at a time. A job walks the task through its stages:
//!
//! 1. a request carrying a construction error goes to the request-error chain
//! 2. the request is fetched through the transport; failures go to the
//!    response-error chain
//! 3. post-fetch hooks and task-bound handlers run; an error or a panic goes to
//!    the recover chain
//!
//! Whatever the exit, the finished-task counter moves exactly once.

use super::response_parser::run_handlers;
use super::route_error;
use crate::concurrency::PoolLimiter;
use crate::context::{Context, Shared};
use crate::error::SpiderError;
use crate::hooks::{ErrorStage, Handler};
use crate::task::{ScrapedItem, Task};
use futures_util::FutureExt;
use kanal::AsyncReceiver;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, trace, warn};

pub(crate) fn spawn_task_pool<I: ScrapedItem>(
    shared: Arc<Shared<I>>,
    task_rx: AsyncReceiver<Task<I>>,
    limiter: Arc<PoolLimiter>,
) -> tokio::task::JoinHandle<()> {
    let span = shared.span.clone();
    tokio::spawn(
        async move {
            let mut jobs = JoinSet::new();
            trace!("Task pool started with size {}", limiter.size());
            loop {
                let task = tokio::select! {
                    received = task_rx.recv() => match received {
                        Ok(task) => task,
                        Err(_) => {
                            trace!("Pending task set closed, stopping task pool");
                            break;
                        }
                    },
                    Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                        if let Err(e) = joined {
                            error!("A task job failed: {:?}", e);
                        }
                        continue;
                    }
                };
                shared.state.queued_tasks.fetch_sub(1, Ordering::SeqCst);

                let Some(permit) = limiter.acquire().await else {
                    warn!("Task pool limiter closed, dropping {}", task.request);
                    shared.state.finish_work();
                    break;
                };
                shared.state.running_tasks.fetch_add(1, Ordering::SeqCst);

                let shared = Arc::clone(&shared);
                jobs.spawn(
                    async move {
                        run_task(&shared, task).await;
                        shared.state.running_tasks.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                        shared.state.finish_work();
                    }
                    .in_current_span(),
                );
            }

            trace!("Waiting for {} running task jobs", jobs.len());
            while let Some(joined) = jobs.join_next().await {
                if let Err(e) = joined {
                    error!("A task job failed: {:?}", e);
                }
            }
            trace!("Task pool finished");
        }
        .instrument(span),
    )
}

/// Runs one task to its terminal stage.
async fn run_task<I: ScrapedItem>(shared: &Arc<Shared<I>>, task: Task<I>) {
    let Task {
        request,
        handlers,
        meta,
    } = task;
    let mut ctx = Context::for_request(Arc::clone(shared), request, meta);

    let outcome = AssertUnwindSafe(execute(shared, &mut ctx, &handlers))
        .catch_unwind()
        .await;
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(failure)) => Some(failure),
        Err(payload) => Some((ErrorStage::Recover, SpiderError::from_panic("task handler", payload))),
    };

    if let Some((stage, err)) = failure {
        shared.status.increment_failed_tasks();
        route_error(shared, stage, &ctx, &err).await;
    }
    shared.status.increment_finished_tasks();
}

async fn execute<I: ScrapedItem>(
    shared: &Shared<I>,
    ctx: &mut Context<I>,
    handlers: &[Arc<dyn Handler<I>>],
) -> Result<(), (ErrorStage, SpiderError)> {
    let fetched = {
        let Some(request) = ctx.request() else {
            return Ok(());
        };
        if let Some(reason) = request.error() {
            return Err((
                ErrorStage::Request,
                SpiderError::InvalidRequest {
                    url: request.raw_url().to_string(),
                    reason: reason.to_string(),
                },
            ));
        }
        trace!("Fetching {}", request);
        shared.transport.fetch(request).await
    };

    let response = fetched.map_err(|e| (ErrorStage::Response, SpiderError::from(e)))?;
    shared
        .status
        .record_response(response.status, response.body.len());
    ctx.set_response(response);
    if shared.log_tasks {
        debug!("{}", ctx);
    }

    run_handlers(shared, ctx, handlers)
        .await
        .map_err(|e| (ErrorStage::Recover, e))
}
