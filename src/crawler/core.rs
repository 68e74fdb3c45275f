//! The `Crawler`: the running engine built by `CrawlerBuilder`.
//!
//! A crawler starts its two pools when it is built and keeps them until it
//! is shut down or dropped. Work enters through [`Crawler::seed`] and through
//! the contexts handed to hooks and handlers. [`Crawler::wait`] returns once
//! everything submitted so far, and everything it spawned, has finished.

use super::{spawn_item_pool, spawn_task_pool};
use crate::builder::CrawlerConfig;
use crate::concurrency::PoolLimiter;
use crate::context::{Context, Shared, SharedParts};
use crate::error::SpiderError;
use crate::stats::StatusTracker;
use crate::task::{ScrapedItem, Task};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, trace, warn};

pub struct Crawler<I: ScrapedItem> {
    shared: Arc<Shared<I>>,
    config: CrawlerConfig,
    task_limiter: Arc<PoolLimiter>,
    item_limiter: Arc<PoolLimiter>,
    pools: Vec<JoinHandle<()>>,
    reporters: Vec<JoinHandle<()>>,
}

impl<I: ScrapedItem> Crawler<I> {
    pub(crate) fn new(parts: SharedParts<I>, config: CrawlerConfig) -> Self {
        let SharedParts {
            shared,
            task_rx,
            item_rx,
        } = parts;
        let span = shared.span.clone();
        span.in_scope(|| {
            info!(
                "Crawler starting with task_pool_size={}, item_pool_size={}, hooks: {} pre-dispatch, {} post-fetch, {} on-result",
                config.task_pool_size,
                config.item_pool_size,
                shared.hooks.task_hook_count(),
                shared.hooks.response_hook_count(),
                shared.hooks.item_hook_count(),
            )
        });

        let task_limiter = Arc::new(PoolLimiter::new(config.task_pool_size));
        let item_limiter = Arc::new(PoolLimiter::new(config.item_pool_size));
        let pools = vec![
            spawn_task_pool(Arc::clone(&shared), task_rx, Arc::clone(&task_limiter)),
            spawn_item_pool(Arc::clone(&shared), item_rx, Arc::clone(&item_limiter)),
        ];

        let mut reporters = vec![shared.status.spawn_sampler(config.status_interval, span.clone())];
        if let Some(every) = config.progress_log_interval {
            reporters.push(StatusTracker::spawn_progress_logger(
                Arc::downgrade(&shared.status),
                shared.name.clone(),
                every,
                span,
            ));
        }

        Crawler {
            shared,
            config,
            task_limiter,
            item_limiter,
            pools,
            reporters,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The live status counters of this crawler.
    pub fn status(&self) -> Arc<StatusTracker> {
        Arc::clone(&self.shared.status)
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Submits a seed task through a context with no request or response.
    /// Seeds pass the same pre-dispatch chain as derived tasks; returns
    /// `Ok(false)` if it vetoed this one.
    pub async fn seed(&self, task: Task<I>) -> Result<bool, SpiderError> {
        Context::root(Arc::clone(&self.shared)).add_task(task).await
    }

    /// Seeds each task in order. Returns how many were admitted.
    pub async fn seed_all(&self, tasks: impl IntoIterator<Item = Task<I>>) -> Result<usize, SpiderError> {
        let mut admitted = 0;
        for task in tasks {
            if self.seed(task).await? {
                admitted += 1;
            }
        }
        Ok(admitted)
    }

    /// Blocks until both pools have been idle for the quiescence window.
    pub async fn wait(&self) {
        self.shared
            .state
            .wait_idle(self.config.quiescence_window, self.config.drain_poll_interval)
            .await;
        self.shared.status.sample();
        self.shared.span.in_scope(|| debug!("Crawl has become idle"));
    }

    /// Changes the task pool's concurrency while it runs.
    pub fn set_task_pool_size(&self, size: usize) -> Result<(), SpiderError> {
        if size == 0 {
            return Err(SpiderError::ConfigurationError(
                "task_pool_size must be greater than 0.".to_string(),
            ));
        }
        self.task_limiter.resize(size);
        Ok(())
    }

    /// Changes the item pool's concurrency while it runs.
    pub fn set_item_pool_size(&self, size: usize) -> Result<(), SpiderError> {
        if size == 0 {
            return Err(SpiderError::ConfigurationError(
                "item_pool_size must be greater than 0.".to_string(),
            ));
        }
        self.item_limiter.resize(size);
        Ok(())
    }

    pub fn task_pool_size(&self) -> usize {
        self.task_limiter.size()
    }

    pub fn item_pool_size(&self) -> usize {
        self.item_limiter.size()
    }

    /// Waits for the crawl to drain, closes the pending sets and the pool
    /// limiters, then joins the pools. Pools still running after 30 seconds are aborted.
    pub async fn shutdown(mut self) {
        self.wait().await;
        let span = self.shared.span.clone();
        self.close_and_join().instrument(span).await;
    }

    async fn close_and_join(&mut self) {
        trace!("Closing pending sets and pool limiters");
        self.shared.scheduler.shutdown();
        self.task_limiter.close();
        self.item_limiter.close();
        for reporter in self.reporters.drain(..) {
            reporter.abort();
        }

        let timeout_duration = Duration::from_secs(30);
        let mut pools = JoinSet::new();
        for pool in self.pools.drain(..) {
            pools.spawn(pool);
        }
        let joined = tokio::time::timeout(timeout_duration, async {
            let mut results = Vec::new();
            while let Some(result) = pools.join_next().await {
                results.push(result);
            }
            results
        })
        .await;

        match joined {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Err(e)) | Err(e) => error!("Pool failed during shutdown: {}", e),
                        Ok(Ok(())) => {}
                    }
                }
            }
            Err(_) => {
                warn!(
                    "Pools did not finish within {}s, aborting them",
                    timeout_duration.as_secs()
                );
                pools.abort_all();
            }
        }

        let status = &self.shared.status;
        info!(
            "Crawl finished. tasks: {}/{} ({} failed), items: {} ({} dropped)",
            status.finished_tasks(),
            status.total_tasks(),
            status.failed_tasks(),
            status.total_items(),
            status.dropped_items()
        );
    }
}

impl<I: ScrapedItem> Drop for Crawler<I> {
    fn drop(&mut self) {
        self.shared.scheduler.shutdown();
        for reporter in &self.reporters {
            reporter.abort();
        }
    }
}
