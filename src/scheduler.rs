//! # Scheduler Module
//!
//! Owns the two pending sets: one for admitted tasks and one for submitted
//! items. Both are unbounded `kanal` channels, so submitting from inside a
//! worker never waits on the pool that worker belongs to.
//!
//! Every successful submission raises the outstanding counter in
//! [`CrawlerState`]; the pools lower it when the unit of work reaches its
//! terminal stage.

use crate::error::SpiderError;
use crate::state::CrawlerState;
use crate::task::{Item, ScrapedItem, Task};
use kanal::{AsyncReceiver, AsyncSender, unbounded_async};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

pub struct Scheduler<I: ScrapedItem> {
    task_tx: AsyncSender<Task<I>>,
    item_tx: AsyncSender<Item<I>>,
    state: Arc<CrawlerState>,
    pub(crate) is_shutting_down: AtomicBool,
}

impl<I: ScrapedItem> Scheduler<I> {
    /// Creates a scheduler and the receiving ends of its two pending sets.
    pub fn new(state: Arc<CrawlerState>) -> (Self, AsyncReceiver<Task<I>>, AsyncReceiver<Item<I>>) {
        let (task_tx, task_rx) = unbounded_async();
        let (item_tx, item_rx) = unbounded_async();
        let scheduler = Scheduler {
            task_tx,
            item_tx,
            state,
            is_shutting_down: AtomicBool::new(false),
        };
        (scheduler, task_rx, item_rx)
    }

    /// Places an admitted task on the pending task set.
    pub fn enqueue_task(&self, task: Task<I>) -> Result<(), SpiderError> {
        if self.is_shutting_down() {
            warn!("Scheduler is shut down, rejecting task for {}", task.request);
            return Err(SpiderError::GeneralError("scheduler is shut down".into()));
        }
        trace!("Enqueuing task: {}", task.request);
        self.state.begin_work();
        self.state.queued_tasks.fetch_add(1, Ordering::SeqCst);
        match self.task_tx.try_send(task) {
            Ok(true) => Ok(()),
            _ => {
                self.state.queued_tasks.fetch_sub(1, Ordering::SeqCst);
                self.state.finish_work();
                Err(SpiderError::GeneralError("task channel closed".into()))
            }
        }
    }

    /// Places an item on the pending item set.
    pub fn enqueue_item(&self, item: Item<I>) -> Result<(), SpiderError> {
        if self.is_shutting_down() {
            warn!("Scheduler is shut down, rejecting item from {}", item.ctx);
            return Err(SpiderError::GeneralError("scheduler is shut down".into()));
        }
        self.state.begin_work();
        self.state.queued_items.fetch_add(1, Ordering::SeqCst);
        match self.item_tx.try_send(item) {
            Ok(true) => Ok(()),
            _ => {
                self.state.queued_items.fetch_sub(1, Ordering::SeqCst);
                self.state.finish_work();
                Err(SpiderError::GeneralError("item channel closed".into()))
            }
        }
    }

    /// Closes both pending sets. Pools finish what they hold and exit.
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing pending task and item sets");
        let _ = self.task_tx.close();
        let _ = self.item_tx.close();
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting for a worker.
    #[inline]
    pub fn pending_tasks(&self) -> usize {
        self.state.queued_tasks.load(Ordering::SeqCst)
    }

    /// Number of items waiting for a worker.
    #[inline]
    pub fn pending_items(&self) -> usize {
        self.state.queued_items.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0 && self.pending_items() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    #[tokio::test]
    async fn submissions_are_counted_until_shutdown() {
        let state = CrawlerState::new();
        let (scheduler, task_rx, _item_rx) = Scheduler::<String>::new(Arc::clone(&state));

        scheduler
            .enqueue_task(Task::new(Request::get("https://example.com/a")))
            .unwrap();
        scheduler
            .enqueue_task(Task::new(Request::get("https://example.com/b")))
            .unwrap();
        assert_eq!(scheduler.pending_tasks(), 2);
        assert_eq!(state.outstanding(), 2);

        let first = task_rx.recv().await.unwrap();
        assert_eq!(first.request.raw_url(), "https://example.com/a");

        scheduler.shutdown();
        assert!(scheduler.is_shutting_down());
        assert!(
            scheduler
                .enqueue_task(Task::new(Request::get("https://example.com/c")))
                .is_err()
        );
        assert_eq!(state.outstanding(), 2);
    }
}
