//! Module for tracking the operational state of the crawler.
//!
//! `CrawlerState` counts units of work on their way through the two pools.
//! The per-stage counters are informational. `outstanding` is the drain
//! condition: it is raised when a task or item is submitted and lowered when
//! its terminal stage returns. Handlers submit children before their own unit
//! is released, so `outstanding == 0` only holds once nothing can produce
//! more work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct CrawlerState {
    /// Tasks waiting in the pending set.
    pub queued_tasks: AtomicUsize,
    /// Tasks currently held by a task worker.
    pub running_tasks: AtomicUsize,
    /// Items waiting in the pending set.
    pub queued_items: AtomicUsize,
    /// Items currently held by an item worker.
    pub running_items: AtomicUsize,
    outstanding: AtomicUsize,
    submissions: AtomicU64,
    idle: Notify,
}

impl CrawlerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn begin_work(&self) {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish_work(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Units of work submitted but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    /// Returns once the state has been idle at both ends of `window` with no
    /// submission in between. `poll` bounds how long a missed wake-up can
    /// delay the check.
    pub async fn wait_idle(&self, window: Duration, poll: Duration) {
        loop {
            if self.is_idle() {
                let mark = self.submissions.load(Ordering::SeqCst);
                tokio::time::sleep(window).await;
                if self.is_idle() && self.submissions.load(Ordering::SeqCst) == mark {
                    return;
                }
                continue;
            }
            let notified = self.idle.notified();
            if self.is_idle() {
                continue;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
