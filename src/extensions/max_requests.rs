use super::Extension;
use crate::context::Context;
use crate::error::SpiderError;
use crate::hooks::{Hook, Hooks, TaskHook};
use crate::task::{ScrapedItem, Task};
use async_trait::async_trait;
use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Admits at most `max` tasks over the crawler's lifetime.
#[derive(Debug)]
pub struct MaxRequestLimit {
    max: usize,
    admitted: AtomicUsize,
}

impl MaxRequestLimit {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            admitted: AtomicUsize::new(0),
        }
    }

    /// Takes one admission slot if any is left.
    pub fn try_admit(&self) -> bool {
        self.admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.max).then_some(n + 1))
            .is_ok()
    }

    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<I: ScrapedItem> TaskHook<I> for MaxRequestLimit {
    async fn on_task(&self, _ctx: &Context<I>, task: Task<I>) -> Result<Option<Task<I>>, SpiderError> {
        if self.try_admit() {
            if self.admitted() == self.max {
                debug!("Request limit of {} reached", self.max);
            }
            Ok(Some(task))
        } else {
            trace!("Request limit reached, vetoing {}", task.request);
            Ok(None)
        }
    }
}

impl<I: ScrapedItem> Extension<I> for MaxRequestLimit {
    fn install(self: Box<Self>, hooks: &mut Hooks<I>) {
        let hook: Arc<Self> = Arc::from(self);
        hooks.register(Hook::Task(hook));
    }
}
