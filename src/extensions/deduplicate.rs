use super::Extension;
use crate::context::Context;
use crate::error::SpiderError;
use crate::fingerprint::Fingerprint;
use crate::hooks::{Hook, Hooks, TaskHook};
use crate::request::Request;
use crate::task::{ScrapedItem, Task};
use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Vetoes every task whose request fingerprint was already admitted.
#[derive(Debug, Default)]
pub struct Deduplicate {
    seen: Mutex<HashSet<Fingerprint>>,
}

impl Deduplicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `request` and reports whether it was new.
    pub fn insert(&self, request: &Request) -> bool {
        let fingerprint = request.fingerprint();
        self.seen.lock().insert(fingerprint)
    }

    /// Number of distinct requests seen so far.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<I: ScrapedItem> TaskHook<I> for Deduplicate {
    async fn on_task(&self, _ctx: &Context<I>, task: Task<I>) -> Result<Option<Task<I>>, SpiderError> {
        if self.insert(&task.request) {
            Ok(Some(task))
        } else {
            trace!("Duplicate request vetoed: {}", task.request);
            Ok(None)
        }
    }
}

impl<I: ScrapedItem> Extension<I> for Deduplicate {
    fn install(self: Box<Self>, hooks: &mut Hooks<I>) {
        let hook: Arc<Self> = Arc::from(self);
        hooks.register(Hook::Task(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::detached_context;

    #[tokio::test]
    async fn second_identical_request_is_vetoed() {
        let dedup = Deduplicate::new();
        let ctx = detached_context::<String>();
        let first = Task::new(Request::get("https://example.com/?b=2&a=1"));
        let same = Task::new(Request::get("https://EXAMPLE.com/?a=1&b=2"));
        let other = Task::new(Request::get("https://example.com/?a=1&b=3"));

        assert!(dedup.on_task(&ctx, first).await.unwrap().is_some());
        assert!(dedup.on_task(&ctx, same).await.unwrap().is_none());
        assert!(dedup.on_task(&ctx, other).await.unwrap().is_some());
        assert_eq!(dedup.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_submissions_admit_once() {
        let dedup = Arc::new(Deduplicate::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let dedup = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                let ctx = detached_context::<String>();
                let task = Task::new(Request::get("https://example.com/page"));
                dedup.on_task(&ctx, task).await.unwrap().is_some()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
