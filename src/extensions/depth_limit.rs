use super::Extension;
use crate::context::Context;
use crate::error::SpiderError;
use crate::hooks::{Hook, Hooks, TaskHook};
use crate::task::{ScrapedItem, Task};
use async_trait::async_trait;
use log::trace;
use std::sync::Arc;

/// Request metadata key holding a task's crawl depth.
pub const DEPTH_KEY: &str = "depth";

/// Limits how far tasks may be derived from a seed.
///
/// A task spawned from a context without a recorded depth (seeds included)
/// is tagged with depth 1. A task spawned from a context at depth `d` is
/// tagged `d + 1` if `d < max`, and vetoed otherwise.
#[derive(Debug, Clone, Copy)]
pub struct DepthLimit {
    max: i64,
}

impl DepthLimit {
    pub fn new(max: u32) -> Self {
        Self { max: i64::from(max) }
    }
}

#[async_trait]
impl<I: ScrapedItem> TaskHook<I> for DepthLimit {
    async fn on_task(&self, ctx: &Context<I>, mut task: Task<I>) -> Result<Option<Task<I>>, SpiderError> {
        let parent_depth = ctx.request().and_then(|r| r.meta.get_int(DEPTH_KEY));
        let depth = match parent_depth {
            None => 1,
            Some(d) if d < self.max => d + 1,
            Some(d) => {
                trace!("Depth {} reached, vetoing {}", d, task.request);
                return Ok(None);
            }
        };
        task.request.meta.insert(DEPTH_KEY, depth);
        Ok(Some(task))
    }
}

impl<I: ScrapedItem> Extension<I> for DepthLimit {
    fn install(self: Box<Self>, hooks: &mut Hooks<I>) {
        let hook: Arc<Self> = Arc::from(self);
        hooks.register(Hook::Task(hook));
    }
}
