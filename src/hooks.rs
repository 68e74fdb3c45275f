//! Hook registry and dispatcher.
//!
//! Every lifecycle stage owns one ordered chain of trait objects:
//!
//! - pre-dispatch (`TaskHook`): may rewrite or veto a task before admission
//! - post-fetch (`Handler`): sees the fetched context, may abort it
//! - on-result (`ItemHook`): may rewrite or veto an item payload
//! - on-error (`ErrorHook`), one chain per `ErrorStage`
//!
//! Chains run in registration order and there is no removal API. The
//! dispatcher holds no state besides the chains, so a frozen `Hooks` is shared
//! by every worker.
//!
//! Closures with the matching higher-ranked signature implement the traits
//! directly, and the `on_*` registration methods accept them as such:
//!
//! ```rust,ignore
//! hooks.on_task(|_ctx, task| Box::pin(async move { Ok(Some(task)) }));
//! ```

use crate::context::Context;
use crate::error::SpiderError;
use crate::task::{ScrapedItem, Task};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Pre-dispatch hook. Returning `Ok(None)` vetoes the task.
#[async_trait]
pub trait TaskHook<I: ScrapedItem>: Send + Sync {
    async fn on_task(&self, ctx: &Context<I>, task: Task<I>) -> Result<Option<Task<I>>, SpiderError>;
}

/// Post-fetch hook and task-bound handler.
#[async_trait]
pub trait Handler<I: ScrapedItem>: Send + Sync {
    async fn handle(&self, ctx: &mut Context<I>) -> Result<(), SpiderError>;
}

/// On-result hook. Returning `Ok(None)` vetoes the item.
#[async_trait]
pub trait ItemHook<I: ScrapedItem>: Send + Sync {
    async fn on_item(&self, ctx: &Context<I>, item: I) -> Result<Option<I>, SpiderError>;
}

/// Error sink. Error hooks cannot resurrect the failed unit of work.
#[async_trait]
pub trait ErrorHook<I: ScrapedItem>: Send + Sync {
    async fn on_error(&self, ctx: &Context<I>, error: &SpiderError);
}

#[async_trait]
impl<I, F> TaskHook<I> for F
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a Context<I>, Task<I>) -> BoxFuture<'a, Result<Option<Task<I>>, SpiderError>> + Send + Sync,
{
    async fn on_task(&self, ctx: &Context<I>, task: Task<I>) -> Result<Option<Task<I>>, SpiderError> {
        (self)(ctx, task).await
    }
}

#[async_trait]
impl<I, F> Handler<I> for F
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a mut Context<I>) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context<I>) -> Result<(), SpiderError> {
        (self)(ctx).await
    }
}

#[async_trait]
impl<I, F> ItemHook<I> for F
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a Context<I>, I) -> BoxFuture<'a, Result<Option<I>, SpiderError>> + Send + Sync,
{
    async fn on_item(&self, ctx: &Context<I>, item: I) -> Result<Option<I>, SpiderError> {
        (self)(ctx, item).await
    }
}

#[async_trait]
impl<I, F> ErrorHook<I> for F
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a Context<I>, &'a SpiderError) -> BoxFuture<'a, ()> + Send + Sync,
{
    async fn on_error(&self, ctx: &Context<I>, error: &SpiderError) {
        (self)(ctx, error).await
    }
}

/// Which error chain a failure is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    /// A handler or hook failed or panicked.
    Recover,
    /// The request carried a construction error; nothing was fetched.
    Request,
    /// The fetch collaborator failed.
    Response,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStage::Recover => f.write_str("OnRecover"),
            ErrorStage::Request => f.write_str("OnReqError"),
            ErrorStage::Response => f.write_str("OnRespError"),
        }
    }
}

/// A hook tagged with the chain it belongs to.
pub enum Hook<I: ScrapedItem> {
    Task(Arc<dyn TaskHook<I>>),
    Response(Arc<dyn Handler<I>>),
    Item(Arc<dyn ItemHook<I>>),
    Error(ErrorStage, Arc<dyn ErrorHook<I>>),
}

/// The ordered hook chains of one crawler.
pub struct Hooks<I: ScrapedItem> {
    task_hooks: Vec<Arc<dyn TaskHook<I>>>,
    response_hooks: Vec<Arc<dyn Handler<I>>>,
    item_hooks: Vec<Arc<dyn ItemHook<I>>>,
    recover_hooks: Vec<Arc<dyn ErrorHook<I>>>,
    request_error_hooks: Vec<Arc<dyn ErrorHook<I>>>,
    response_error_hooks: Vec<Arc<dyn ErrorHook<I>>>,
}

impl<I: ScrapedItem> Default for Hooks<I> {
    fn default() -> Self {
        Hooks {
            task_hooks: Vec::new(),
            response_hooks: Vec::new(),
            item_hooks: Vec::new(),
            recover_hooks: Vec::new(),
            request_error_hooks: Vec::new(),
            response_error_hooks: Vec::new(),
        }
    }
}

impl<I: ScrapedItem> Hooks<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` to the chain named by its variant.
    pub fn register(&mut self, hook: Hook<I>) {
        match hook {
            Hook::Task(h) => self.task_hooks.push(h),
            Hook::Response(h) => self.response_hooks.push(h),
            Hook::Item(h) => self.item_hooks.push(h),
            Hook::Error(stage, h) => self.error_chain_mut(stage).push(h),
        }
    }

    pub fn on_task<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Context<I>, Task<I>) -> BoxFuture<'a, Result<Option<Task<I>>, SpiderError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(Hook::Task(Arc::new(f)));
        self
    }

    pub fn on_response<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<I>) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync + 'static,
    {
        self.register(Hook::Response(Arc::new(f)));
        self
    }

    pub fn on_item<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Context<I>, I) -> BoxFuture<'a, Result<Option<I>, SpiderError>> + Send + Sync + 'static,
    {
        self.register(Hook::Item(Arc::new(f)));
        self
    }

    pub fn on_error<F>(&mut self, stage: ErrorStage, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Context<I>, &'a SpiderError) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.register(Hook::Error(stage, Arc::new(f)));
        self
    }

    fn error_chain(&self, stage: ErrorStage) -> &[Arc<dyn ErrorHook<I>>] {
        match stage {
            ErrorStage::Recover => &self.recover_hooks,
            ErrorStage::Request => &self.request_error_hooks,
            ErrorStage::Response => &self.response_error_hooks,
        }
    }

    fn error_chain_mut(&mut self, stage: ErrorStage) -> &mut Vec<Arc<dyn ErrorHook<I>>> {
        match stage {
            ErrorStage::Recover => &mut self.recover_hooks,
            ErrorStage::Request => &mut self.request_error_hooks,
            ErrorStage::Response => &mut self.response_error_hooks,
        }
    }

    /// Folds `task` through the pre-dispatch chain. Stops at the first veto.
    pub async fn run_pre_dispatch(&self, ctx: &Context<I>, task: Task<I>) -> Result<Option<Task<I>>, SpiderError> {
        let mut current = task;
        for hook in &self.task_hooks {
            match hook.on_task(ctx, current).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Runs every post-fetch hook in order until the context is aborted.
    pub async fn run_post_fetch(&self, ctx: &mut Context<I>) -> Result<(), SpiderError> {
        for hook in &self.response_hooks {
            if ctx.is_aborted() {
                break;
            }
            hook.handle(ctx).await?;
        }
        Ok(())
    }

    /// Folds `item` through the on-result chain. Stops at the first veto.
    pub async fn run_on_result(&self, ctx: &Context<I>, item: I) -> Result<Option<I>, SpiderError> {
        let mut current = item;
        for hook in &self.item_hooks {
            match hook.on_item(ctx, current).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Invokes every hook of the chain for `stage`.
    pub async fn run_on_error(&self, stage: ErrorStage, ctx: &Context<I>, error: &SpiderError) {
        for hook in self.error_chain(stage) {
            hook.on_error(ctx, error).await;
        }
    }

    pub fn task_hook_count(&self) -> usize {
        self.task_hooks.len()
    }

    pub fn response_hook_count(&self) -> usize {
        self.response_hooks.len()
    }

    pub fn item_hook_count(&self) -> usize {
        self.item_hooks.len()
    }

    pub fn error_hook_count(&self, stage: ErrorStage) -> usize {
        self.error_chain(stage).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::testing::detached_context;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn pre_dispatch_folds_and_stops_on_veto() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks: Hooks<String> = Hooks::new();

        let c = calls.clone();
        hooks.on_task(move |_ctx: &Context<String>, mut task: Task<String>| {
            c.lock().push("first");
            task.request.meta.insert("tag", "a");
            Box::pin(async move { Ok(Some(task)) })
        });
        let c = calls.clone();
        hooks.on_task(move |_ctx: &Context<String>, task: Task<String>| {
            c.lock().push("second");
            let veto = task.request.raw_url().contains("blocked");
            Box::pin(async move { Ok(if veto { None } else { Some(task) }) })
        });
        let c = calls.clone();
        hooks.on_task(move |_ctx: &Context<String>, task: Task<String>| {
            c.lock().push("third");
            Box::pin(async move { Ok(Some(task)) })
        });

        let ctx = detached_context::<String>();
        let admitted = hooks
            .run_pre_dispatch(&ctx, Task::new(Request::get("https://example.com/ok")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admitted.request.meta.get_str("tag"), Some("a"));
        assert_eq!(*calls.lock(), vec!["first", "second", "third"]);

        calls.lock().clear();
        let vetoed = hooks
            .run_pre_dispatch(&ctx, Task::new(Request::get("https://example.com/blocked")))
            .await
            .unwrap();
        assert!(vetoed.is_none());
        assert_eq!(*calls.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn post_fetch_stops_after_abort() {
        let calls = Arc::new(Mutex::new(0));
        let mut hooks: Hooks<String> = Hooks::new();
        hooks.on_response(|ctx: &mut Context<String>| {
            ctx.abort();
            Box::pin(async { Ok(()) })
        });
        let c = calls.clone();
        hooks.on_response(move |_ctx: &mut Context<String>| {
            *c.lock() += 1;
            Box::pin(async { Ok(()) })
        });

        let mut ctx = detached_context::<String>();
        hooks.run_post_fetch(&mut ctx).await.unwrap();
        assert!(ctx.is_aborted());
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn on_result_transforms_and_vetoes() {
        let mut hooks: Hooks<String> = Hooks::new();
        hooks.on_item(|_ctx: &Context<String>, item: String| {
            Box::pin(async move { Ok(Some(item.to_uppercase())) })
        });
        hooks.on_item(|_ctx: &Context<String>, item: String| {
            Box::pin(async move { Ok((item != "DROP").then_some(item)) })
        });

        let ctx = detached_context::<String>();
        assert_eq!(
            hooks.run_on_result(&ctx, "x".into()).await.unwrap(),
            Some("X".to_string())
        );
        assert_eq!(hooks.run_on_result(&ctx, "drop".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn error_chains_are_separate() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks: Hooks<String> = Hooks::new();
        for stage in [ErrorStage::Recover, ErrorStage::Request, ErrorStage::Response] {
            let s = seen.clone();
            hooks.on_error(stage, move |_ctx: &Context<String>, err: &SpiderError| {
                s.lock().push(format!("{stage}: {err}"));
                Box::pin(async {})
            });
        }
        assert_eq!(hooks.error_hook_count(ErrorStage::Request), 1);

        let ctx = detached_context::<String>();
        hooks
            .run_on_error(ErrorStage::Request, &ctx, &SpiderError::GeneralError("bad".into()))
            .await;
        assert_eq!(*seen.lock(), vec!["OnReqError: bad".to_string()]);
    }
}
