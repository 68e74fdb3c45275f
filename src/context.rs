//! Execution context handed to hooks and task-bound handlers.
//!
//! One `Context` exists per task execution. It carries the originating
//! request, the response once fetched, a metadata map and the abort flag.
//! `add_task` and `add_item` are the only ways new work enters a crawler;
//! both take `&self`, so a handler may call them from futures it fans out.

use crate::crawler::MiddlewareManager;
use crate::error::{FetchError, SpiderError};
use crate::hooks::Hooks;
use crate::meta::Meta;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::state::CrawlerState;
use crate::stats::StatusTracker;
use crate::task::{Item, ScrapedItem, Task};
use kanal::AsyncReceiver;
use std::fmt;
use std::sync::Arc;
use tracing::{Span, trace};

/// State every context of one crawler points at.
pub(crate) struct Shared<I: ScrapedItem> {
    pub(crate) name: String,
    pub(crate) hooks: Hooks<I>,
    pub(crate) scheduler: Scheduler<I>,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) status: Arc<StatusTracker>,
    pub(crate) transport: MiddlewareManager,
    pub(crate) span: Span,
    pub(crate) log_tasks: bool,
}

pub(crate) struct SharedParts<I: ScrapedItem> {
    pub(crate) shared: Arc<Shared<I>>,
    pub(crate) task_rx: AsyncReceiver<Task<I>>,
    pub(crate) item_rx: AsyncReceiver<Item<I>>,
}

impl<I: ScrapedItem> Shared<I> {
    pub(crate) fn new(
        name: String,
        hooks: Hooks<I>,
        transport: MiddlewareManager,
        span: Span,
        log_tasks: bool,
    ) -> SharedParts<I> {
        let state = CrawlerState::new();
        let (scheduler, task_rx, item_rx) = Scheduler::new(Arc::clone(&state));
        let shared = Arc::new(Shared {
            name,
            hooks,
            scheduler,
            state,
            status: Arc::new(StatusTracker::new()),
            transport,
            span,
            log_tasks,
        });
        SharedParts {
            shared,
            task_rx,
            item_rx,
        }
    }
}

pub struct Context<I: ScrapedItem> {
    shared: Arc<Shared<I>>,
    request: Option<Arc<Request>>,
    response: Option<Arc<Response>>,
    /// Copied into every task spawned from this context.
    pub meta: Meta,
    aborted: bool,
}

impl<I: ScrapedItem> Clone for Context<I> {
    fn clone(&self) -> Self {
        Context {
            shared: Arc::clone(&self.shared),
            request: self.request.clone(),
            response: self.response.clone(),
            meta: self.meta.clone(),
            aborted: self.aborted,
        }
    }
}

impl<I: ScrapedItem> Context<I> {
    /// A context with no request or response. Seeds are admitted through one.
    pub(crate) fn root(shared: Arc<Shared<I>>) -> Self {
        Context {
            shared,
            request: None,
            response: None,
            meta: Meta::new(),
            aborted: false,
        }
    }

    pub(crate) fn for_request(shared: Arc<Shared<I>>, request: Request, meta: Meta) -> Self {
        Context {
            shared,
            request: Some(Arc::new(request)),
            response: None,
            meta,
            aborted: false,
        }
    }

    pub(crate) fn set_response(&mut self, response: Response) {
        self.response = Some(Arc::new(response));
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<I>> {
        &self.shared
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }

    pub fn is_downloaded(&self) -> bool {
        self.response.is_some()
    }

    /// Stops the remaining post-fetch hooks and handlers of this context.
    /// Work already submitted is unaffected.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn crawler_name(&self) -> &str {
        &self.shared.name
    }

    /// Submits a follow-up task.
    ///
    /// A relative URL is resolved against this context's request, and the
    /// task's metadata is laid over a snapshot of `self.meta`. The task then
    /// runs through the pre-dispatch chain on the caller's future. Returns
    /// `Ok(false)` if a hook vetoed it.
    pub async fn add_task(&self, mut task: Task<I>) -> Result<bool, SpiderError> {
        if let Some(base) = self.request.as_deref().and_then(Request::url) {
            task.request.resolve_against(base);
        }
        let mut meta = self.meta.clone();
        meta.merge(std::mem::take(&mut task.meta));
        task.meta = meta;

        match self.shared.hooks.run_pre_dispatch(self, task).await? {
            Some(task) => {
                self.shared.scheduler.enqueue_task(task)?;
                self.shared.status.increment_total_tasks();
                Ok(true)
            }
            None => {
                trace!("Task vetoed during pre-dispatch from {}", self);
                Ok(false)
            }
        }
    }

    /// Submits a payload to the item pool, tagged with a copy of this context.
    pub fn add_item(&self, payload: I) -> Result<(), SpiderError> {
        self.shared.scheduler.enqueue_item(Item {
            ctx: self.clone(),
            payload,
        })?;
        self.shared.status.increment_total_items();
        Ok(())
    }

    /// Fetches `request` through this crawler's transport, outside the task
    /// pool. Used by hooks that need a side request.
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.shared.transport.fetch(request).await
    }
}

impl<I: ScrapedItem> fmt::Display for Context<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.request, &self.response) {
            (None, _) => f.write_str("[empty context]"),
            (Some(req), None) => match req.url() {
                Some(url) => write!(f, "[not downloaded ctx] {}", url),
                None => write!(f, "[not downloaded ctx] {}", req.raw_url()),
            },
            (Some(_), Some(resp)) => write!(f, "[{}] {}", resp.status, resp.url),
        }
    }
}

impl<I: ScrapedItem> fmt::Debug for Context<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("crawler", &self.shared.name)
            .field("request", &self.request)
            .field("status", &self.response.as_ref().map(|r| r.status))
            .field("meta", &self.meta)
            .field("aborted", &self.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{detached_context, detached_shared};
    use url::Url;

    #[test]
    fn describes_itself() {
        let (shared, _parts) = detached_shared::<String>();
        let empty = Context::root(Arc::clone(&shared));
        assert_eq!(empty.to_string(), "[empty context]");

        let mut ctx = Context::for_request(shared, Request::get("https://example.com/a"), Meta::new());
        assert_eq!(ctx.to_string(), "[not downloaded ctx] https://example.com/a");
        assert!(!ctx.is_downloaded());

        ctx.set_response(Response::new(Url::parse("https://example.com/a").unwrap(), 404, ""));
        assert_eq!(ctx.to_string(), "[404] https://example.com/a");
        assert!(ctx.is_downloaded());
    }

    #[test]
    fn abort_is_sticky() {
        let mut ctx = detached_context::<String>();
        assert!(!ctx.is_aborted());
        ctx.abort();
        ctx.abort();
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn add_task_snapshots_meta_and_resolves_urls() {
        let (shared, parts) = detached_shared::<String>();
        let mut parent = Context::for_request(shared, Request::get("https://example.com/dir/page"), Meta::new());
        parent.meta.insert("source", "parent");
        parent.meta.insert("round", 1);

        let child = Task::new(Request::get("next")).with_meta("round", 2);
        assert!(parent.add_task(child).await.unwrap());

        parent.meta.insert("source", "changed");

        let queued = parts.task_rx.recv().await.unwrap();
        assert_eq!(queued.request.raw_url(), "https://example.com/dir/next");
        assert_eq!(queued.meta.get_str("source"), Some("parent"));
        assert_eq!(queued.meta.get_int("round"), Some(2));
        assert_eq!(parent.shared().status.total_tasks(), 1);
    }

    #[tokio::test]
    async fn add_item_carries_context() {
        let (shared, parts) = detached_shared::<String>();
        let ctx = Context::for_request(shared, Request::get("https://example.com/"), Meta::new());
        ctx.add_item("x".to_string()).unwrap();

        let item = parts.item_rx.recv().await.unwrap();
        assert_eq!(item.payload, "x");
        assert_eq!(
            item.ctx.request().map(|r| r.raw_url().to_string()),
            Some("https://example.com/".to_string())
        );
        assert_eq!(ctx.shared().status.total_items(), 1);
    }

    #[tokio::test]
    async fn rejected_submissions_are_not_counted() {
        let (shared, _parts) = detached_shared::<String>();
        let ctx = Context::for_request(shared, Request::get("https://example.com/"), Meta::new());
        ctx.shared().scheduler.shutdown();

        assert!(ctx.add_task(Task::new(Request::get("/late"))).await.is_err());
        assert!(ctx.add_item("late".to_string()).is_err());

        let status = &ctx.shared().status;
        assert_eq!(status.total_tasks(), 0);
        assert_eq!(status.total_items(), 0);
        assert!(ctx.shared().state.is_idle());
    }
}
