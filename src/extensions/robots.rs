use super::Extension;
use crate::context::Context;
use crate::error::SpiderError;
use crate::hooks::{Hook, Hooks, TaskHook};
use crate::request::Request;
use crate::task::{ScrapedItem, Task};
use async_trait::async_trait;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use texting_robots::Robot;
use url::Url;

/// Vetoes tasks whose URL the target site's `robots.txt` disallows for the
/// configured user agent.
///
/// Policies are fetched lazily through the crawler's transport the first
/// time an origin is seen and cached per origin. A non-200 answer or an
/// unparseable file is cached as "no restrictions". A failed fetch lets the
/// task through and is retried on the next task for that origin.
pub struct RobotsTxt {
    user_agent: String,
    policies: Mutex<HashMap<String, Option<Arc<Robot>>>>,
}

impl RobotsTxt {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            policies: Mutex::new(HashMap::new()),
        }
    }

    /// Number of origins with a cached policy.
    pub fn cached_origins(&self) -> usize {
        self.policies.lock().len()
    }

    /// Fetches and parses the policy for `url`'s origin. `None` means the
    /// fetch itself failed.
    async fn load<I: ScrapedItem>(&self, ctx: &Context<I>, url: &Url) -> Option<Option<Arc<Robot>>> {
        let robots_url = url.join("/robots.txt").ok()?;
        let request = Request::from_url(robots_url).with_header("User-Agent", self.user_agent.clone());
        let response = match ctx.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Fetching {} failed, allowing requests: {}", request, e);
                return None;
            }
        };
        if response.status != 200 {
            trace!("{} answered {}, treating as unrestricted", request, response.status);
            return Some(None);
        }
        match Robot::new(&self.user_agent, &response.body) {
            Ok(robot) => Some(Some(Arc::new(robot))),
            Err(e) => {
                warn!("Could not parse {}: {}", request, e);
                Some(None)
            }
        }
    }
}

#[async_trait]
impl<I: ScrapedItem> TaskHook<I> for RobotsTxt {
    async fn on_task(&self, ctx: &Context<I>, task: Task<I>) -> Result<Option<Task<I>>, SpiderError> {
        // Broken requests are left for the request-error chain.
        let Some(url) = task.request.url().cloned() else {
            return Ok(Some(task));
        };
        let origin = url.origin().ascii_serialization();

        let cached = self.policies.lock().get(&origin).cloned();
        let policy = match cached {
            Some(policy) => policy,
            None => match self.load(ctx, &url).await {
                Some(policy) => {
                    self.policies.lock().insert(origin, policy.clone());
                    policy
                }
                None => None,
            },
        };

        match policy {
            Some(robot) if !robot.allowed(url.as_str()) => {
                debug!("Disallowed by robots.txt: {}", url);
                Ok(None)
            }
            _ => Ok(Some(task)),
        }
    }
}

impl<I: ScrapedItem> Extension<I> for RobotsTxt {
    fn install(self: Box<Self>, hooks: &mut Hooks<I>) {
        let hook: Arc<Self> = Arc::from(self);
        hooks.register(Hook::Task(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Shared;
    use crate::crawler::MiddlewareManager;
    use crate::testing::StubFetcher;
    use tracing::Span;

    fn context_with(fetcher: Arc<StubFetcher>) -> Context<String> {
        let transport = MiddlewareManager::new(fetcher, Vec::new());
        let parts = Shared::new("robots".to_string(), Hooks::new(), transport, Span::none(), false);
        Context::root(parts.shared)
    }

    fn task(url: &str) -> Task<String> {
        Task::new(Request::get(url))
    }

    #[tokio::test]
    async fn disallowed_paths_are_vetoed_and_policy_cached() {
        let fetcher = Arc::new(StubFetcher::new().route(
            "https://example.com/robots.txt",
            200,
            "text/plain",
            "User-agent: *\nDisallow: /private\n",
        ));
        let ctx = context_with(Arc::clone(&fetcher));
        let robots = RobotsTxt::new("test-bot");

        assert!(robots.on_task(&ctx, task("https://example.com/private/a")).await.unwrap().is_none());
        assert!(robots.on_task(&ctx, task("https://example.com/public")).await.unwrap().is_some());
        assert_eq!(fetcher.count_path("/robots.txt"), 1);
        assert_eq!(robots.cached_origins(), 1);
    }

    #[tokio::test]
    async fn missing_policy_is_unrestricted() {
        let fetcher = Arc::new(StubFetcher::new().route("https://example.com/robots.txt", 404, "text/plain", ""));
        let ctx = context_with(fetcher);
        let robots = RobotsTxt::new("test-bot");
        assert!(robots.on_task(&ctx, task("https://example.com/private")).await.unwrap().is_some());
        assert_eq!(robots.cached_origins(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_fails_open_without_caching() {
        let fetcher = Arc::new(StubFetcher::new().fail_host("down.example"));
        let ctx = context_with(Arc::clone(&fetcher));
        let robots = RobotsTxt::new("test-bot");

        assert!(robots.on_task(&ctx, task("https://down.example/x")).await.unwrap().is_some());
        assert!(robots.on_task(&ctx, task("https://down.example/y")).await.unwrap().is_some());
        assert_eq!(robots.cached_origins(), 0);
        assert_eq!(fetcher.count_path("/robots.txt"), 2);
    }
}
