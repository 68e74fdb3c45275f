//! Post-fetch stage of a task: the crawler-wide post-fetch chain followed by
//! the handlers bound to the task itself.

use crate::context::{Context, Shared};
use crate::error::SpiderError;
use crate::hooks::Handler;
use crate::task::ScrapedItem;
use std::sync::Arc;
use tracing::trace;

/// Runs post-fetch hooks and then `handlers` in order, stopping at the first
/// error or as soon as the context is aborted.
pub(crate) async fn run_handlers<I: ScrapedItem>(
    shared: &Shared<I>,
    ctx: &mut Context<I>,
    handlers: &[Arc<dyn Handler<I>>],
) -> Result<(), SpiderError> {
    shared.hooks.run_post_fetch(ctx).await?;
    if ctx.is_aborted() {
        trace!("Context aborted by a post-fetch hook: {}", ctx);
        return Ok(());
    }

    for (idx, handler) in handlers.iter().enumerate() {
        if ctx.is_aborted() {
            trace!(
                "Context aborted, skipping {} remaining handlers: {}",
                handlers.len() - idx,
                ctx
            );
            break;
        }
        handler.handle(ctx).await?;
    }
    Ok(())
}
