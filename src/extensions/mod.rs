//! Extensions: stateful hook producers installed at build time.
//!
//! An extension owns its state and registers one or more hooks when it is
//! installed. Extensions are installed in configuration order and share the
//! crawler's chains, so their relative order is part of the configuration.
//!
//! A closure taking `&mut Hooks<I>` is an extension too:
//!
//! ```rust,ignore
//! builder.add_extension(|hooks: &mut Hooks<String>| {
//!     hooks.on_item(|_ctx, item| Box::pin(async move { Ok(Some(item)) }));
//! });
//! ```

mod deduplicate;
mod depth_limit;
mod error_log;
mod max_requests;
mod robots;

pub use deduplicate::Deduplicate;
pub use depth_limit::{DEPTH_KEY, DepthLimit};
pub use error_log::{ErrorKind, ErrorLog, ErrorRecord};
pub use max_requests::MaxRequestLimit;
pub use robots::RobotsTxt;

use crate::hooks::Hooks;
use crate::task::ScrapedItem;

pub trait Extension<I: ScrapedItem>: Send {
    /// Registers this extension's hooks.
    fn install(self: Box<Self>, hooks: &mut Hooks<I>);
}

impl<I, F> Extension<I> for F
where
    I: ScrapedItem,
    F: FnOnce(&mut Hooks<I>) + Send,
{
    fn install(self: Box<Self>, hooks: &mut Hooks<I>) {
        (*self)(hooks)
    }
}
