//! Content-filtered post-fetch handlers.
//!
//! `HtmlHandler` runs its callback once per element matching a CSS selector
//! in HTML responses. `JsonHandler` runs its callback with the value found at
//! a JSON pointer in JSON responses. Both are ordinary [`Handler`]s, so they
//! go on the post-fetch chain or on a single task.
//!
//! `scraper::Html` is not `Send`, so matches are copied out into owned
//! [`Selection`]s before any callback is awaited.

use crate::context::Context;
use crate::error::SpiderError;
use crate::hooks::Handler;
use crate::task::ScrapedItem;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;

/// An owned copy of one matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Outer HTML of the element.
    pub html: String,
    /// Concatenated text of the element and its descendants.
    pub text: String,
    pub attrs: HashMap<String, String>,
}

impl Selection {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Copies every element of `body` matching `selector`.
pub fn select(body: &str, selector: &Selector) -> Vec<Selection> {
    let document = Html::parse_document(body);
    document
        .select(selector)
        .map(|el| Selection {
            html: el.html(),
            text: el.text().collect(),
            attrs: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect()
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, SpiderError> {
    Selector::parse(selector)
        .map_err(|e| SpiderError::ConfigurationError(format!("invalid selector `{selector}`: {e}")))
}

pub struct HtmlHandler<I, F> {
    selector: Selector,
    callback: F,
    _item: PhantomData<fn() -> I>,
}

impl<I, F> HtmlHandler<I, F>
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a mut Context<I>, Selection) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync,
{
    pub fn new(selector: &str, callback: F) -> Result<Self, SpiderError> {
        Ok(Self {
            selector: parse_selector(selector)?,
            callback,
            _item: PhantomData,
        })
    }
}

#[async_trait]
impl<I, F> Handler<I> for HtmlHandler<I, F>
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a mut Context<I>, Selection) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context<I>) -> Result<(), SpiderError> {
        let selections = match ctx.response() {
            Some(resp) if resp.is_html() => select(&resp.text(), &self.selector),
            _ => return Ok(()),
        };
        for selection in selections {
            if ctx.is_aborted() {
                break;
            }
            (self.callback)(ctx, selection).await?;
        }
        Ok(())
    }
}

pub struct JsonHandler<I, F> {
    pointer: String,
    callback: F,
    _item: PhantomData<fn() -> I>,
}

impl<I, F> JsonHandler<I, F>
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a mut Context<I>, Value) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync,
{
    /// `pointer` is an RFC 6901 JSON pointer; `""` selects the whole document.
    pub fn new(pointer: impl Into<String>, callback: F) -> Self {
        Self {
            pointer: pointer.into(),
            callback,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<I, F> Handler<I> for JsonHandler<I, F>
where
    I: ScrapedItem,
    F: for<'a> Fn(&'a mut Context<I>, Value) -> BoxFuture<'a, Result<(), SpiderError>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut Context<I>) -> Result<(), SpiderError> {
        let found = match ctx.response() {
            Some(resp) if resp.is_json() => resp.json()?.pointer(&self.pointer).cloned(),
            _ => return Ok(()),
        };
        match found {
            Some(value) if !ctx.is_aborted() => (self.callback)(ctx, value).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Meta;
    use crate::request::Request;
    use crate::response::Response;
    use crate::testing::detached_shared;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use url::Url;

    fn fetched(content_type: &str, body: &str) -> Context<String> {
        let (shared, _parts) = detached_shared::<String>();
        let mut ctx = Context::for_request(shared, Request::get("https://example.com/"), Meta::new());
        ctx.set_response(
            Response::new(Url::parse("https://example.com/").unwrap(), 200, body.to_string())
                .with_header("content-type", content_type),
        );
        ctx
    }

    #[test]
    fn select_copies_matches() {
        let selector = parse_selector("a.next").unwrap();
        let found = select(
            r#"<html><body><a class="next" href="/p2">Next <b>page</b></a><a href="/x">x</a></body></html>"#,
            &selector,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attr("href"), Some("/p2"));
        assert_eq!(found[0].text, "Next page");
        assert!(parse_selector("a[").is_err());
    }

    #[tokio::test]
    async fn html_handler_skips_other_content() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler = HtmlHandler::new("li", move |_ctx: &mut Context<String>, sel: Selection| {
            s.lock().push(sel.text);
            Box::pin(async { Ok(()) })
        })
        .unwrap();

        let mut ctx = fetched("text/html; charset=utf-8", "<ul><li>a</li><li>b</li></ul>");
        handler.handle(&mut ctx).await.unwrap();
        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);

        let mut ctx = fetched("text/plain", "<ul><li>c</li></ul>");
        handler.handle(&mut ctx).await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn html_handler_stops_on_abort() {
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let handler = HtmlHandler::new("li", move |ctx: &mut Context<String>, _sel: Selection| {
            *c.lock() += 1;
            ctx.abort();
            Box::pin(async { Ok(()) })
        })
        .unwrap();

        let mut ctx = fetched("text/html", "<ul><li>a</li><li>b</li></ul>");
        handler.handle(&mut ctx).await.unwrap();
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn json_handler_follows_pointer() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let handler = JsonHandler::new("/data/1/name", move |_ctx: &mut Context<String>, v: Value| {
            *s.lock() = Some(v);
            Box::pin(async { Ok(()) })
        });

        let mut ctx = fetched("application/json", r#"{"data":[{"name":"a"},{"name":"b"}]}"#);
        handler.handle(&mut ctx).await.unwrap();
        assert_eq!(*seen.lock(), Some(Value::String("b".into())));

        let mut broken = fetched("application/json", "{");
        assert!(matches!(handler.handle(&mut broken).await, Err(SpiderError::Json(_))));
    }
}
