use super::Extension;
use crate::context::Context;
use crate::error::SpiderError;
use crate::hooks::{ErrorHook, ErrorStage, Hook, Hooks, ItemHook};
use crate::task::ScrapedItem;
use async_trait::async_trait;
use log::error;
use parking_lot::Mutex;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::io::Write;
use std::sync::Arc;

/// Where an error record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    OnItem,
    OnRecover,
    OnReqError,
    OnRespError,
}

impl From<ErrorStage> for ErrorKind {
    fn from(stage: ErrorStage) -> Self {
        match stage {
            ErrorStage::Recover => ErrorKind::OnRecover,
            ErrorStage::Request => ErrorKind::OnReqError,
            ErrorStage::Response => ErrorKind::OnRespError,
        }
    }
}

/// One line of the error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub spider: String,
    pub kind: ErrorKind,
    pub context: String,
    pub url: Option<String>,
    pub request_error: Option<String>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: String,
    pub stack: String,
}

impl ErrorRecord {
    pub fn new<I: ScrapedItem>(ctx: &Context<I>, kind: ErrorKind, err: &(dyn std::error::Error + 'static)) -> Self {
        let request = ctx.request();
        let response = ctx.response();
        let stack = match err.downcast_ref::<SpiderError>().and_then(SpiderError::backtrace) {
            Some(panic_stack) => panic_stack.to_string(),
            None => Backtrace::force_capture().to_string(),
        };
        ErrorRecord {
            spider: ctx.crawler_name().to_string(),
            kind,
            context: ctx.to_string(),
            url: request.map(|r| r.raw_url().to_string()),
            request_error: request.and_then(|r| r.error()).map(str::to_string),
            response_status: response.map(|r| r.status),
            response_body: response
                .filter(|r| !r.body.is_empty())
                .map(|r| r.text().into_owned()),
            error: err.to_string(),
            stack,
        }
    }
}

/// Writes a JSON line per error to an injected writer.
///
/// Subscribes to the on-result chain, where it logs payloads that represent
/// errors and passes every payload through, and to all three error chains.
pub struct ErrorLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ErrorLog {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn write_record(&self, record: &ErrorRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                error!("[ErrorLog] could not serialize record: {}", e);
                return;
            }
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            error!("[ErrorLog] write failed: {}", e);
        }
    }
}

#[async_trait]
impl<I: ScrapedItem> ItemHook<I> for ErrorLog {
    async fn on_item(&self, ctx: &Context<I>, item: I) -> Result<Option<I>, SpiderError> {
        if let Some(err) = item.as_error() {
            self.write_record(&ErrorRecord::new(ctx, ErrorKind::OnItem, err));
        }
        Ok(Some(item))
    }
}

struct StageLog {
    log: Arc<ErrorLog>,
    kind: ErrorKind,
}

#[async_trait]
impl<I: ScrapedItem> ErrorHook<I> for StageLog {
    async fn on_error(&self, ctx: &Context<I>, err: &SpiderError) {
        self.log.write_record(&ErrorRecord::new(ctx, self.kind, err));
    }
}

impl<I: ScrapedItem> Extension<I> for ErrorLog {
    fn install(self: Box<Self>, hooks: &mut Hooks<I>) {
        let log: Arc<Self> = Arc::from(self);
        hooks.register(Hook::Item(log.clone()));
        for stage in [ErrorStage::Recover, ErrorStage::Request, ErrorStage::Response] {
            hooks.register(Hook::Error(
                stage,
                Arc::new(StageLog {
                    log: Arc::clone(&log),
                    kind: stage.into(),
                }),
            ));
        }
    }
}
