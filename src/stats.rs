//! # Status Module
//!
//! `StatusTracker` keeps lock-free counters for tasks and items and derives a
//! throughput sample from them on a fixed window (5 seconds by default).
//!
//! Counters only ever grow. Speeds are the per-second delta between the two
//! most recent samples and are the only values that go down.
//!
//! ## Example
//!
//! ```rust,ignore
//! let status = crawler.status();
//! println!("{}", status.progress_line(crawler.name()));
//! println!("{}", status.to_json_string_pretty()?);
//! println!("{}", status.to_markdown_string());
//! ```

use crate::error::SpiderError;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{Instrument, Span, info, trace};

/// Point-in-time copy of every counter, used for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub failed_tasks: usize,
    pub total_items: usize,
    pub finished_items: usize,
    pub dropped_items: usize,
    pub task_speed: f64,
    pub item_speed: f64,
    pub bytes_downloaded: usize,
    pub response_status_counts: BTreeMap<u16, usize>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl StatusSnapshot {
    /// Share of admitted tasks that reached their terminal stage, in percent.
    pub fn completion(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.finished_tasks as f64 * 100.0 / self.total_tasks as f64
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        if self.bytes_downloaded >= GB {
            format!("{:.2} GB", self.bytes_downloaded as f64 / GB as f64)
        } else if self.bytes_downloaded >= MB {
            format!("{:.2} MB", self.bytes_downloaded as f64 / MB as f64)
        } else if self.bytes_downloaded >= KB {
            format!("{:.2} KB", self.bytes_downloaded as f64 / KB as f64)
        } else {
            format!("{} B", self.bytes_downloaded)
        }
    }

    fn formatted_status_counts(&self, sep: &str, fmt: impl Fn(u16, usize) -> String) -> Option<String> {
        if self.response_status_counts.is_empty() {
            return None;
        }
        Some(
            self.response_status_counts
                .iter()
                .map(|(code, count)| fmt(*code, *count))
                .collect::<Vec<_>>()
                .join(sep),
        )
    }
}

struct SamplePoint {
    at: Instant,
    finished_tasks: usize,
    finished_items: usize,
}

/// Lock-free counters for one crawler.
pub struct StatusTracker {
    start_time: Instant,
    total_tasks: AtomicUsize,
    finished_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    total_items: AtomicUsize,
    finished_items: AtomicUsize,
    dropped_items: AtomicUsize,
    bytes_downloaded: AtomicUsize,
    response_status_counts: dashmap::DashMap<u16, usize>,
    // f64 bit patterns
    task_speed: AtomicU64,
    item_speed: AtomicU64,
    last_sample: Mutex<SamplePoint>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        StatusTracker {
            start_time: now,
            total_tasks: AtomicUsize::new(0),
            finished_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            total_items: AtomicUsize::new(0),
            finished_items: AtomicUsize::new(0),
            dropped_items: AtomicUsize::new(0),
            bytes_downloaded: AtomicUsize::new(0),
            response_status_counts: dashmap::DashMap::new(),
            task_speed: AtomicU64::new(0f64.to_bits()),
            item_speed: AtomicU64::new(0f64.to_bits()),
            last_sample: Mutex::new(SamplePoint {
                at: now,
                finished_tasks: 0,
                finished_items: 0,
            }),
        }
    }

    pub(crate) fn increment_total_tasks(&self) {
        self.total_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_finished_tasks(&self) {
        self.finished_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed_tasks(&self) {
        self.failed_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_total_items(&self) {
        self.total_items.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_finished_items(&self) {
        self.finished_items.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_dropped_items(&self) {
        self.dropped_items.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response(&self, status: u16, bytes: usize) {
        *self.response_status_counts.entry(status).or_insert(0) += 1;
        self.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks.load(Ordering::SeqCst)
    }

    pub fn finished_tasks(&self) -> usize {
        self.finished_tasks.load(Ordering::SeqCst)
    }

    pub fn failed_tasks(&self) -> usize {
        self.failed_tasks.load(Ordering::SeqCst)
    }

    pub fn total_items(&self) -> usize {
        self.total_items.load(Ordering::SeqCst)
    }

    pub fn finished_items(&self) -> usize {
        self.finished_items.load(Ordering::SeqCst)
    }

    pub fn dropped_items(&self) -> usize {
        self.dropped_items.load(Ordering::SeqCst)
    }

    /// Finished tasks per second over the last sampling window.
    pub fn task_speed(&self) -> f64 {
        f64::from_bits(self.task_speed.load(Ordering::SeqCst))
    }

    /// Finished items per second over the last sampling window.
    pub fn item_speed(&self) -> f64 {
        f64::from_bits(self.item_speed.load(Ordering::SeqCst))
    }

    /// Closes the current window and recomputes both speeds from it.
    pub fn sample(&self) {
        let mut last = self.last_sample.lock();
        let now = Instant::now();
        let secs = now.duration_since(last.at).as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let tasks = self.finished_tasks();
        let items = self.finished_items();
        let task_speed = (tasks - last.finished_tasks) as f64 / secs;
        let item_speed = (items - last.finished_items) as f64 / secs;
        self.task_speed.store(task_speed.to_bits(), Ordering::SeqCst);
        self.item_speed.store(item_speed.to_bits(), Ordering::SeqCst);
        *last = SamplePoint {
            at: now,
            finished_tasks: tasks,
            finished_items: items,
        };
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            total_tasks: self.total_tasks(),
            finished_tasks: self.finished_tasks(),
            failed_tasks: self.failed_tasks(),
            total_items: self.total_items(),
            finished_items: self.finished_items(),
            dropped_items: self.dropped_items(),
            task_speed: self.task_speed(),
            item_speed: self.item_speed(),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::SeqCst),
            response_status_counts: self
                .response_status_counts
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            elapsed: self.start_time.elapsed(),
        }
    }

    /// One-line summary for periodic progress logging.
    pub fn progress_line(&self, name: &str) -> String {
        let s = self.snapshot();
        format!(
            "[{}] items: {} ({:.2}/s), tasks: {}/{} ({:.2}/s), {:.1}% done",
            name,
            s.total_items,
            s.item_speed,
            s.finished_tasks,
            s.total_tasks,
            s.task_speed,
            s.completion()
        )
    }

    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Exports the current counters as a Markdown report.
    pub fn to_markdown_string(&self) -> String {
        let s = self.snapshot();
        let status_codes = s
            .formatted_status_counts("\n", |code, count| format!("- **{}**: {}", code, count))
            .unwrap_or_else(|| "N/A".to_string());

        format!(
            r#"# Crawl Status Report

- **Duration**: {:?}
- **Current Speed**: {:.2} task/s, {:.2} item/s

## Tasks
| Metric   | Count |
|----------|-------|
| Total    | {} |
| Finished | {} |
| Failed   | {} |

## Items
| Metric   | Count |
|----------|-------|
| Total    | {} |
| Finished | {} |
| Dropped  | {} |

## Responses
- **Downloaded**: {}

## Status Codes
{}
"#,
            s.elapsed,
            s.task_speed,
            s.item_speed,
            s.total_tasks,
            s.finished_tasks,
            s.failed_tasks,
            s.total_items,
            s.finished_items,
            s.dropped_items,
            s.formatted_bytes(),
            status_codes
        )
    }

    /// Spawns the sampler that closes a window every `every`. The task holds
    /// only a weak reference and exits once the tracker is dropped.
    pub(crate) fn spawn_sampler(self: &Arc<Self>, every: Duration, span: Span) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(tracker) = weak.upgrade() else {
                        break;
                    };
                    tracker.sample();
                    trace!("Status sampled: {:.2} task/s, {:.2} item/s", tracker.task_speed(), tracker.item_speed());
                }
            }
            .instrument(span),
        )
    }

    /// Spawns a reporter that logs the progress line every `every`.
    pub(crate) fn spawn_progress_logger(
        tracker: Weak<Self>,
        name: String,
        every: Duration,
        span: Span,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(tracker) = tracker.upgrade() else {
                        break;
                    };
                    info!("{}", tracker.progress_line(&name));
                }
            }
            .instrument(span),
        )
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl std::fmt::Display for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();

        writeln!(f, "\nCrawl Status")?;
        writeln!(f, "------------")?;
        writeln!(f, "  duration : {:?}", s.elapsed)?;
        writeln!(
            f,
            "  speed    : task/s: {:.2}, item/s: {:.2}",
            s.task_speed, s.item_speed
        )?;
        writeln!(
            f,
            "  tasks    : total: {}, finished: {}, failed: {}",
            s.total_tasks, s.finished_tasks, s.failed_tasks
        )?;
        writeln!(
            f,
            "  items    : total: {}, finished: {}, dropped: {}",
            s.total_items, s.finished_items, s.dropped_items
        )?;
        writeln!(f, "  download : {}", s.formatted_bytes())?;
        let status = s
            .formatted_status_counts(", ", |code, count| format!("{}: {}", code, count))
            .unwrap_or_else(|| "none".to_string());
        writeln!(f, "  status   : {}\n", status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_exports() {
        let status = StatusTracker::new();
        status.increment_total_tasks();
        status.increment_total_tasks();
        status.increment_finished_tasks();
        status.increment_total_items();
        status.increment_dropped_items();
        status.record_response(200, 2048);
        status.record_response(404, 10);

        let snap = status.snapshot();
        assert_eq!(snap.total_tasks, 2);
        assert_eq!(snap.finished_tasks, 1);
        assert_eq!(snap.dropped_items, 1);
        assert_eq!(snap.completion(), 50.0);
        assert_eq!(snap.response_status_counts.get(&404), Some(&1));
        assert_eq!(snap.formatted_bytes(), "2.01 KB");

        let json: serde_json::Value = serde_json::from_str(&status.to_json_string().unwrap()).unwrap();
        assert_eq!(json["total_tasks"], 2);
        assert_eq!(json["response_status_counts"]["200"], 1);

        assert!(status.to_markdown_string().contains("| Finished | 1 |"));
        assert!(status.to_string().contains("status   : 200: 1, 404: 1"));
        assert!(status.progress_line("demo").starts_with("[demo] items: 1"));
    }

    #[tokio::test]
    async fn sample_derives_speeds() {
        let status = StatusTracker::new();
        tokio::time::sleep(Duration::from_millis(50)).await;
        status.sample();
        assert_eq!(status.task_speed(), 0.0);

        for _ in 0..10 {
            status.increment_finished_tasks();
        }
        status.increment_finished_items();
        tokio::time::sleep(Duration::from_millis(100)).await;
        status.sample();
        assert!(status.task_speed() > 0.0);
        assert!(status.item_speed() > 0.0);
        assert!(status.task_speed() > status.item_speed());
    }

    #[tokio::test]
    async fn sampler_stops_with_tracker() {
        let status = Arc::new(StatusTracker::new());
        let handle = status.spawn_sampler(Duration::from_millis(5), Span::none());
        status.increment_finished_tasks();
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(status);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
