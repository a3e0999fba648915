// Job progress payload, sinks and throttling

use std::time::{Duration, Instant};

use serde::Serialize;

/// Progress payload reported during long-running scans.
/// Every scan (detection counts, time adjustment) uses this same shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub phase: String,
    pub current: u64,
    pub total: u64,
    pub percent: f64,
    pub message: String,
    pub is_cancelled: bool,
    pub is_error: bool,
    pub error_message: Option<String>,
}

impl JobProgress {
    pub fn new(job_id: impl Into<String>, phase: impl Into<String>, current: u64, total: u64) -> Self {
        let total_safe = total.max(1);
        let percent = (current as f64 / total_safe as f64) * 100.0;
        Self {
            job_id: job_id.into(),
            phase: phase.into(),
            current,
            total,
            percent: percent.min(100.0),
            message: String::new(),
            is_cancelled: false,
            is_error: false,
            error_message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = msg.into();
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.is_cancelled = true;
        self
    }

    pub fn error(mut self, msg: impl Into<String>) -> Self {
        self.is_error = true;
        self.error_message = Some(msg.into());
        self
    }
}

/// Receives progress reports. Closures work as sinks.
pub trait ProgressSink {
    fn report(&self, progress: &JobProgress);
}

impl<F: Fn(&JobProgress)> ProgressSink for F {
    fn report(&self, progress: &JobProgress) {
        self(progress)
    }
}

/// Writes progress to the log; the CLI's sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, progress: &JobProgress) {
        if progress.is_error {
            log::error!(
                "[{}] {}: {}",
                progress.job_id,
                progress.phase,
                progress.error_message.as_deref().unwrap_or("failed")
            );
        } else {
            log::info!(
                "[{}] {} {}/{} ({:.0}%) {}",
                progress.job_id,
                progress.phase,
                progress.current,
                progress.total,
                progress.percent,
                progress.message
            );
        }
    }
}

/// Report progress when a sink is available. No-op when sink is None.
pub fn emit_progress_opt(sink: Option<&dyn ProgressSink>, progress: &JobProgress) {
    if let Some(sink) = sink {
        sink.report(progress);
    }
}

/// Limits how often a scan reports. The first report always passes.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Emit if the interval has elapsed.
    pub fn emit(&mut self, sink: Option<&dyn ProgressSink>, progress: impl FnOnce() -> JobProgress) {
        if sink.is_some() && self.ready() {
            emit_progress_opt(sink, &progress());
        }
    }
}
