//! Progress reporting and cancellation support.
//!
//! The pipeline reports every meaningful unit of work as a [`ProgressEvent`]
//! delivered to a [`ProgressCallback`]. [`JsonLinesProgress`] is the
//! line-delimited JSON sink used by the command-line tool: each event is
//! written and flushed immediately so a consumer reading the stream live sees
//! near-real-time progress.
//!
//! Wire shape of one event:
//!
//! ```text
//! {"step":"step3","message":"Matting frame 40/90...","progress":40,"total":90,"percent":44.4}
//! ```
//!
//! # Example
//!
//! ```
//! use alphacut::{JsonLinesProgress, ProgressCallback, ProgressEvent, Step};
//!
//! let sink = JsonLinesProgress::new(Vec::new());
//! sink.on_progress(&ProgressEvent::new(Step::Metadata, "Reading video metadata...", Some(0), Some(1)));
//! let line = String::from_utf8(sink.into_inner()).unwrap();
//! assert!(line.starts_with("{\"step\":\"step1\""));
//! ```

use std::io::Write;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;

/// Pipeline phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Step {
    /// Reading source metadata.
    #[serde(rename = "step1")]
    Metadata,
    /// Decoding source frames.
    #[serde(rename = "step2")]
    Extraction,
    /// Running the matte backend and persisting frames.
    #[serde(rename = "step3")]
    Matting,
    /// Encoding one job per requested format.
    #[serde(rename = "step4")]
    Encoding,
    /// Removing the temporary frame directory.
    #[serde(rename = "step5")]
    Cleanup,
    /// The run finished.
    #[serde(rename = "step6")]
    Complete,
}

impl Step {
    /// The wire tag (`step1` .. `step6`).
    pub fn tag(self) -> &'static str {
        match self {
            Step::Metadata => "step1",
            Step::Extraction => "step2",
            Step::Matting => "step3",
            Step::Encoding => "step4",
            Step::Cleanup => "step5",
            Step::Complete => "step6",
        }
    }
}

/// One progress record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub step: Step,
    pub message: String,
    pub progress: Option<u64>,
    pub total: Option<u64>,
    /// `round(progress / total * 100, 1)`, or `None` when either is missing or zero.
    pub percent: Option<f64>,
    /// Present only on the record describing a fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        step: Step,
        message: impl Into<String>,
        progress: Option<u64>,
        total: Option<u64>,
    ) -> Self {
        Self {
            step,
            message: message.into(),
            progress,
            total,
            percent: percent(progress, total),
            error: None,
        }
    }

    /// An error-shaped record for a fatal failure during `step`.
    pub fn failure(step: Step, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            step,
            message: format!("Processing failed: {error}"),
            progress: None,
            total: None,
            percent: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Percentage rounded to one decimal place and clamped to `[0, 100]`.
///
/// Returns `None` unless both values are present and non-zero.
pub fn percent(progress: Option<u64>, total: Option<u64>) -> Option<f64> {
    match (progress, total) {
        (Some(current), Some(total)) if current > 0 && total > 0 => {
            let raw = current as f64 / total as f64 * 100.0;
            Some(((raw * 10.0).round() / 10.0).clamp(0.0, 100.0))
        }
        _ => None,
    }
}

/// The bare `{"error": "..."}` record emitted for invalid input.
pub fn error_record(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Receives progress events.
///
/// Implementations must be [`Send`] and [`Sync`]: encode jobs report from
/// their own threads. Callbacks observe but cannot halt the run; use
/// [`CancellationToken`] for that.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Discards all events. The default sink.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Writes each event as one JSON line and flushes immediately.
pub struct JsonLinesProgress<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesProgress<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> ProgressCallback for JsonLinesProgress<W> {
    fn on_progress(&self, event: &ProgressEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(error) => {
                log::warn!("Failed to serialise progress event: {error}");
                return;
            }
        };
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(error) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            log::warn!("Failed to write progress event: {error}");
        }
    }
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clones share state. Cancelling stops frame work at the next frame boundary
/// and kills any running probe, matte, or encoder process; cleanup still runs.
///
/// ```
/// use alphacut::CancellationToken;
///
/// let token = CancellationToken::new();
/// let clone = token.clone();
/// token.cancel();
/// assert!(clone.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one counted phase and emits throttled events for it.
///
/// The reported total starts at the nominal count and is raised to the
/// current count whenever the source yields more frames than declared, so
/// the percentage never exceeds 100 and never decreases.
pub(crate) struct PhaseTracker {
    callback: Arc<dyn ProgressCallback>,
    step: Step,
    verb: &'static str,
    total: Option<u64>,
    current: u64,
    every: u64,
}

impl PhaseTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        step: Step,
        verb: &'static str,
        total: Option<u64>,
        every: u64,
    ) -> Self {
        Self {
            callback,
            step,
            verb,
            total,
            current: 0,
            every: every.max(1),
        }
    }

    /// Emit the opening `0/total` event.
    pub(crate) fn start(&self, message: impl Into<String>) {
        self.callback
            .on_progress(&ProgressEvent::new(self.step, message, Some(0), self.total));
    }

    /// Record one completed item, reporting on the first item and then every
    /// `every` items.
    pub(crate) fn advance(&mut self) {
        self.current += 1;
        if self.total.is_some_and(|total| self.current > total) {
            self.total = Some(self.current);
        }
        if self.current == 1 || self.current % self.every == 0 {
            self.report();
        }
    }

    /// Emit the closing event; the total becomes the true count.
    pub(crate) fn finish(&mut self) {
        self.total = Some(self.current);
        self.report();
    }

    pub(crate) fn current(&self) -> u64 {
        self.current
    }

    fn report(&self) {
        let message = match self.total {
            Some(total) => format!("{} frame {}/{}...", self.verb, self.current, total),
            None => format!("{} frame {}...", self.verb, self.current),
        };
        self.callback.on_progress(&ProgressEvent::new(
            self.step,
            message,
            Some(self.current),
            self.total,
        ));
    }
}
