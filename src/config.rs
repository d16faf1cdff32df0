//! Pipeline configuration.
//!
//! [`PipelineOptions`] is a builder that threads the progress sink,
//! cancellation token, matting strategy and encoder settings through a run
//! without widening every function signature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alphacut::{
//!     CancellationToken, EncodeOptions, JsonLinesProgress, MattePolicy, MattingStrategy,
//!     PipelineOptions,
//! };
//!
//! let token = CancellationToken::new();
//! let options = PipelineOptions::new()
//!     .with_progress(Arc::new(JsonLinesProgress::new(std::io::stdout())))
//!     .with_cancellation(token.clone())
//!     .with_strategy(MattingStrategy::Parallel { workers: 4 })
//!     .with_policy(MattePolicy::TransparentPlaceholder)
//!     .with_encode(EncodeOptions::new().with_crf(24));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::encode::EncodeOptions;
use crate::error::AlphacutError;
use crate::matte::MattePolicy;
use crate::matting::MattingStrategy;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Settings for one pipeline run.
///
/// A default-constructed value mattes sequentially, aborts on the first
/// matting failure, writes frames under the system temp directory and
/// reports progress nowhere.
#[derive(Clone)]
pub struct PipelineOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) strategy: MattingStrategy,
    pub(crate) policy: MattePolicy,
    pub(crate) temp_root: PathBuf,
    /// Extraction progress fires every N decoded frames.
    pub(crate) extraction_every: u64,
    /// Matting progress fires every N stored frames.
    pub(crate) matting_every: u64,
    pub(crate) encode: EncodeOptions,
}

impl Debug for PipelineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineOptions")
            .field("has_progress", &true)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("strategy", &self.strategy)
            .field("policy", &self.policy)
            .field("temp_root", &self.temp_root)
            .field("extraction_every", &self.extraction_every)
            .field("matting_every", &self.matting_every)
            .field("encode", &self.encode)
            .finish()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            strategy: MattingStrategy::Sequential,
            policy: MattePolicy::Abort,
            temp_root: std::env::temp_dir(),
            extraction_every: 10,
            matting_every: 5,
            encode: EncodeOptions::default(),
        }
    }

    /// Attach a progress sink.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token. Cancelling stops frame work at the next
    /// frame boundary, kills running encoders, and still cleans up.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: MattingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Shorthand for [`MattingStrategy::with_workers`].
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.strategy = MattingStrategy::with_workers(workers);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: MattePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Directory under which each run creates its own frame directory.
    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    /// Report cadence for extraction and matting events. Clamped to at
    /// least 1; the last frame is always reported.
    #[must_use]
    pub fn with_report_every(mut self, extraction: u64, matting: u64) -> Self {
        self.extraction_every = extraction.max(1);
        self.matting_every = matting.max(1);
        self
    }

    #[must_use]
    pub fn with_encode(mut self, encode: EncodeOptions) -> Self {
        self.encode = encode;
        self
    }

    pub fn encode(&self) -> &EncodeOptions {
        &self.encode
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn strategy(&self) -> MattingStrategy {
        self.strategy
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Check every option.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::InvalidArgument`] naming the bad option.
    pub fn validate(&self) -> Result<(), AlphacutError> {
        if let MattingStrategy::Parallel { workers: 0 } = self.strategy {
            return Err(AlphacutError::InvalidArgument(
                "worker count must be at least 1".to_string(),
            ));
        }
        self.encode.validate()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = PipelineOptions::new();
        assert_eq!(options.strategy(), MattingStrategy::Sequential);
        assert_eq!(options.policy, MattePolicy::Abort);
        assert_eq!(options.extraction_every, 10);
        assert_eq!(options.matting_every, 5);
        assert!(!options.is_cancelled());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let options = PipelineOptions::new().with_strategy(MattingStrategy::Parallel { workers: 0 });
        assert!(matches!(options.validate(), Err(AlphacutError::InvalidArgument(_))));
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let options = PipelineOptions::new().with_cancellation(token.clone());
        token.cancel();
        assert!(options.is_cancelled());
    }

    #[test]
    fn debug_hides_callback() {
        let rendered = format!("{:?}", PipelineOptions::new());
        assert!(rendered.contains("has_progress: true"));
    }
}
