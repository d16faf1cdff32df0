//! The end-to-end pipeline.
//!
//! One parameterised [`Pipeline`] covers every combination of requested
//! outputs:
//!
//! 1. read metadata (`step1`)
//! 2. decode frames one at a time (`step2`)
//! 3. matte and persist each frame in order (`step3`)
//! 4. encode one isolated job per output (`step4`)
//! 5. remove the temporary frames (`step5`)
//! 6. report completion (`step6`)
//!
//! Steps 2 and 3 stream: a frame is decoded, matted, written and dropped
//! before the next one is decoded (or, with the parallel strategy, at most
//! `2 × workers` frames are alive at once).
//!
//! Fatal errors emit a single error-carrying event for the phase that
//! failed, then cleanup runs and the error is returned. Encode failures are
//! never fatal; they are recorded on the returned [`RunSummary`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alphacut::{CommandBackend, OutputFormat, OutputRequest, Pipeline, PipelineOptions};
//!
//! let backend = Arc::new(CommandBackend::from_command_line("rembg i - -")?);
//! let pipeline = Pipeline::new(backend, PipelineOptions::new().with_workers(2));
//! let summary = pipeline.run(
//!     "input.mp4",
//!     &[OutputRequest::new(OutputFormat::Webm, "output.webm")],
//! )?;
//! println!("{} frames, {} outputs", summary.frame_count, summary.succeeded().count());
//! # Ok::<(), alphacut::AlphacutError>(())
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::cleanup::CleanupReport;
use crate::config::PipelineOptions;
use crate::encode::{EncodeJob, EncodeOrchestrator, OutputRequest};
use crate::error::AlphacutError;
use crate::frame::Frame;
use crate::matte::MatteBackend;
use crate::matting::MattingStage;
use crate::metadata::VideoMetadata;
use crate::progress::{PhaseTracker, ProgressEvent, Step};
use crate::source::VideoFrames;
use crate::store::FrameStore;

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub metadata: VideoMetadata,
    /// Frames actually decoded and persisted.
    pub frame_count: u64,
    /// Indices replaced by transparent placeholders.
    pub placeholder_frames: Vec<u64>,
    /// One job per requested output, in request order.
    pub jobs: Vec<EncodeJob>,
    pub cleanup: CleanupReport,
}

impl RunSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &EncodeJob> {
        self.jobs.iter().filter(|job| job.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &EncodeJob> {
        self.jobs.iter().filter(|job| !job.succeeded())
    }

    /// Whether at least one requested output was written.
    pub fn any_succeeded(&self) -> bool {
        self.jobs.iter().any(EncodeJob::succeeded)
    }
}

/// Video in, transparent videos out.
pub struct Pipeline {
    backend: Arc<dyn MatteBackend>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn MatteBackend>, options: PipelineOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Process the video at `input` into every requested output.
    ///
    /// # Errors
    ///
    /// - [`AlphacutError::InvalidArgument`] for bad options or outputs.
    /// - [`AlphacutError::MediaRead`] / [`AlphacutError::NoVideoStream`]
    ///   before any frame work begins.
    /// - [`AlphacutError::NoFrames`], [`AlphacutError::Storage`],
    ///   [`AlphacutError::Matting`] (under the abort policy) and
    ///   [`AlphacutError::Cancelled`] once frame work has begun. The
    ///   temporary frames are removed first.
    pub fn run<P: AsRef<Path>>(&self, input: P, outputs: &[OutputRequest]) -> Result<RunSummary, AlphacutError> {
        let input = input.as_ref();
        self.fail_on(Step::Metadata, self.check_request(outputs))?;

        self.emit(Step::Metadata, "Reading video metadata...", Some(0), Some(1));
        let frames = self.fail_on(Step::Metadata, VideoFrames::open(input))?;
        let metadata = frames.metadata().clone();
        log::info!("Opened {}: {}", input.display(), metadata.summary());
        self.emit(Step::Metadata, metadata.summary(), Some(1), Some(1));

        self.process(metadata, frames, outputs)
    }

    /// Like [`run`](Pipeline::run), with frames from any source.
    ///
    /// The frames must be indexed `0, 1, 2, ...` and match `metadata`'s
    /// dimensions.
    ///
    /// # Errors
    ///
    /// As [`run`](Pipeline::run), minus the media read errors.
    pub fn run_with_source<I>(
        &self,
        metadata: VideoMetadata,
        frames: I,
        outputs: &[OutputRequest],
    ) -> Result<RunSummary, AlphacutError>
    where
        I: IntoIterator<Item = Frame>,
    {
        self.fail_on(Step::Metadata, self.check_request(outputs))?;
        self.emit(Step::Metadata, "Reading video metadata...", Some(0), Some(1));
        self.emit(Step::Metadata, metadata.summary(), Some(1), Some(1));
        self.process(metadata, frames, outputs)
    }

    fn process<I>(&self, metadata: VideoMetadata, frames: I, outputs: &[OutputRequest]) -> Result<RunSummary, AlphacutError>
    where
        I: IntoIterator<Item = Frame>,
    {
        let options = &self.options;
        let mut store = self.fail_on(Step::Extraction, FrameStore::create(&options.temp_root))?;

        let mut extraction = PhaseTracker::new(
            Arc::clone(&options.progress),
            Step::Extraction,
            "Extracting",
            metadata.nominal_frame_count,
            options.extraction_every,
        );
        let mut matting = PhaseTracker::new(
            Arc::clone(&options.progress),
            Step::Matting,
            "Matting",
            metadata.nominal_frame_count,
            options.matting_every,
        );
        extraction.start("Extracting frames...");
        matting.start("Removing backgrounds...");

        let stage = MattingStage::new(Arc::clone(&self.backend), options.strategy, options.policy)
            .with_cancellation(options.cancellation.clone());
        let decoded = frames.into_iter().inspect(|_| extraction.advance());
        let result = stage.run(decoded, |matted| {
            store.write(&matted)?;
            matting.advance();
            Ok(())
        });

        let report = match result {
            Ok(report) if report.frames == 0 => Err(AlphacutError::NoFrames),
            other => other,
        };
        let report = match report {
            Ok(report) => report,
            Err(error) => {
                let step = match error {
                    AlphacutError::NoFrames => Step::Extraction,
                    _ => Step::Matting,
                };
                return Err(self.abort(step, error, &mut store));
            }
        };
        extraction.finish();
        matting.finish();
        log::info!(
            "Matted {} frames ({} placeholders) into {}",
            report.frames,
            report.placeholders.len(),
            store.dir().display()
        );

        let orchestrator = EncodeOrchestrator::new(options.encode.clone())
            .with_progress(Arc::clone(&options.progress))
            .with_cancellation(options.cancellation.clone());
        let jobs = orchestrator.run(&store.input_pattern(), metadata.frame_rate, outputs);
        if options.is_cancelled() {
            return Err(self.abort(Step::Encoding, AlphacutError::Cancelled, &mut store));
        }

        let cleanup = self.cleanup(&mut store);

        let written = jobs.iter().filter(|job| job.succeeded()).count();
        let message = if written == jobs.len() {
            format!("Processing complete: {written} output(s) written")
        } else {
            format!(
                "Processing complete: {written} of {} output(s) written",
                jobs.len()
            )
        };
        log::info!("{message}");
        self.emit(Step::Complete, message, Some(1), Some(1));

        Ok(RunSummary {
            metadata,
            frame_count: report.frames,
            placeholder_frames: report.placeholders,
            jobs,
            cleanup,
        })
    }

    fn check_request(&self, outputs: &[OutputRequest]) -> Result<(), AlphacutError> {
        self.options.validate()?;
        if outputs.is_empty() {
            return Err(AlphacutError::InvalidArgument(
                "at least one output is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for output in outputs {
            if !seen.insert(output.path.as_path()) {
                return Err(AlphacutError::InvalidArgument(format!(
                    "output path {} is requested twice",
                    output.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Emit the error event for `step`, clean up, and hand the error back.
    fn abort(&self, step: Step, error: AlphacutError, store: &mut FrameStore) -> AlphacutError {
        log::error!("Run failed during {}: {error}", step.tag());
        self.options
            .progress
            .on_progress(&ProgressEvent::failure(step, error.to_string()));
        self.cleanup(store);
        error
    }

    fn cleanup(&self, store: &mut FrameStore) -> CleanupReport {
        self.emit(Step::Cleanup, "Cleaning up temporary files...", Some(0), Some(1));
        let report = store.cleanup();
        let message = if report.is_clean() {
            format!("Removed {} temporary files", report.removed_files)
        } else {
            format!(
                "Removed {} temporary files ({} could not be removed)",
                report.removed_files,
                report.warnings.len()
            )
        };
        self.emit(Step::Cleanup, message, Some(1), Some(1));
        report
    }

    /// Emit the error event for a failure that happens before any temporary
    /// state exists.
    fn fail_on<T>(&self, step: Step, result: Result<T, AlphacutError>) -> Result<T, AlphacutError> {
        result.inspect_err(|error| {
            log::error!("Run failed during {}: {error}", step.tag());
            self.options
                .progress
                .on_progress(&ProgressEvent::failure(step, error.to_string()));
        })
    }

    fn emit(&self, step: Step, message: impl Into<String>, progress: Option<u64>, total: Option<u64>) {
        self.options
            .progress
            .on_progress(&ProgressEvent::new(step, message, progress, total));
    }
}
