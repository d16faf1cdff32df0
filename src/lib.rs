//! # alphacut
//!
//! Turn an opaque-background video into transparency-preserving WebM, MOV
//! and GIF files.
//!
//! `alphacut` decodes the source with FFmpeg (via
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next)), runs every frame
//! through a pluggable [`MatteBackend`] that attaches an alpha channel,
//! persists the matted frames as a numbered PNG sequence in a per-run
//! temporary directory, and re-encodes that sequence with the external
//! `ffmpeg` program into each requested format.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alphacut::{CommandBackend, OutputRequest, Pipeline, PipelineOptions};
//!
//! let backend = Arc::new(CommandBackend::from_command_line("rembg i - -")?);
//! let outputs: Vec<OutputRequest> = vec!["webm=out.webm".parse()?, "gif=out.gif".parse()?];
//! let summary = Pipeline::new(backend, PipelineOptions::new()).run("input.mp4", &outputs)?;
//! for job in summary.failed() {
//!     eprintln!("{} failed: {:?}", job.format, job.diagnostic);
//! }
//! # Ok::<(), alphacut::AlphacutError>(())
//! ```
//!
//! ### Testing without a model
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alphacut::{ConstantAlpha, OutputFormat, OutputRequest, Pipeline, PipelineOptions};
//!
//! let pipeline = Pipeline::new(Arc::new(ConstantAlpha::new(200)), PipelineOptions::new());
//! pipeline.run("input.mp4", &[OutputRequest::new(OutputFormat::Mov, "out.mov")])?;
//! # Ok::<(), alphacut::AlphacutError>(())
//! ```
//!
//! ## Features
//!
//! - **Streaming**: decode, matte and persist one frame at a time
//! - **Bounded parallel matting**: a `rayon` pool with strict index-order
//!   reassembly
//! - **Three alpha profiles**: VP9 `yuva420p`, ProRes 4444 with a QuickTime
//!   Animation fallback, and a palette GIF with a plain fallback
//! - **Isolated encode jobs**: one failing format never affects the others
//! - **Progress & cancellation**: line-delimited JSON events and a
//!   `CancellationToken`
//! - **Guaranteed cleanup**: per-run temp directories removed on every
//!   exit path
//!
//! ## Requirements
//!
//! FFmpeg development libraries for decoding, and an `ffmpeg` executable
//! for encoding.

pub mod cleanup;
pub mod config;
pub mod encode;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod matte;
pub mod matting;
pub mod metadata;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod progress;
pub mod source;
pub mod store;

pub use cleanup::{CleanupReport, CleanupWarning, TempRun};
pub use config::PipelineOptions;
pub use encode::{
    CodecProfile, EncodeAttempt, EncodeJob, EncodeOptions, EncodeOrchestrator, JobStatus,
    MovProfile, OutputFormat, OutputRequest,
};
pub use error::AlphacutError;
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use frame::{Frame, MattedFrame};
pub use matte::{CommandBackend, ConstantAlpha, MatteBackend, MattePolicy};
pub use matting::{MattingReport, MattingStage, MattingStrategy, ReorderBuffer};
pub use metadata::{FrameRate, VideoMetadata};
pub use pipeline::{Pipeline, RunSummary};
pub use probe::MediaProbe;
pub use progress::{
    CancellationToken, JsonLinesProgress, ProgressCallback, ProgressEvent, Step, error_record,
};
pub use source::VideoFrames;
pub use store::{FrameStore, FrameStoreEntry};
