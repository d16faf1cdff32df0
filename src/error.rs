//! Error types for the `alphacut` crate.
//!
//! [`AlphacutError`] is the unified error type returned by every fallible
//! operation. Variants are grouped by the pipeline stage that raises them, so
//! callers can tell a fatal media problem apart from an isolated encode
//! failure without parsing messages.
//!
//! Cleanup problems are deliberately *not* errors: they are collected as
//! [`CleanupWarning`](crate::cleanup::CleanupWarning) values instead.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

use crate::encode::OutputFormat;

/// The unified error type for all `alphacut` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AlphacutError {
    /// The source container could not be opened or probed.
    #[error("Failed to read media file at {path}: {reason}")]
    MediaRead {
        /// Path handed to the probe.
        path: PathBuf,
        /// Underlying reason the probe failed.
        reason: String,
    },

    /// The source container has no video stream.
    #[error("No video stream found in {path}")]
    NoVideoStream {
        /// Path handed to the probe.
        path: PathBuf,
    },

    /// The source opened but yielded no frames at all.
    #[error("No frames could be decoded from the source")]
    NoFrames,

    /// Matted frames could not be persisted.
    #[error("Frame storage failed at {path}: {reason}")]
    Storage {
        /// Directory or file that could not be written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The matte backend failed on a single frame.
    #[error("Matting failed on frame {frame_index}: {reason}")]
    Matting {
        /// Index of the frame that failed.
        frame_index: u64,
        /// Backend-provided reason.
        reason: String,
    },

    /// One output format could not be encoded.
    #[error("Failed to encode {format}: {reason}")]
    Encode {
        /// The format whose job failed.
        format: OutputFormat,
        /// Exit status and truncated encoder diagnostics.
        reason: String,
    },

    /// An option or argument is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested output format is not one of `webm`, `mov`, `gif`.
    #[error("Invalid format: {0}")]
    UnsupportedFormat(String),

    /// The bounded matting worker pool could not be created.
    #[error("Failed to start matting workers: {0}")]
    WorkerPool(String),

    /// The run was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate while encoding or decoding a frame.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),
}

impl AlphacutError {
    /// Whether this error stops the whole run.
    ///
    /// Per-frame matting errors and per-format encode errors are contained at
    /// their stage boundary; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AlphacutError::Encode { .. })
    }
}

impl From<FfmpegError> for AlphacutError {
    fn from(error: FfmpegError) -> Self {
        AlphacutError::Ffmpeg(error.to_string())
    }
}
