//! Matte backends: the foreground segmentation boundary.
//!
//! A [`MatteBackend`] turns one RGB [`Frame`] into an RGBA [`MattedFrame`] of
//! identical dimensions, where alpha is the foreground weight. The pipeline
//! treats it as an opaque, possibly slow function and never looks inside.
//!
//! Two backends ship with the crate:
//!
//! - [`ConstantAlpha`] copies the colour channels and sets a fixed alpha.
//!   Useful for tests and as a passthrough.
//! - [`CommandBackend`] pipes each frame as PNG through an external
//!   segmentation command (for example `rembg i - -`) and reads back an RGBA
//!   PNG.

use std::io::Cursor;
use std::process::Command;
use std::time::Duration;

use image::{ImageFormat, RgbaImage};

use crate::error::AlphacutError;
use crate::frame::{Frame, MattedFrame};
use crate::process::{self, ProcessFailure};
use crate::progress::CancellationToken;

/// Foreground segmentation capability.
///
/// Implementations must be [`Send`] and [`Sync`]: the bounded-parallel
/// strategy calls `matte` from several worker threads at once.
pub trait MatteBackend: Send + Sync {
    /// Produce the matted version of `frame`.
    ///
    /// The result must carry `frame.index` and `frame`'s dimensions.
    fn matte(&self, frame: &Frame) -> Result<MattedFrame, AlphacutError>;

    /// Short name used in log messages.
    fn name(&self) -> &str;
}

/// What to do when the backend fails on a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MattePolicy {
    /// Stop the run with [`AlphacutError::Matting`].
    #[default]
    Abort,
    /// Log a warning, store a fully transparent frame in its place, and
    /// continue. Substituted indices are listed in the run summary.
    TransparentPlaceholder,
}

/// Copies RGB and sets every pixel's alpha to a constant.
#[derive(Debug, Clone, Copy)]
pub struct ConstantAlpha {
    alpha: u8,
}

impl ConstantAlpha {
    pub fn new(alpha: u8) -> Self {
        Self { alpha }
    }

    /// Fully opaque output: the frames pass through unchanged.
    pub fn opaque() -> Self {
        Self::new(u8::MAX)
    }
}

impl MatteBackend for ConstantAlpha {
    fn matte(&self, frame: &Frame) -> Result<MattedFrame, AlphacutError> {
        let (width, height) = frame.dimensions();
        let mut image = RgbaImage::new(width, height);
        for (target, source) in image.pixels_mut().zip(frame.image.pixels()) {
            target.0 = [source[0], source[1], source[2], self.alpha];
        }
        Ok(MattedFrame::new(frame.index, image))
    }

    fn name(&self) -> &str {
        "constant-alpha"
    }
}

/// Runs an external segmentation command once per frame.
///
/// The frame is written to the command's stdin as PNG; the command must write
/// an RGBA image (any format the `image` crate can sniff, PNG in practice) to
/// stdout and exit 0.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    cancellation: Option<CancellationToken>,
}

impl CommandBackend {
    /// Default per-frame timeout. Model inference is slow, but a frame that
    /// takes minutes means the backend is stuck.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Self::DEFAULT_TIMEOUT,
            cancellation: None,
        }
    }

    /// Parse a whitespace-separated command line such as `rembg i - -`.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::InvalidArgument`] for an empty command line.
    pub fn from_command_line(command_line: &str) -> Result<Self, AlphacutError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| AlphacutError::InvalidArgument("matte command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Kill an in-flight command when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn failure(&self, frame: &Frame, reason: impl Into<String>) -> AlphacutError {
        AlphacutError::Matting {
            frame_index: frame.index,
            reason: reason.into(),
        }
    }
}

impl MatteBackend for CommandBackend {
    fn matte(&self, frame: &Frame) -> Result<MattedFrame, AlphacutError> {
        let mut encoded = Vec::new();
        frame
            .image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|error| self.failure(frame, format!("cannot encode input PNG: {error}")))?;

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        let output = process::run_bounded(
            &mut command,
            Some(encoded),
            self.timeout,
            self.cancellation.as_ref(),
        )
        .map_err(|failure| match failure {
            ProcessFailure::Cancelled { .. } => AlphacutError::Cancelled,
            other => self.failure(frame, other.to_string()),
        })?;

        if !output.success() {
            return Err(self.failure(
                frame,
                format!(
                    "`{}` exited with {}: {}",
                    self.program,
                    output.status,
                    process::truncate_diagnostic(&output.stderr, 500),
                ),
            ));
        }

        let image = image::load_from_memory(&output.stdout)
            .map_err(|error| self.failure(frame, format!("unreadable matte output: {error}")))?
            .to_rgba8();

        if image.dimensions() != frame.dimensions() {
            let (width, height) = image.dimensions();
            return Err(self.failure(
                frame,
                format!(
                    "matte is {width}x{height}, expected {}x{}",
                    frame.image.width(),
                    frame.image.height()
                ),
            ));
        }

        Ok(MattedFrame::new(frame.index, image))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn sample_frame(index: u64) -> Frame {
        Frame::new(index, RgbImage::from_pixel(4, 2, Rgb([10, 20, 30])))
    }

    #[test]
    fn constant_alpha_copies_colour() {
        let matted = ConstantAlpha::new(128).matte(&sample_frame(3)).unwrap();
        assert_eq!(matted.index, 3);
        assert_eq!(matted.dimensions(), (4, 2));
        assert!(matted.image.pixels().all(|pixel| pixel.0 == [10, 20, 30, 128]));
    }

    #[test]
    fn empty_command_line_rejected() {
        assert!(CommandBackend::from_command_line("   ").is_err());
    }

    #[test]
    fn command_line_is_split() {
        let backend = CommandBackend::from_command_line("rembg i - -").unwrap();
        assert_eq!(backend.name(), "rembg");
        assert_eq!(backend.args, vec!["i", "-", "-"]);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_frame_index() {
        let backend = CommandBackend::new("sh", vec!["-c".into(), "cat >/dev/null; exit 1".into()]);
        match backend.matte(&sample_frame(9)) {
            Err(AlphacutError::Matting { frame_index, .. }) => assert_eq!(frame_index, 9),
            other => panic!("expected matting error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn echo_command_round_trips_png() {
        // `cat` echoes the RGB PNG back; it is promoted to RGBA with opaque alpha.
        let backend = CommandBackend::new("cat", Vec::new());
        let matted = backend.matte(&sample_frame(0)).unwrap();
        assert!(matted.image.pixels().all(|pixel| pixel.0 == [10, 20, 30, 255]));
    }
}
