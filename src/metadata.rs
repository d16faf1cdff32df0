//! Source video metadata.
//!
//! [`VideoMetadata`] is produced once by [`MediaProbe`](crate::MediaProbe)
//! before any frame work begins. The nominal frame count it carries is
//! informational only: the authoritative count is whatever the frame source
//! actually decodes.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::error::AlphacutError;

/// A frame rate expressed as a rational `numerator / denominator`.
///
/// Encoders receive the rational form verbatim so non-integral rates such as
/// `30000/1001` survive the round trip without rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    numerator: u32,
    denominator: u32,
}

impl FrameRate {
    /// Build a frame rate, reducing it to lowest terms.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::InvalidArgument`] if either part is zero.
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, AlphacutError> {
        if numerator == 0 || denominator == 0 {
            return Err(AlphacutError::InvalidArgument(format!(
                "frame rate {numerator}/{denominator} must be positive"
            )));
        }
        let divisor = gcd(numerator, denominator);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    /// A whole-number frame rate.
    pub fn from_integer(frames_per_second: u32) -> Result<Self, AlphacutError> {
        Self::new(frames_per_second, 1)
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// The rate as frames per second.
    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Formats as `num/den`, the form FFmpeg's `-framerate` option accepts.
impl Display for FrameRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Metadata for the source video stream.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Frame width in pixels. Always positive.
    pub width: u32,
    /// Frame height in pixels. Always positive.
    pub height: u32,
    /// Rational frame rate. Always positive.
    pub frame_rate: FrameRate,
    /// Container duration; zero when the container does not declare one.
    pub duration: Duration,
    /// Frame count declared by the container, if any. Never trusted as the
    /// real number of frames.
    pub nominal_frame_count: Option<u64>,
    /// Codec name (e.g. `"h264"`, `"vp9"`).
    pub codec: String,
}

impl VideoMetadata {
    /// Build metadata, checking the dimension invariants.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::InvalidArgument`] when width or height is zero.
    pub fn new(
        width: u32,
        height: u32,
        frame_rate: FrameRate,
        duration: Duration,
        nominal_frame_count: Option<u64>,
    ) -> Result<Self, AlphacutError> {
        if width == 0 || height == 0 {
            return Err(AlphacutError::InvalidArgument(format!(
                "video dimensions {width}x{height} must be positive"
            )));
        }
        Ok(Self {
            width,
            height,
            frame_rate,
            duration,
            nominal_frame_count,
            codec: String::from("unknown"),
        })
    }

    /// Frames per second as a float.
    pub fn frames_per_second(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    /// Duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// One-line human summary used in progress messages.
    pub fn summary(&self) -> String {
        format!(
            "Video: {}x{}, {:.3} fps, {:.2}s",
            self.width,
            self.height,
            self.frames_per_second(),
            self.duration_seconds(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_is_reduced() {
        let rate = FrameRate::new(60, 2).unwrap();
        assert_eq!(rate.numerator(), 30);
        assert_eq!(rate.denominator(), 1);
        assert_eq!(rate.to_string(), "30/1");
    }

    #[test]
    fn ntsc_rate_keeps_rational_form() {
        let rate = FrameRate::new(30000, 1001).unwrap();
        assert_eq!(rate.to_string(), "30000/1001");
        assert!((rate.as_f64() - 29.97).abs() < 0.01);
    }

    #[test]
    fn zero_rate_rejected() {
        assert!(FrameRate::new(0, 1).is_err());
        assert!(FrameRate::new(25, 0).is_err());
    }

    #[test]
    fn zero_dimensions_rejected() {
        let rate = FrameRate::from_integer(30).unwrap();
        assert!(VideoMetadata::new(0, 720, rate, Duration::ZERO, None).is_err());
        assert!(VideoMetadata::new(1280, 0, rate, Duration::ZERO, None).is_err());
    }
}
