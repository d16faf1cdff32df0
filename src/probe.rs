//! Source container probing.
//!
//! [`MediaProbe`] opens the container, locates the best video stream and
//! reads its dimensions, rational frame rate, duration, and declared frame
//! count. It runs before any frame work, so its two failure modes
//! ([`AlphacutError::MediaRead`] and [`AlphacutError::NoVideoStream`]) abort a
//! run before extraction starts.
//!
//! # Example
//!
//! ```no_run
//! use alphacut::MediaProbe;
//!
//! let metadata = MediaProbe::probe("input.mp4")?;
//! println!("{}x{} @ {}", metadata.width, metadata.height, metadata.frame_rate);
//! # Ok::<(), alphacut::AlphacutError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{Rational, codec::context::Context as CodecContext, format::context::Input, media::Type};

use crate::error::AlphacutError;
use crate::metadata::{FrameRate, VideoMetadata};

/// Lightweight container probe.
pub struct MediaProbe;

impl MediaProbe {
    /// Probe a media file and return its video metadata.
    ///
    /// # Errors
    ///
    /// - [`AlphacutError::MediaRead`] if FFmpeg cannot open the file or the
    ///   stream declares no usable frame rate or dimensions.
    /// - [`AlphacutError::NoVideoStream`] if the container has no video.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<VideoMetadata, AlphacutError> {
        let (_, _, metadata) = open_video(path.as_ref())?;
        Ok(metadata)
    }
}

/// Open `path`, returning the demuxer, the video stream index, and metadata.
pub(crate) fn open_video(path: &Path) -> Result<(Input, usize, VideoMetadata), AlphacutError> {
    let media_read = |reason: String| AlphacutError::MediaRead {
        path: path.to_path_buf(),
        reason,
    };

    crate::ffmpeg::init().map_err(|error| media_read(format!("FFmpeg initialisation failed: {error}")))?;

    let input = ffmpeg_next::format::input(&path).map_err(|error| media_read(error.to_string()))?;

    let stream = input
        .streams()
        .best(Type::Video)
        .ok_or_else(|| AlphacutError::NoVideoStream {
            path: path.to_path_buf(),
        })?;
    let stream_index = stream.index();

    let decoder = CodecContext::from_parameters(stream.parameters())
        .and_then(|context| context.decoder().video())
        .map_err(|error| media_read(format!("Failed to open video decoder: {error}")))?;

    let frame_rate = rational_frame_rate(stream.avg_frame_rate())
        .or_else(|| rational_frame_rate(stream.rate()))
        .ok_or_else(|| media_read("video stream declares no frame rate".to_string()))?;

    let duration = match input.duration() {
        micros if micros > 0 => Duration::from_micros(micros as u64),
        _ => Duration::ZERO,
    };

    let nominal_frame_count = match stream.frames() {
        count if count > 0 => Some(count as u64),
        _ if !duration.is_zero() => Some((duration.as_secs_f64() * frame_rate.as_f64()).round() as u64),
        _ => None,
    };

    let mut metadata = VideoMetadata::new(
        decoder.width(),
        decoder.height(),
        frame_rate,
        duration,
        nominal_frame_count,
    )
    .map_err(|error| media_read(error.to_string()))?;
    metadata.codec = decoder
        .codec()
        .map(|codec| codec.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    log::debug!(
        "Probed {}: {}x{} @ {} ({:?} nominal frames, codec {})",
        path.display(),
        metadata.width,
        metadata.height,
        metadata.frame_rate,
        metadata.nominal_frame_count,
        metadata.codec,
    );

    Ok((input, stream_index, metadata))
}

fn rational_frame_rate(rate: Rational) -> Option<FrameRate> {
    let (numerator, denominator) = (rate.numerator(), rate.denominator());
    if numerator <= 0 || denominator <= 0 {
        return None;
    }
    FrameRate::new(numerator as u32, denominator as u32).ok()
}
