//! Streaming frame source.
//!
//! [`VideoFrames`] decodes the source video one frame at a time and yields
//! [`Frame`] values in index order. It never buffers more than the frame it
//! is about to hand out, so peak memory is independent of video length.
//!
//! This is the single place where decoder pixel layouts are normalised: the
//! FFmpeg scaler converts whatever the codec produces into packed RGB24.
//!
//! A decode failure part-way through ends the sequence early instead of
//! returning an error; the pipeline treats "fewer frames than the container
//! declared" as a normal outcome.
//!
//! # Example
//!
//! ```no_run
//! use alphacut::VideoFrames;
//!
//! let frames = VideoFrames::open("input.mp4")?;
//! println!("{}x{}", frames.metadata().width, frames.metadata().height);
//! for frame in frames {
//!     println!("decoded frame {}", frame.index);
//! }
//! # Ok::<(), alphacut::AlphacutError>(())
//! ```

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Error as FfmpegError, Packet,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;

use crate::error::AlphacutError;
use crate::frame::Frame;
use crate::metadata::VideoMetadata;
use crate::probe;

/// Consecutive demuxer read errors tolerated before the stream is treated as
/// ended.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 16;

/// A lazy, forward-only iterator over decoded RGB frames.
pub struct VideoFrames {
    path: PathBuf,
    input: Input,
    decoder: VideoDecoder,
    scaler: ScalingContext,
    stream_index: usize,
    metadata: VideoMetadata,
    next_index: u64,
    decoded: VideoFrame,
    scaled: VideoFrame,
    read_errors: u32,
    eof_sent: bool,
    done: bool,
}

impl VideoFrames {
    /// Probe and open `path` for sequential decoding.
    ///
    /// # Errors
    ///
    /// The probe errors of [`MediaProbe::probe`](crate::MediaProbe::probe),
    /// plus [`AlphacutError::MediaRead`] if no decoder or scaler can be built.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AlphacutError> {
        let path = path.as_ref();
        let (input, stream_index, metadata) = probe::open_video(path)?;
        let media_read = |reason: String| AlphacutError::MediaRead {
            path: path.to_path_buf(),
            reason,
        };

        let stream = input
            .stream(stream_index)
            .ok_or_else(|| AlphacutError::NoVideoStream {
                path: path.to_path_buf(),
            })?;
        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| media_read(format!("Failed to open video decoder: {error}")))?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            metadata.width,
            metadata.height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|error| media_read(format!("Failed to create RGB scaler: {error}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            input,
            decoder,
            scaler,
            stream_index,
            metadata,
            next_index: 0,
            decoded: VideoFrame::empty(),
            scaled: VideoFrame::empty(),
            read_errors: 0,
            eof_sent: false,
            done: false,
        })
    }

    /// Metadata read when the source was opened.
    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// Number of frames yielded so far.
    pub fn decoded_count(&self) -> u64 {
        self.next_index
    }

    fn end_early(&mut self, reason: impl std::fmt::Display) -> Option<Frame> {
        log::warn!(
            "Decoding {} stopped after {} frames: {reason}",
            self.path.display(),
            self.next_index,
        );
        self.done = true;
        None
    }

    fn convert_decoded(&mut self) -> Result<Frame, AlphacutError> {
        self.scaler.run(&self.decoded, &mut self.scaled)?;

        let (width, height) = (self.metadata.width, self.metadata.height);
        let buffer = packed_rgb(&self.scaled, width, height);
        let image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            AlphacutError::Ffmpeg("decoded frame buffer is smaller than expected".to_string())
        })?;

        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(frame)
    }
}

impl Iterator for VideoFrames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }

        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return match self.convert_decoded() {
                    Ok(frame) => Some(frame),
                    Err(error) => self.end_early(error),
                };
            }

            if self.eof_sent {
                self.done = true;
                log::debug!("Decoded {} frames from {}", self.next_index, self.path.display());
                return None;
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    self.read_errors = 0;
                    if packet.stream() == self.stream_index {
                        if let Err(error) = self.decoder.send_packet(&packet) {
                            return self.end_early(error);
                        }
                    }
                }
                Err(FfmpegError::Eof) => {
                    if let Err(error) = self.decoder.send_eof() {
                        return self.end_early(error);
                    }
                    self.eof_sent = true;
                }
                Err(error) => {
                    self.read_errors += 1;
                    if self.read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        return self.end_early(error);
                    }
                }
            }
        }
    }
}

/// Copy an RGB24 plane into a tightly packed buffer, dropping row padding.
fn packed_rgb(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = frame.stride(0);
    let row_len = width as usize * 3;
    let data = frame.data(0);

    if stride == row_len {
        return data[..row_len * height as usize].to_vec();
    }

    let mut buffer = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        buffer.extend_from_slice(&data[start..start + row_len]);
    }
    buffer
}
