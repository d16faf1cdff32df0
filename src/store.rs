//! Persistence of matted frames as a numbered PNG sequence.
//!
//! Files are named `frame_00000.png`, `frame_00001.png`, ... inside the run's
//! [`TempRun`] directory. Encoders read them back through the printf-style
//! pattern returned by [`FrameStore::input_pattern`], which requires the
//! indices to be contiguous from zero. The store enforces that: a frame with
//! any index other than the next expected one is rejected.

use std::path::{Path, PathBuf};

use image::ImageFormat;

use crate::cleanup::{CleanupReport, TempRun};
use crate::error::AlphacutError;
use crate::frame::MattedFrame;

/// One persisted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStoreEntry {
    pub index: u64,
    pub path: PathBuf,
}

/// File name for the frame at `index`.
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:05}.png")
}

/// Writes matted frames, in order, into a per-run directory.
#[derive(Debug)]
pub struct FrameStore {
    run: TempRun,
    count: u64,
}

impl FrameStore {
    /// Create a store in a fresh unique directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::Storage`] if the directory cannot be created.
    pub fn create(root: &Path) -> Result<Self, AlphacutError> {
        Ok(Self {
            run: TempRun::create(root)?,
            count: 0,
        })
    }

    /// Persist `frame` as the next entry of the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::Storage`] if the frame is out of sequence or
    /// cannot be written. Either leaves a gap, so the run must stop.
    pub fn write(&mut self, frame: &MattedFrame) -> Result<FrameStoreEntry, AlphacutError> {
        let path = self.run.path().join(frame_file_name(frame.index));
        if frame.index != self.count {
            return Err(AlphacutError::Storage {
                path,
                reason: format!(
                    "frame {} arrived out of sequence, expected frame {}",
                    frame.index, self.count
                ),
            });
        }

        frame
            .image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|error| AlphacutError::Storage {
                path: path.clone(),
                reason: error.to_string(),
            })?;

        self.count += 1;
        Ok(FrameStoreEntry {
            index: frame.index,
            path,
        })
    }

    /// Number of frames persisted so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn dir(&self) -> &Path {
        self.run.path()
    }

    /// The encoder input pattern, `<dir>/frame_%05d.png`.
    pub fn input_pattern(&self) -> PathBuf {
        self.run.path().join("frame_%05d.png")
    }

    /// Entries written so far, in index order.
    pub fn entries(&self) -> impl Iterator<Item = FrameStoreEntry> + '_ {
        (0..self.count).map(|index| FrameStoreEntry {
            index,
            path: self.run.path().join(frame_file_name(index)),
        })
    }

    /// Remove the persisted frames and the directory.
    pub fn cleanup(&mut self) -> CleanupReport {
        self.run.cleanup()
    }
}
