//! Per-run temporary directories and best-effort cleanup.
//!
//! A [`TempRun`] is acquired once, when the frame store is created, and owns
//! a uniquely named directory under the temp root. Releasing it removes every
//! file and then the directory. Failures are collected as
//! [`CleanupWarning`]s and logged; they never fail a run.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::AlphacutError;

const RUN_DIR_PREFIX: &str = "alphacut-frames-";

/// A path that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not remove {}: {}", self.path.display(), self.reason)
    }
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A uniquely named working directory scoped to one pipeline run.
///
/// Dropping a `TempRun` that was never cleaned up cleans it up.
#[derive(Debug)]
pub struct TempRun {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl TempRun {
    /// Create a fresh directory under `root`, creating `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::Storage`] if either directory cannot be
    /// created.
    pub fn create(root: &Path) -> Result<Self, AlphacutError> {
        let storage = |reason: std::io::Error| AlphacutError::Storage {
            path: root.to_path_buf(),
            reason: reason.to_string(),
        };
        fs::create_dir_all(root).map_err(storage)?;
        let dir = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(root)
            .map_err(storage)?;
        let path = dir.path().to_path_buf();
        log::debug!("Created temporary frame directory {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove every file in the directory, then the directory itself.
    ///
    /// Safe to call any number of times and on a partially deleted directory.
    pub fn cleanup(&mut self) -> CleanupReport {
        let report = match self.dir.take() {
            Some(dir) => {
                let mut report = remove_entries(dir.path());
                if let Err(error) = dir.close() {
                    if error.kind() != ErrorKind::NotFound {
                        report.warnings.push(CleanupWarning {
                            path: self.path.clone(),
                            reason: error.to_string(),
                        });
                    }
                }
                report
            }
            None => cleanup_dir(&self.path),
        };
        log_report(&self.path, &report);
        report
    }
}

impl Drop for TempRun {
    fn drop(&mut self) {
        if self.dir.is_some() {
            self.cleanup();
        }
    }
}

/// Best-effort removal of `dir` and its contents. A missing directory is
/// already clean.
pub fn cleanup_dir(dir: &Path) -> CleanupReport {
    let mut report = remove_entries(dir);
    match fs::remove_dir(dir) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => report.warnings.push(CleanupWarning {
            path: dir.to_path_buf(),
            reason: error.to_string(),
        }),
    }
    report
}

fn remove_entries(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return report,
        Err(error) => {
            report.warnings.push(CleanupWarning {
                path: dir.to_path_buf(),
                reason: error.to_string(),
            });
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().is_ok_and(|kind| kind.is_dir());
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => report.removed_files += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => report.warnings.push(CleanupWarning {
                path,
                reason: error.to_string(),
            }),
        }
    }
    report
}

fn log_report(dir: &Path, report: &CleanupReport) {
    for warning in &report.warnings {
        log::warn!("Cleanup: {warning}");
    }
    log::debug!(
        "Removed {} files from {}",
        report.removed_files,
        dir.display()
    );
}
