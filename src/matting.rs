//! Matting execution strategies.
//!
//! [`MattingStage`] drives a [`MatteBackend`] over a stream of frames and
//! hands the results to a sink strictly in index order. It supports two
//! strategies:
//!
//! - [`MattingStrategy::Sequential`] mattes one frame at a time on the
//!   calling thread.
//! - [`MattingStrategy::Parallel`] dispatches frames to a bounded `rayon`
//!   pool. At most `2 × workers` frames are in flight, and a
//!   [`ReorderBuffer`] releases finished frames in index order, so the sink
//!   sees exactly the sequence the sequential strategy would produce.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};

use crate::error::AlphacutError;
use crate::frame::{Frame, MattedFrame};
use crate::matte::{MatteBackend, MattePolicy};
use crate::progress::CancellationToken;

/// How frames are scheduled onto the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MattingStrategy {
    #[default]
    Sequential,
    /// Up to `workers` backend calls run concurrently.
    Parallel { workers: usize },
}

impl MattingStrategy {
    /// `Sequential` for one worker, `Parallel` otherwise.
    pub fn with_workers(workers: usize) -> Self {
        if workers <= 1 {
            MattingStrategy::Sequential
        } else {
            MattingStrategy::Parallel { workers }
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            MattingStrategy::Sequential => 1,
            MattingStrategy::Parallel { workers } => *workers,
        }
    }
}

/// Outcome of a matting pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MattingReport {
    /// Frames handed to the sink.
    pub frames: u64,
    /// Indices replaced by transparent placeholders.
    pub placeholders: Vec<u64>,
}

/// Holds out-of-order results until the next expected index arrives.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(first_index: u64) -> Self {
        Self {
            next: first_index,
            pending: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, index: u64, item: T) {
        self.pending.insert(index, item);
    }

    /// Remove and return the item for the next expected index, if present.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let item = self.pending.remove(&self.next)?;
        let index = self.next;
        self.next += 1;
        Some((index, item))
    }

    /// Index the buffer is waiting for.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A finished backend call, keyed by stream position.
struct Completed {
    position: u64,
    frame_index: u64,
    dimensions: (u32, u32),
    result: Result<MattedFrame, AlphacutError>,
}

/// Runs a backend over a frame stream with a failure policy.
pub struct MattingStage {
    backend: Arc<dyn MatteBackend>,
    strategy: MattingStrategy,
    policy: MattePolicy,
    cancellation: Option<CancellationToken>,
}

impl MattingStage {
    pub fn new(backend: Arc<dyn MatteBackend>, strategy: MattingStrategy, policy: MattePolicy) -> Self {
        Self {
            backend,
            strategy,
            policy,
            cancellation: None,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Matte every frame of `frames`, passing results to `sink` in order.
    ///
    /// # Errors
    ///
    /// - [`AlphacutError::Matting`] on the first failing frame under
    ///   [`MattePolicy::Abort`].
    /// - [`AlphacutError::Cancelled`] if the token fires.
    /// - Any error returned by `sink`.
    pub fn run<I, S>(&self, frames: I, mut sink: S) -> Result<MattingReport, AlphacutError>
    where
        I: IntoIterator<Item = Frame>,
        S: FnMut(MattedFrame) -> Result<(), AlphacutError>,
    {
        log::info!(
            "Matting with backend '{}' ({:?}, policy {:?})",
            self.backend.name(),
            self.strategy,
            self.policy,
        );
        match self.strategy {
            MattingStrategy::Sequential => self.run_sequential(frames, &mut sink),
            MattingStrategy::Parallel { workers } => self.run_parallel(frames, workers.max(1), &mut sink),
        }
    }

    fn run_sequential<I, S>(&self, frames: I, sink: &mut S) -> Result<MattingReport, AlphacutError>
    where
        I: IntoIterator<Item = Frame>,
        S: FnMut(MattedFrame) -> Result<(), AlphacutError>,
    {
        let mut report = MattingReport::default();
        for frame in frames {
            self.check_cancelled()?;
            let completed = Completed {
                position: report.frames,
                frame_index: frame.index,
                dimensions: frame.dimensions(),
                result: call_backend(self.backend.as_ref(), &frame),
            };
            drop(frame);
            let matted = self.resolve(completed, &mut report)?;
            sink(matted)?;
            report.frames += 1;
        }
        Ok(report)
    }

    fn run_parallel<I, S>(&self, frames: I, workers: usize, sink: &mut S) -> Result<MattingReport, AlphacutError>
    where
        I: IntoIterator<Item = Frame>,
        S: FnMut(MattedFrame) -> Result<(), AlphacutError>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("alphacut-matte-{index}"))
            .build()
            .map_err(|error| AlphacutError::WorkerPool(error.to_string()))?;

        let window = workers * 2;
        let (sender, receiver) = mpsc::channel::<Completed>();
        let mut frames = frames.into_iter();
        let mut exhausted = false;
        let mut dispatched = 0_u64;
        let mut in_flight = 0_usize;
        let mut buffer = ReorderBuffer::new(0);
        let mut report = MattingReport::default();

        let outcome = 'run: loop {
            // Frames waiting in the reorder buffer count against the window.
            while !exhausted && in_flight + buffer.len() < window {
                if let Err(error) = self.check_cancelled() {
                    break 'run Err(error);
                }
                let Some(frame) = frames.next() else {
                    exhausted = true;
                    break;
                };
                let backend = Arc::clone(&self.backend);
                let sender = sender.clone();
                let position = dispatched;
                pool.spawn(move || {
                    let completed = Completed {
                        position,
                        frame_index: frame.index,
                        dimensions: frame.dimensions(),
                        result: call_backend(backend.as_ref(), &frame),
                    };
                    // The receiver is gone only when the run already failed.
                    let _ = sender.send(completed);
                });
                dispatched += 1;
                in_flight += 1;
            }

            if in_flight == 0 {
                break Ok(());
            }

            let Ok(completed) = receiver.recv() else {
                break Err(AlphacutError::WorkerPool("matting workers disconnected".to_string()));
            };
            in_flight -= 1;
            buffer.insert(completed.position, completed);

            while let Some((_, completed)) = buffer.pop_ready() {
                let delivered = self
                    .resolve(completed, &mut report)
                    .and_then(|matted| sink(matted));
                if let Err(error) = delivered {
                    break 'run Err(error);
                }
                report.frames += 1;
            }
        };

        if let Err(error) = outcome {
            // No backend call may outlive the run.
            for _ in 0..in_flight {
                if receiver.recv().is_err() {
                    break;
                }
            }
            return Err(error);
        }

        log::debug!(
            "Parallel matting finished: {} frames, {} workers",
            report.frames,
            workers
        );
        Ok(report)
    }

    /// Apply the failure policy and the dimension invariant to one result.
    fn resolve(&self, completed: Completed, report: &mut MattingReport) -> Result<MattedFrame, AlphacutError> {
        let Completed {
            frame_index,
            dimensions,
            result,
            ..
        } = completed;

        let result = result.and_then(|matted| {
            if matted.dimensions() != dimensions || matted.index != frame_index {
                Err(AlphacutError::Matting {
                    frame_index,
                    reason: format!(
                        "backend returned frame {} at {:?}, expected frame {frame_index} at {dimensions:?}",
                        matted.index,
                        matted.dimensions(),
                    ),
                })
            } else {
                Ok(matted)
            }
        });

        match (result, self.policy) {
            (Ok(matted), _) => Ok(matted),
            (Err(AlphacutError::Cancelled), _) => Err(AlphacutError::Cancelled),
            (Err(error), MattePolicy::Abort) => Err(error),
            (Err(error), MattePolicy::TransparentPlaceholder) => {
                log::warn!("Substituting a transparent frame for frame {frame_index}: {error}");
                report.placeholders.push(frame_index);
                Ok(MattedFrame::transparent(frame_index, dimensions.0, dimensions.1))
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), AlphacutError> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(AlphacutError::Cancelled);
        }
        Ok(())
    }
}

/// Call the backend, turning a panic into a per-frame matting error.
fn call_backend(backend: &dyn MatteBackend, frame: &Frame) -> Result<MattedFrame, AlphacutError> {
    panic::catch_unwind(AssertUnwindSafe(|| backend.matte(frame))).unwrap_or_else(|_| {
        Err(AlphacutError::Matting {
            frame_index: frame.index,
            reason: format!("backend '{}' panicked", backend.name()),
        })
    })
}
