//! Encoding the persisted frame sequence into alpha-capable outputs.
//!
//! Every requested [`OutputFormat`] becomes one [`EncodeJob`]. A job tries an
//! ordered list of [`CodecProfile`]s through the external `ffmpeg` program,
//! stopping at the first one that exits cleanly and leaves a non-empty
//! output file:
//!
//! | Format | Attempts                                   |
//! |--------|--------------------------------------------|
//! | `webm` | VP9 with `yuva420p`                        |
//! | `mov`  | ProRes 4444, then QuickTime Animation      |
//! | `gif`  | palette filter graph, then plain fps resample |
//!
//! Jobs are isolated: one failing format is recorded on its job and never
//! stops the others. Every process runs under a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use alphacut::{EncodeOptions, EncodeOrchestrator, FrameRate, OutputRequest};
//!
//! let requests: Vec<OutputRequest> = vec!["webm=out.webm".parse()?, "gif=out.gif".parse()?];
//! let orchestrator = EncodeOrchestrator::new(EncodeOptions::new());
//! let jobs = orchestrator.run(
//!     Path::new("/tmp/frames/frame_%05d.png"),
//!     FrameRate::new(30000, 1001)?,
//!     &requests,
//! );
//! for job in &jobs {
//!     println!("{}: {:?}", job.format, job.status);
//! }
//! # Ok::<(), alphacut::AlphacutError>(())
//! ```

use std::ffi::OsString;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::AlphacutError;
use crate::metadata::FrameRate;
use crate::process::{self, ProcessFailure};
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback, ProgressEvent, Step};

/// A requested output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Webm,
    Mov,
    Gif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Webm, OutputFormat::Mov, OutputFormat::Gif];

    /// The lowercase tag used on the command line and in progress messages.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
            OutputFormat::Gif => "gif",
        }
    }

    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = AlphacutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "webm" => Ok(OutputFormat::Webm),
            "mov" => Ok(OutputFormat::Mov),
            "gif" => Ok(OutputFormat::Gif),
            _ => Err(AlphacutError::UnsupportedFormat(format!(
                "'{value}' (expected webm, mov or gif)"
            ))),
        }
    }
}

/// One output the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRequest {
    pub format: OutputFormat,
    pub path: PathBuf,
}

impl OutputRequest {
    pub fn new(format: OutputFormat, path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            path: path.into(),
        }
    }
}

/// Parses `FORMAT=PATH`, e.g. `gif=preview.gif`.
impl FromStr for OutputRequest {
    type Err = AlphacutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (format, path) = value.split_once('=').ok_or_else(|| {
            AlphacutError::InvalidArgument(format!("'{value}' is not of the form FORMAT=PATH"))
        })?;
        if path.is_empty() {
            return Err(AlphacutError::InvalidArgument(format!(
                "'{value}' has an empty output path"
            )));
        }
        Ok(Self::new(format.parse()?, path))
    }
}

/// Which MOV profile is tried first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovProfile {
    /// 10-bit 4:4:4:4 ProRes. Small files; missing from minimal ffmpeg builds.
    #[default]
    ProRes4444,
    /// Lossless ARGB QuickTime Animation. Large files; always available.
    Qtrle,
}

impl MovProfile {
    fn codec_profile(self) -> CodecProfile {
        match self {
            MovProfile::ProRes4444 => CodecProfile::ProRes4444,
            MovProfile::Qtrle => CodecProfile::Qtrle,
        }
    }

    fn other(self) -> MovProfile {
        match self {
            MovProfile::ProRes4444 => MovProfile::Qtrle,
            MovProfile::Qtrle => MovProfile::ProRes4444,
        }
    }
}

impl FromStr for MovProfile {
    type Err = AlphacutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prores" | "prores4444" => Ok(MovProfile::ProRes4444),
            "qtrle" => Ok(MovProfile::Qtrle),
            _ => Err(AlphacutError::InvalidArgument(format!(
                "unknown MOV profile '{value}' (expected prores or qtrle)"
            ))),
        }
    }
}

/// A fixed codec, pixel format and flag combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecProfile {
    /// VP9 with an alpha plane. Alt-ref frames are disabled because they
    /// break alpha; quality is CRF-driven with unconstrained bitrate.
    Vp9Alpha { crf: u8 },
    ProRes4444,
    Qtrle,
    /// Resample, generate a palette with a transparent entry, then dither.
    GifPalette { fps: FrameRate },
    /// Resample only.
    GifSimple { fps: FrameRate },
}

impl CodecProfile {
    /// Short name used in logs and job attempts.
    pub fn name(&self) -> &'static str {
        match self {
            CodecProfile::Vp9Alpha { .. } => "vp9-alpha",
            CodecProfile::ProRes4444 => "prores-4444",
            CodecProfile::Qtrle => "qtrle",
            CodecProfile::GifPalette { .. } => "gif-palette",
            CodecProfile::GifSimple { .. } => "gif-simple",
        }
    }

    /// The ffmpeg output arguments for this profile.
    pub fn args(&self) -> Vec<String> {
        match self {
            CodecProfile::Vp9Alpha { crf } => vec![
                "-c:v".into(),
                "libvpx-vp9".into(),
                "-pix_fmt".into(),
                "yuva420p".into(),
                "-auto-alt-ref".into(),
                "0".into(),
                "-lossless".into(),
                "0".into(),
                "-crf".into(),
                crf.to_string(),
                "-b:v".into(),
                "0".into(),
                "-metadata:s:v:0".into(),
                "alpha_mode=1".into(),
            ],
            CodecProfile::ProRes4444 => vec![
                "-c:v".into(),
                "prores_ks".into(),
                "-profile:v".into(),
                "4444".into(),
                "-pix_fmt".into(),
                "yuva444p10le".into(),
                "-vendor".into(),
                "apl0".into(),
            ],
            CodecProfile::Qtrle => vec![
                "-c:v".into(),
                "qtrle".into(),
                "-pix_fmt".into(),
                "argb".into(),
            ],
            CodecProfile::GifPalette { fps } => vec![
                "-vf".into(),
                format!(
                    "fps={fps},scale=iw:ih:flags=lanczos,split[s0][s1];\
                     [s0]palettegen=max_colors=256:reserve_transparent=1[p];\
                     [s1][p]paletteuse=dither=bayer:bayer_scale=5:diff_mode=rectangle"
                ),
                "-gifflags".into(),
                "+transdiff".into(),
            ],
            CodecProfile::GifSimple { fps } => vec!["-vf".into(), format!("fps={fps}")],
        }
    }
}

impl Display for CodecProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// GIF output rate: the source rate, capped at `ceiling` frames per second.
pub fn gif_frame_rate(source: FrameRate, ceiling: u32) -> Result<FrameRate, AlphacutError> {
    let cap = FrameRate::from_integer(ceiling)?;
    Ok(if source.as_f64() <= cap.as_f64() { source } else { cap })
}

/// Full argument list for one encoder invocation.
pub fn command_args(
    profile: &CodecProfile,
    frame_rate: FrameRate,
    input_pattern: &Path,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-framerate"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(frame_rate.to_string().into());
    args.push("-i".into());
    args.push(input_pattern.as_os_str().to_owned());
    args.extend(profile.args().into_iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// The ffmpeg executable (default `ffmpeg`, looked up on `PATH`).
    pub program: PathBuf,
    /// Per-process timeout (default 30 minutes).
    pub timeout: Duration,
    /// WebM constant rate factor, 0..=63 (default 30).
    pub crf: u8,
    /// GIF frame-rate ceiling (default 15).
    pub gif_max_fps: u32,
    /// MOV profile tried first.
    pub mov_profile: MovProfile,
    /// Whether the other MOV profile is tried when the first fails.
    pub mov_fallback: bool,
    /// Run jobs concurrently (default true).
    pub parallel: bool,
    /// Bytes of encoder stderr kept per failed attempt.
    pub max_diagnostic_bytes: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout: Duration::from_secs(30 * 60),
            crf: 30,
            gif_max_fps: 15,
            mov_profile: MovProfile::default(),
            mov_fallback: true,
            parallel: true,
            max_diagnostic_bytes: 2000,
        }
    }
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    #[must_use]
    pub fn with_gif_max_fps(mut self, fps: u32) -> Self {
        self.gif_max_fps = fps;
        self
    }

    #[must_use]
    pub fn with_mov_profile(mut self, profile: MovProfile) -> Self {
        self.mov_profile = profile;
        self
    }

    #[must_use]
    pub fn with_mov_fallback(mut self, enabled: bool) -> Self {
        self.mov_fallback = enabled;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn with_max_diagnostic_bytes(mut self, bytes: usize) -> Self {
        self.max_diagnostic_bytes = bytes;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`AlphacutError::InvalidArgument`] naming the bad option.
    pub fn validate(&self) -> Result<(), AlphacutError> {
        if self.crf > 63 {
            return Err(AlphacutError::InvalidArgument(format!(
                "crf {} is outside 0..=63",
                self.crf
            )));
        }
        if self.gif_max_fps == 0 {
            return Err(AlphacutError::InvalidArgument(
                "GIF frame-rate ceiling must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AlphacutError::InvalidArgument(
                "encode timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The ordered profiles tried for `format`.
    pub fn profiles_for(&self, format: OutputFormat, frame_rate: FrameRate) -> Result<Vec<CodecProfile>, AlphacutError> {
        Ok(match format {
            OutputFormat::Webm => vec![CodecProfile::Vp9Alpha { crf: self.crf }],
            OutputFormat::Mov => {
                let mut profiles = vec![self.mov_profile.codec_profile()];
                if self.mov_fallback {
                    profiles.push(self.mov_profile.other().codec_profile());
                }
                profiles
            }
            OutputFormat::Gif => {
                let fps = gif_frame_rate(frame_rate, self.gif_max_fps)?;
                vec![CodecProfile::GifPalette { fps }, CodecProfile::GifSimple { fps }]
            }
        })
    }
}

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One profile tried by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeAttempt {
    pub profile: CodecProfile,
    pub succeeded: bool,
    /// Exit status and stderr tail when the attempt failed.
    pub diagnostic: Option<String>,
}

/// The encode work for one requested output.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub format: OutputFormat,
    pub output: PathBuf,
    pub status: JobStatus,
    /// Profiles still to try, in order.
    pub profiles: Vec<CodecProfile>,
    pub attempts: Vec<EncodeAttempt>,
    /// Why the job failed, once it has.
    pub diagnostic: Option<String>,
}

impl EncodeJob {
    pub fn new(request: &OutputRequest, profiles: Vec<CodecProfile>) -> Self {
        Self {
            format: request.format,
            output: request.path.clone(),
            status: JobStatus::Pending,
            profiles,
            attempts: Vec::new(),
            diagnostic: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// The profile that produced the output, if any.
    pub fn profile_used(&self) -> Option<CodecProfile> {
        self.attempts
            .iter()
            .find(|attempt| attempt.succeeded)
            .map(|attempt| attempt.profile)
    }

    /// The failure as an error value, for callers that want one.
    pub fn error(&self) -> Option<AlphacutError> {
        (self.status == JobStatus::Failed).then(|| AlphacutError::Encode {
            format: self.format,
            reason: self
                .diagnostic
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string()),
        })
    }

    fn fail(&mut self, reason: String) {
        log::warn!("Encoding {} to {} failed: {reason}", self.format, self.output.display());
        self.status = JobStatus::Failed;
        self.diagnostic = Some(reason);
    }
}

/// Runs one isolated job per requested output.
pub struct EncodeOrchestrator {
    options: EncodeOptions,
    progress: Arc<dyn ProgressCallback>,
    cancellation: Option<CancellationToken>,
}

impl EncodeOrchestrator {
    pub fn new(options: EncodeOptions) -> Self {
        Self {
            options,
            progress: Arc::new(NoOpProgress),
            cancellation: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Encode `input_pattern` at `frame_rate` into every requested output.
    ///
    /// Never fails as a whole: each job carries its own status. Emits
    /// `step4` events: `0/N` up front, then one per finished job.
    pub fn run(&self, input_pattern: &Path, frame_rate: FrameRate, requests: &[OutputRequest]) -> Vec<EncodeJob> {
        let mut jobs: Vec<EncodeJob> = requests
            .iter()
            .map(|request| match self.options.profiles_for(request.format, frame_rate) {
                Ok(profiles) => EncodeJob::new(request, profiles),
                Err(error) => {
                    let mut job = EncodeJob::new(request, Vec::new());
                    job.fail(error.to_string());
                    job
                }
            })
            .collect();

        let total = jobs.len() as u64;
        let finished = Mutex::new(0_u64);
        self.progress.on_progress(&ProgressEvent::new(
            Step::Encoding,
            format!("Encoding {total} output format(s)..."),
            Some(0),
            Some(total),
        ));

        let run_one = |job: &mut EncodeJob| {
            if job.status == JobStatus::Pending {
                self.report_started(job, &finished, total);
                self.run_job(job, input_pattern, frame_rate);
            }
            self.report_finished(job, &finished, total);
        };
        let run_one = &run_one;

        if self.options.parallel && jobs.len() > 1 {
            thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .iter_mut()
                    .map(|job| scope.spawn(move || run_one(job)))
                    .collect();
                for handle in handles {
                    if handle.join().is_err() {
                        log::warn!("An encode thread panicked");
                    }
                }
            });
        } else {
            jobs.iter_mut().for_each(run_one);
        }

        for job in &mut jobs {
            if job.status == JobStatus::Running {
                job.fail("encoder thread panicked".to_string());
            }
        }
        jobs
    }

    fn report_started(&self, job: &EncodeJob, finished: &Mutex<u64>, total: u64) {
        let done = finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.progress.on_progress(&ProgressEvent::new(
            Step::Encoding,
            format!("Encoding {} to {}...", job.format, job.output.display()),
            Some(*done),
            Some(total),
        ));
    }

    fn report_finished(&self, job: &EncodeJob, finished: &Mutex<u64>, total: u64) {
        let mut done = finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *done += 1;
        let message = if job.succeeded() {
            format!("Encoded {} ({}/{total})", job.format, *done)
        } else {
            format!("Failed to encode {} ({}/{total})", job.format, *done)
        };
        self.progress
            .on_progress(&ProgressEvent::new(Step::Encoding, message, Some(*done), Some(total)));
    }

    fn run_job(&self, job: &mut EncodeJob, input_pattern: &Path, frame_rate: FrameRate) {
        self.try_profiles(job, input_pattern, frame_rate);
        // Any attempt ran with `-y`, so whatever sits at the output path now is ours.
        if job.status == JobStatus::Failed && !job.attempts.is_empty() {
            discard_partial_output(&job.output);
        }
    }

    fn try_profiles(&self, job: &mut EncodeJob, input_pattern: &Path, frame_rate: FrameRate) {
        job.status = JobStatus::Running;

        if let Some(parent) = job.output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            if let Err(error) = fs::create_dir_all(parent) {
                job.fail(format!("cannot create {}: {error}", parent.display()));
                return;
            }
        }

        let profiles = job.profiles.clone();
        for (position, profile) in profiles.iter().enumerate() {
            if self.is_cancelled() {
                job.fail("cancelled".to_string());
                return;
            }

            let attempt = self.attempt(profile, frame_rate, input_pattern, &job.output);
            let succeeded = attempt.succeeded;
            let diagnostic = attempt.diagnostic.clone();
            job.attempts.push(attempt);

            if succeeded {
                log::info!(
                    "Encoded {} with {profile} to {}",
                    job.format,
                    job.output.display()
                );
                job.status = JobStatus::Succeeded;
                return;
            }

            let reason = diagnostic.unwrap_or_default();
            match profiles.get(position + 1) {
                Some(next) => log::warn!(
                    "{} profile {profile} failed, falling back to {next}: {reason}",
                    job.format
                ),
                None => {
                    job.fail(format!("{profile}: {reason}"));
                    return;
                }
            }
        }

        if job.status == JobStatus::Running {
            job.fail("no codec profile available".to_string());
        }
    }

    fn attempt(&self, profile: &CodecProfile, frame_rate: FrameRate, input_pattern: &Path, output: &Path) -> EncodeAttempt {
        let args = command_args(profile, frame_rate, input_pattern, output);
        log::debug!(
            "Running {} {}",
            self.options.program.display(),
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(&self.options.program);
        command.args(&args);
        let limit = self.options.max_diagnostic_bytes;
        let result = process::run_bounded(
            &mut command,
            None,
            self.options.timeout,
            self.cancellation.as_ref(),
        );

        let diagnostic = match result {
            Ok(finished) if finished.success() => match fs::metadata(output) {
                Ok(metadata) if metadata.len() > 0 => None,
                Ok(_) => Some("encoder exited cleanly but wrote an empty file".to_string()),
                Err(error) => Some(format!("encoder exited cleanly but left no output: {error}")),
            },
            Ok(finished) => Some(format!(
                "{}: {}",
                finished.status,
                process::truncate_diagnostic(&finished.stderr, limit)
            )),
            Err(ProcessFailure::TimedOut { stderr, timeout, .. }) => Some(format!(
                "timed out after {timeout:?}: {}",
                process::truncate_diagnostic(&stderr, limit)
            )),
            Err(failure) => Some(failure.to_string()),
        };

        EncodeAttempt {
            profile: *profile,
            succeeded: diagnostic.is_none(),
            diagnostic,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Remove what a failed job left at its output path.
fn discard_partial_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => log::warn!("Removed partial output {}", output.display()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => log::warn!("Could not remove partial output {}: {error}", output.display()),
    }
}
