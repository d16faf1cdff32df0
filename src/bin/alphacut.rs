use std::{
    io,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, ValueEnum, error::ErrorKind};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::filter::LevelFilter;

use alphacut::{
    AlphacutError, CancellationToken, CommandBackend, ConstantAlpha, EncodeOptions, FfmpegLogLevel,
    JsonLinesProgress, MatteBackend, MattePolicy, MovProfile, OutputFormat, OutputRequest,
    Pipeline, PipelineOptions, ProgressCallback, ProgressEvent, RunSummary, Step, error_record,
};

const CLI_AFTER_HELP: &str = "Examples:\n  alphacut input.mp4 output.webm webm\n  alphacut input.mp4 output.mov mov --also gif=preview.gif --workers 4\n  alphacut input.mp4 output.gif gif --passthrough --progress bar\n\nExit codes: 0 success, 1 invalid input or fatal error, 2 no output could be encoded";

#[derive(Debug, Parser)]
#[command(
    name = "alphacut",
    version,
    about = "Remove the background from a video and write alpha-preserving WebM, MOV, or GIF",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    /// Source video.
    input: PathBuf,

    /// Output file for FORMAT.
    output: PathBuf,

    /// Output format: webm | mov | gif.
    format: String,

    /// Additional output in the same run (repeatable).
    #[arg(long, value_name = "FORMAT=PATH")]
    also: Vec<String>,

    /// Matting workers; 1 mattes sequentially.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// What to do when matting a single frame fails.
    #[arg(long, value_enum, default_value_t = MatteErrorMode::Abort)]
    on_matte_error: MatteErrorMode,

    /// Segmentation command: reads one PNG on stdin, writes one RGBA PNG on stdout.
    #[arg(long, default_value = "rembg i - -")]
    matte_command: String,

    /// Skip segmentation and keep every pixel opaque.
    #[arg(long, conflicts_with = "matte_command")]
    passthrough: bool,

    /// Per-frame timeout for the segmentation command, in seconds.
    #[arg(long, default_value_t = 120)]
    matte_timeout_secs: u64,

    /// Per-encoder timeout, in seconds.
    #[arg(long, default_value_t = 1800)]
    encode_timeout_secs: u64,

    /// WebM constant rate factor (0-63, lower is better).
    #[arg(long, default_value_t = 30)]
    crf: u8,

    /// GIF frame-rate ceiling.
    #[arg(long, default_value_t = 15)]
    gif_max_fps: u32,

    /// MOV profile tried first: prores | qtrle.
    #[arg(long, default_value = "prores")]
    mov_profile: String,

    /// Do not retry MOV with the other profile.
    #[arg(long)]
    no_mov_fallback: bool,

    /// The ffmpeg executable used for encoding.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Root for the per-run frame directory (default: system temp dir).
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Progress output: JSON lines on stdout, or a bar on stderr.
    #[arg(long, value_enum, default_value_t = ProgressMode::Json)]
    progress: ProgressMode,

    /// Log stage transitions to stderr.
    #[arg(long)]
    verbose: bool,

    /// Log debugging detail to stderr.
    #[arg(long)]
    debug: bool,

    /// FFmpeg library log level (quiet, fatal, error, warning, info, debug).
    #[arg(long, default_value = "error")]
    ffmpeg_log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MatteErrorMode {
    Abort,
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProgressMode {
    Json,
    Bar,
}

impl Cli {
    fn outputs(&self) -> Result<Vec<OutputRequest>, AlphacutError> {
        let mut outputs = vec![OutputRequest::new(
            self.format.parse::<OutputFormat>()?,
            self.output.clone(),
        )];
        for extra in &self.also {
            let request: OutputRequest = extra.parse()?;
            if outputs.iter().any(|output| output.path == request.path) {
                return Err(AlphacutError::InvalidArgument(format!(
                    "output path {} is requested twice",
                    request.path.display()
                )));
            }
            outputs.push(request);
        }
        Ok(outputs)
    }

    fn backend(&self, cancellation: &CancellationToken) -> Result<Arc<dyn MatteBackend>, AlphacutError> {
        if self.passthrough {
            return Ok(Arc::new(ConstantAlpha::opaque()));
        }
        Ok(Arc::new(
            CommandBackend::from_command_line(&self.matte_command)?
                .with_timeout(Duration::from_secs(self.matte_timeout_secs))
                .with_cancellation(cancellation.clone()),
        ))
    }

    fn options(&self, cancellation: &CancellationToken) -> Result<PipelineOptions, AlphacutError> {
        let encode = EncodeOptions::new()
            .with_program(self.ffmpeg.clone())
            .with_timeout(Duration::from_secs(self.encode_timeout_secs))
            .with_crf(self.crf)
            .with_gif_max_fps(self.gif_max_fps)
            .with_mov_profile(self.mov_profile.parse::<MovProfile>()?)
            .with_mov_fallback(!self.no_mov_fallback);

        let progress: Arc<dyn ProgressCallback> = match self.progress {
            ProgressMode::Json => Arc::new(JsonLinesProgress::new(io::stdout())),
            ProgressMode::Bar => Arc::new(BarProgress::new()?),
        };

        let mut options = PipelineOptions::new()
            .with_progress(progress)
            .with_cancellation(cancellation.clone())
            .with_workers(self.workers)
            .with_policy(match self.on_matte_error {
                MatteErrorMode::Abort => MattePolicy::Abort,
                MatteErrorMode::Placeholder => MattePolicy::TransparentPlaceholder,
            })
            .with_encode(encode);
        if let Some(root) = &self.temp_dir {
            options = options.with_temp_root(root.clone());
        }
        if self.workers == 0 {
            return Err(AlphacutError::InvalidArgument(
                "--workers must be at least 1".to_string(),
            ));
        }
        options.validate()?;
        Ok(options)
    }

    fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::DEBUG
        } else if self.verbose {
            LevelFilter::INFO
        } else {
            LevelFilter::WARN
        }
    }
}

/// Renders matting and encoding progress as a terminal bar on stderr.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self, AlphacutError> {
        let style = ProgressStyle::with_template("{spinner:.green} [{prefix}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|error| AlphacutError::InvalidArgument(error.to_string()))?;
        let bar = ProgressBar::new(0);
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        // Extraction interleaves with matting; only matting and encoding drive the bar.
        if matches!(event.step, Step::Matting | Step::Encoding) {
            if let (Some(progress), Some(total)) = (event.progress, event.total) {
                self.bar.set_prefix(event.step.tag());
                self.bar.set_length(total);
                self.bar.set_position(progress);
            }
        }
        if event.step != Step::Extraction {
            self.bar.set_message(event.message.clone());
        }
        if event.step == Step::Complete || event.is_error() {
            self.bar.finish_with_message(event.message.clone());
        }
    }
}

fn init_logging(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Cancel the run on Ctrl-C or SIGTERM so encoders are killed and the frame
/// directory is still removed.
fn install_interrupt_handler(token: &CancellationToken) {
    let token = token.clone();
    let installed = ctrlc::set_handler(move || {
        log::warn!("Interrupted, cancelling the run");
        token.cancel();
    });
    if let Err(error) = installed {
        log::warn!("Could not install the interrupt handler: {error}");
    }
}

fn print_error(message: &str) {
    println!("{}", error_record(message));
}

/// Clap's first error line, without its `error: ` prefix.
fn argument_error_message(error: &clap::Error) -> String {
    let rendered = error.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    let detail = first.strip_prefix("error: ").unwrap_or(first).trim();
    if detail.is_empty() {
        "Invalid arguments".to_string()
    } else {
        format!("Invalid arguments: {detail}")
    }
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    for job in summary.failed() {
        log::warn!(
            "{} output {} was not written: {}",
            job.format,
            job.output.display(),
            job.diagnostic.as_deref().unwrap_or("unknown failure")
        );
    }
    if summary.any_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            error.exit()
        }
        Err(error) => {
            print_error(&argument_error_message(&error));
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.log_level());

    let cancellation = CancellationToken::new();
    let prepared = cli.ffmpeg_log_level.parse::<FfmpegLogLevel>().and_then(|level| {
        alphacut::set_ffmpeg_log_level(level);
        Ok((
            cli.outputs()?,
            cli.backend(&cancellation)?,
            cli.options(&cancellation)?,
        ))
    });
    let (outputs, backend, options) = match prepared {
        Ok(prepared) => prepared,
        Err(error) => {
            print_error(&error.to_string());
            return ExitCode::FAILURE;
        }
    };

    install_interrupt_handler(&cancellation);

    let progress_mode = cli.progress;
    match Pipeline::new(backend, options).run(&cli.input, &outputs) {
        Ok(summary) => exit_code(&summary),
        Err(error) => {
            log::error!("{error}");
            // JSON mode already carried the failure on the event stream.
            if progress_mode == ProgressMode::Bar {
                print_error(&error.to_string());
            }
            ExitCode::FAILURE
        }
    }
}
