//! Encode orchestration tests against a scripted stand-in for `ffmpeg`.
//!
//! Unix only: the stand-in is a shell script.

#![cfg(unix)]

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alphacut::{
    CodecProfile, EncodeOptions, EncodeOrchestrator, FrameRate, JobStatus, MovProfile,
    OutputFormat, OutputRequest, Step,
};
use common::{FakeFfmpeg, Recorder, invocations};

fn frame_dir(root: &Path, count: u64) -> std::path::PathBuf {
    let dir = root.join("frames");
    fs::create_dir_all(&dir).unwrap();
    for index in 0..count {
        fs::write(dir.join(format!("frame_{index:05}.png")), b"png").unwrap();
    }
    dir
}

fn rate() -> FrameRate {
    FrameRate::new(30, 1).unwrap()
}

#[test]
fn webm_job_succeeds_with_single_attempt() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().install(scratch.path());
    let frames = frame_dir(scratch.path(), 4);
    let output = scratch.path().join("out.webm");

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Webm, &output)],
    );

    assert_eq!(jobs[0].status, JobStatus::Succeeded);
    assert_eq!(jobs[0].attempts.len(), 1);
    assert_eq!(fs::read_to_string(&output).unwrap().trim(), "4");

    let calls = invocations(scratch.path());
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("-y -hide_banner -loglevel error -framerate 30/1 -i "));
    assert!(calls[0].contains("-c:v libvpx-vp9 -pix_fmt yuva420p -auto-alt-ref 0"));
}

#[test]
fn mov_falls_back_when_prores_is_unavailable() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().failing_on("prores_ks").install(scratch.path());
    let frames = frame_dir(scratch.path(), 3);
    let output = scratch.path().join("out.mov");

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Mov, &output)],
    );

    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempts.len(), 2);
    assert!(!job.attempts[0].succeeded);
    assert!(
        job.attempts[0]
            .diagnostic
            .as_deref()
            .unwrap()
            .contains("prores_ks unavailable")
    );
    assert_eq!(job.profile_used(), Some(CodecProfile::Qtrle));
    assert!(fs::metadata(&output).unwrap().len() > 0);
}

#[test]
fn mov_without_fallback_fails_in_isolation() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().failing_on("prores_ks").install(scratch.path());
    let frames = frame_dir(scratch.path(), 3);

    let options = EncodeOptions::new()
        .with_program(program)
        .with_mov_profile(MovProfile::ProRes4444)
        .with_mov_fallback(false);
    let jobs = EncodeOrchestrator::new(options).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[
            OutputRequest::new(OutputFormat::Mov, scratch.path().join("out.mov")),
            OutputRequest::new(OutputFormat::Webm, scratch.path().join("out.webm")),
        ],
    );

    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error().is_some());
    assert_eq!(jobs[1].status, JobStatus::Succeeded);
}

#[test]
fn gif_falls_back_to_simple_profile() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().failing_on("palettegen").install(scratch.path());
    let frames = frame_dir(scratch.path(), 5);
    let output = scratch.path().join("out.gif");

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Gif, &output)],
    );

    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(matches!(job.profile_used(), Some(CodecProfile::GifSimple { .. })));
    assert!(fs::metadata(&output).unwrap().len() > 0);

    let calls = invocations(scratch.path());
    assert_eq!(calls.len(), 2);
    assert!(calls[1].contains("-vf fps=15/1 "));
}

#[test]
fn gif_rate_is_capped_below_source_rate() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().install(scratch.path());
    let frames = frame_dir(scratch.path(), 2);

    EncodeOrchestrator::new(EncodeOptions::new().with_program(program).with_gif_max_fps(10)).run(
        &frames.join("frame_%05d.png"),
        FrameRate::new(30000, 1001).unwrap(),
        &[OutputRequest::new(OutputFormat::Gif, scratch.path().join("out.gif"))],
    );

    let calls = invocations(scratch.path());
    assert!(calls[0].contains("-framerate 30000/1001"));
    assert!(calls[0].contains("fps=10/1,scale=iw:ih:flags=lanczos"));
}

#[test]
fn hung_encoder_times_out_without_blocking_siblings() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().hanging_on("qtrle").install(scratch.path());
    let frames = frame_dir(scratch.path(), 2);

    let options = EncodeOptions::new()
        .with_program(program)
        .with_mov_profile(MovProfile::Qtrle)
        .with_mov_fallback(false)
        .with_timeout(Duration::from_millis(300));
    let started = Instant::now();
    let jobs = EncodeOrchestrator::new(options).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[
            OutputRequest::new(OutputFormat::Mov, scratch.path().join("out.mov")),
            OutputRequest::new(OutputFormat::Webm, scratch.path().join("out.webm")),
        ],
    );

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].diagnostic.as_deref().unwrap().contains("timed out"));
    assert!(!scratch.path().join("out.mov").exists());
    assert_eq!(jobs[1].status, JobStatus::Succeeded);
}

#[test]
fn failed_job_leaves_no_partial_output() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new()
        .partial_on("prores_ks")
        .partial_on("qtrle")
        .install(scratch.path());
    let frames = frame_dir(scratch.path(), 3);
    let output = scratch.path().join("out.mov");

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Mov, &output)],
    );

    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].attempts.len(), 2);
    assert!(jobs[0].diagnostic.as_deref().unwrap().contains("muxer failed"));
    assert!(!output.exists());
}

#[test]
fn fallback_replaces_partial_output() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().partial_on("palettegen").install(scratch.path());
    let frames = frame_dir(scratch.path(), 4);
    let output = scratch.path().join("out.gif");

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Gif, &output)],
    );

    assert!(jobs[0].succeeded());
    assert_eq!(fs::read_to_string(&output).unwrap().trim(), "4");
}

#[test]
fn missing_frames_fail_the_job() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().install(scratch.path());
    let frames = frame_dir(scratch.path(), 0);

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Webm, scratch.path().join("out.webm"))],
    );
    assert_eq!(jobs[0].status, JobStatus::Failed);
}

#[test]
fn output_parent_directory_is_created() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().install(scratch.path());
    let frames = frame_dir(scratch.path(), 1);
    let output = scratch.path().join("nested/deeper/out.webm");

    let jobs = EncodeOrchestrator::new(EncodeOptions::new().with_program(program)).run(
        &frames.join("frame_%05d.png"),
        rate(),
        &[OutputRequest::new(OutputFormat::Webm, &output)],
    );
    assert!(jobs[0].succeeded());
    assert!(output.is_file());
}

#[test]
fn encoding_events_count_finished_jobs() {
    let scratch = tempfile::tempdir().unwrap();
    let program = FakeFfmpeg::new().failing_on("libvpx").install(scratch.path());
    let frames = frame_dir(scratch.path(), 2);
    let recorder = Arc::new(Recorder::default());

    EncodeOrchestrator::new(EncodeOptions::new().with_program(program))
        .with_progress(recorder.clone())
        .run(
            &frames.join("frame_%05d.png"),
            rate(),
            &[
                OutputRequest::new(OutputFormat::Webm, scratch.path().join("a.webm")),
                OutputRequest::new(OutputFormat::Mov, scratch.path().join("a.mov")),
                OutputRequest::new(OutputFormat::Gif, scratch.path().join("a.gif")),
            ],
        );

    let events = recorder.for_step(Step::Encoding);
    assert_eq!(events.first().unwrap().progress, Some(0));
    assert_eq!(events.first().unwrap().total, Some(3));
    let last = events.last().unwrap();
    assert_eq!(last.progress, Some(3));
    assert_eq!(last.percent, Some(100.0));

    let progress: Vec<u64> = events.iter().filter_map(|event| event.progress).collect();
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(events.iter().any(|event| event.message.starts_with("Failed to encode webm")));
}
