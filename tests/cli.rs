//! Command-line contract tests for the `alphacut` binary.

use std::path::Path;
use std::process::{Command, Output};

fn alphacut(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_alphacut"))
        .args(args)
        .output()
        .expect("Failed to run alphacut")
}

fn stdout_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line is not JSON"))
        .collect()
}

#[test]
fn two_arguments_emit_one_error_record() {
    let output = alphacut(&["input.mp4", "output.webm"]);
    assert_eq!(output.status.code(), Some(1));

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1);
    assert!(
        lines[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid arguments")
    );
}

#[test]
fn unknown_format_emits_error_record() {
    let output = alphacut(&["input.mp4", "output.avi", "avi"]);
    assert_eq!(output.status.code(), Some(1));

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1);
    assert!(lines[0]["error"].as_str().unwrap().starts_with("Invalid format"));
}

#[test]
fn repeated_output_path_emits_error_record() {
    let output = alphacut(&["input.mp4", "out.webm", "webm", "--also", "webm=out.webm"]);
    assert_eq!(output.status.code(), Some(1));

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].get("step").is_none());
    assert!(lines[0]["error"].as_str().unwrap().contains("requested twice"));
}

#[test]
fn help_is_not_an_error_record() {
    let output = alphacut(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
}

#[test]
fn missing_input_fails_in_metadata_step() {
    let scratch = tempfile::tempdir().unwrap();
    let output_path = scratch.path().join("out.webm");
    let output = alphacut(&[
        "definitely_missing_input.mp4",
        output_path.to_str().unwrap(),
        "webm",
        "--passthrough",
    ]);
    assert_eq!(output.status.code(), Some(1));

    let lines = stdout_lines(&output);
    assert!(lines.iter().all(|line| line["step"] == "step1"));
    assert!(lines.last().unwrap()["error"].is_string());
    assert!(!output_path.exists());
}

#[cfg(unix)]
#[test]
fn passthrough_run_on_fixture() {
    use std::os::unix::fs::PermissionsExt;

    let input = "tests/fixtures/sample_video.mp4";
    if !Path::new(input).exists() {
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let ffmpeg = scratch.path().join("ffmpeg");
    std::fs::write(&ffmpeg, "#!/bin/sh\nfor arg in \"$@\"; do out=\"$arg\"; done\necho ok > \"$out\"\n").unwrap();
    std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();
    let output_path = scratch.path().join("out.gif");

    let output = alphacut(&[
        input,
        output_path.to_str().unwrap(),
        "gif",
        "--passthrough",
        "--workers",
        "2",
        "--ffmpeg",
        ffmpeg.to_str().unwrap(),
        "--temp-dir",
        scratch.path().join("work").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));

    let lines = stdout_lines(&output);
    assert_eq!(lines.first().unwrap()["step"], "step1");
    assert_eq!(lines.last().unwrap()["step"], "step6");
    assert!(output_path.is_file());
}

#[cfg(unix)]
#[test]
fn interrupt_cancels_and_removes_frames() {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let input = "tests/fixtures/sample_video.mp4";
    if !Path::new(input).exists() {
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let work = scratch.path().join("work");
    let output_path = scratch.path().join("out.webm");
    let mut child = Command::new(env!("CARGO_BIN_EXE_alphacut"))
        .args([
            input,
            output_path.to_str().unwrap(),
            "webm",
            "--matte-command",
            "sleep 30",
            "--temp-dir",
            work.to_str().unwrap(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Wait until the frame directory exists, then interrupt.
    let started = Instant::now();
    while std::fs::read_dir(&work).map_or(true, |mut entries| entries.next().is_none()) {
        assert!(started.elapsed() < Duration::from_secs(10), "no frame directory appeared");
        std::thread::sleep(Duration::from_millis(20));
    }
    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let output = child.wait_with_output().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(output.status.code(), Some(1));

    let lines = stdout_lines(&output);
    assert_eq!(lines.last().unwrap()["step"], "step5");
    assert!(lines.iter().any(|line| line["error"] == "Operation cancelled"));
    assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    assert!(!output_path.exists());
}
