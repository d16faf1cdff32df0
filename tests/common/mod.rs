//! Shared helpers for the integration tests: a scriptable stand-in for the
//! `ffmpeg` executable, synthetic frame sources, and a recording progress sink.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use alphacut::{Frame, FrameRate, ProgressCallback, ProgressEvent, Step, VideoMetadata};
use image::{Rgb, RgbImage};

/// Builds a shell script that behaves like `ffmpeg` for the arguments the
/// encoder passes.
///
/// The script appends its arguments to `invocations.log`, fails when any
/// argument contains a `fail` pattern, hangs when one contains a `hang`
/// pattern, writes a truncated output and fails when one contains a
/// `partial` pattern, and otherwise writes the number of `frame_*` files it found next
/// to the `-i` pattern into the output path.
#[derive(Default)]
pub struct FakeFfmpeg {
    fail: Vec<String>,
    hang: Vec<String>,
    partial: Vec<String>,
}

impl FakeFfmpeg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail.push(pattern.to_string());
        self
    }

    pub fn hanging_on(mut self, pattern: &str) -> Self {
        self.hang.push(pattern.to_string());
        self
    }

    pub fn partial_on(mut self, pattern: &str) -> Self {
        self.partial.push(pattern.to_string());
        self
    }

    #[cfg(unix)]
    pub fn install(&self, dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("invocations.log");
        let mut arms = String::new();
        for pattern in &self.fail {
            arms.push_str(&format!(
                "    *{pattern}*) echo \"fake ffmpeg: {pattern} unavailable\" >&2; exit 1 ;;\n"
            ));
        }
        for pattern in &self.hang {
            arms.push_str(&format!("    *{pattern}*) sleep 30; exit 1 ;;\n"));
        }
        for pattern in &self.partial {
            arms.push_str(&format!("    *{pattern}*) partial=1 ;;\n"));
        }

        let script = format!(
            r#"#!/bin/sh
echo "$*" >> "{log}"
prev=""
partial=""
input=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  case "$arg" in
{arms}  esac
  prev="$arg"
  out="$arg"
done
if [ -n "$partial" ]; then echo truncated > "$out"; echo "fake ffmpeg: muxer failed" >&2; exit 1; fi
first=$(printf '%s' "$input" | sed 's/%05d/00000/')
if [ ! -f "$first" ]; then echo "fake ffmpeg: missing $first" >&2; exit 1; fi
ls "$(dirname "$input")" | grep -c '^frame_' > "$out"
"#,
            log = log.display(),
        );

        let path = dir.join("ffmpeg");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

/// Lines of `invocations.log` in `dir`.
pub fn invocations(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("invocations.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Metadata for a synthetic `width`x`height` 30 fps source.
pub fn metadata(width: u32, height: u32, nominal: Option<u64>) -> VideoMetadata {
    let frame_rate = FrameRate::from_integer(30).unwrap();
    VideoMetadata::new(width, height, frame_rate, Duration::from_secs(3), nominal).unwrap()
}

/// `count` frames whose colour depends on their index.
pub fn synthetic_frames(count: u64, width: u32, height: u32) -> impl Iterator<Item = Frame> {
    (0..count).map(move |index| {
        let shade = (index % 256) as u8;
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([shade, (x % 256) as u8, (y % 256) as u8])
        });
        Frame::new(index, image)
    })
}

/// Records every event it receives.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<ProgressEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<Step> {
        self.events().iter().map(|event| event.step).collect()
    }

    pub fn for_step(&self, step: Step) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.step == step)
            .collect()
    }
}

impl ProgressCallback for Recorder {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Whether `dir` has no entries left.
pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut entries| entries.next().is_none()).unwrap_or(true)
}
