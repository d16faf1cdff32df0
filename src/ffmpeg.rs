//! FFmpeg library initialisation and log level control.
//!
//! Probing and decoding go through the linked FFmpeg libraries, which print
//! to stderr on their own. The binary keeps that quiet by default so the only
//! diagnostics on stderr come from the `log` facade; library users can pick a
//! level with [`set_ffmpeg_log_level`].

use std::str::FromStr;

use ffmpeg_next::util::log::Level;

use crate::error::AlphacutError;

/// FFmpeg internal log verbosity, most quiet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FfmpegLogLevel {
    Quiet,
    Fatal,
    #[default]
    Error,
    Warning,
    Info,
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = AlphacutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            other => Err(AlphacutError::InvalidArgument(format!(
                "unknown FFmpeg log level '{other}'"
            ))),
        }
    }
}

/// Set the FFmpeg library log level. Does not affect the `log` facade.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Initialise the FFmpeg libraries. Safe to call repeatedly.
pub(crate) fn init() -> Result<(), AlphacutError> {
    ffmpeg_next::init().map_err(AlphacutError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_names() {
        assert_eq!("quiet".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Quiet);
        assert_eq!("WARN".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Warning);
        assert!("trace-all".parse::<FfmpegLogLevel>().is_err());
    }
}
