//! Output container selection and ffmpeg re-encoding.

use crate::error::{LongvoxError, Result};
use crate::process::CommandExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Container/codec of the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Wav,
    Mp3,
    Ogg,
    Flac,
    M4a,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Flac => "flac",
            OutputFormat::M4a => "m4a",
        }
    }

    /// Codec arguments passed to ffmpeg; empty for WAV, which is written directly.
    pub fn ffmpeg_args(self) -> &'static [&'static str] {
        match self {
            OutputFormat::Wav => &[],
            OutputFormat::Mp3 => &["-c:a", "libmp3lame", "-q:a", "0"],
            OutputFormat::Ogg => &["-c:a", "libvorbis", "-q:a", "6"],
            OutputFormat::Flac => &["-c:a", "flac", "-compression_level", "12"],
            OutputFormat::M4a => &["-c:a", "aac", "-b:a", "320k"],
        }
    }

    pub fn needs_encoding(self) -> bool {
        self != OutputFormat::Wav
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = LongvoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(OutputFormat::Wav),
            "mp3" => Ok(OutputFormat::Mp3),
            "ogg" => Ok(OutputFormat::Ogg),
            "flac" => Ok(OutputFormat::Flac),
            "m4a" => Ok(OutputFormat::M4a),
            other => Err(LongvoxError::Validation {
                message: format!(
                    "unsupported output format '{}' (expected wav, mp3, ogg, flac or m4a)",
                    other
                ),
            }),
        }
    }
}

/// Re-encode a WAV file into `format` at `output` using ffmpeg.
pub fn encode_file(
    executor: &dyn CommandExecutor,
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    format: OutputFormat,
) -> Result<()> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];
    args.extend(format.ffmpeg_args().iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().into_owned());

    tracing::debug!(%format, output = %output.display(), "encoding final artifact");

    executor
        .execute(ffmpeg, &args, None, &[])
        .map(|_| ())
        .map_err(|e| match e {
            LongvoxError::ToolFailed { message, .. } => LongvoxError::Encode {
                format: format.to_string(),
                message,
            },
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail: bool,
    }

    impl CommandExecutor for RecordingExecutor {
        fn execute(
            &self,
            program: &str,
            args: &[String],
            _stdin: Option<&[u8]>,
            _env: &[(String, String)],
        ) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            if self.fail {
                return Err(LongvoxError::ToolFailed {
                    tool: program.to_string(),
                    message: "Unknown encoder 'libmp3lame'".to_string(),
                });
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn parses_formats_case_insensitively() {
        assert_eq!("MP3".parse::<OutputFormat>().unwrap(), OutputFormat::Mp3);
        assert_eq!(" flac ".parse::<OutputFormat>().unwrap(), OutputFormat::Flac);
        assert!("aiff".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OutputFormat::M4a).unwrap(), "\"m4a\"");
        let parsed: OutputFormat = serde_json::from_str("\"ogg\"").unwrap();
        assert_eq!(parsed, OutputFormat::Ogg);
    }

    #[test]
    fn wav_needs_no_encoding() {
        assert!(!OutputFormat::Wav.needs_encoding());
        assert!(OutputFormat::Wav.ffmpeg_args().is_empty());
        assert!(OutputFormat::Ogg.needs_encoding());
    }

    #[test]
    fn encode_places_codec_args_before_output() {
        let executor = RecordingExecutor::default();
        encode_file(
            &executor,
            "ffmpeg",
            Path::new("/jobs/a/final.wav"),
            Path::new("/jobs/a/a_final.mp3"),
            OutputFormat::Mp3,
        )
        .unwrap();

        let calls = executor.calls.lock().unwrap();
        let (program, args) = &calls[0];
        assert_eq!(program, "ffmpeg");
        assert_eq!(args.last().unwrap(), "/jobs/a/a_final.mp3");
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_pos + 1], "/jobs/a/final.wav");
        let codec_pos = args.iter().position(|a| a == "libmp3lame").unwrap();
        assert!(codec_pos > input_pos && codec_pos < args.len() - 1);
    }

    #[test]
    fn ffmpeg_failure_becomes_encode_error() {
        let executor = RecordingExecutor {
            fail: true,
            ..Default::default()
        };
        let result = encode_file(
            &executor,
            "ffmpeg",
            Path::new("in.wav"),
            Path::new("out.mp3"),
            OutputFormat::Mp3,
        );
        match result {
            Err(LongvoxError::Encode { format, message }) => {
                assert_eq!(format, "mp3");
                assert!(message.contains("libmp3lame"));
            }
            other => panic!("Expected Encode error, got {:?}", other),
        }
    }
}
