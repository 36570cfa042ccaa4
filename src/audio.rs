//! Audio metadata extraction.
//!
//! Audio files never produce extracted text; their metadata is merged into the record instead.
//! Probes swallow their own failures and report an empty mapping.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;

const HEADER_BYTES: u64 = 64 * 1024;
/// Default wall-clock limit for a single `ffprobe` run.
pub const DEFAULT_FFPROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of metadata for stored audio files.
#[async_trait]
pub trait AudioMetadataExtractor: Send + Sync {
    /// Describe the audio file at `path`; empty when nothing could be determined.
    async fn extract(&self, path: &Path) -> Map<String, Value>;
}

/// Pure-Rust probe reading container headers.
///
/// WAV files yield channel count, sample rate, bit depth and duration from their `fmt ` and
/// `data` chunks; MP3, M4A, FLAC and Ogg are identified by signature only.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderAudioProbe;

#[async_trait]
impl AudioMetadataExtractor for HeaderAudioProbe {
    async fn extract(&self, path: &Path) -> Map<String, Value> {
        match read_header(path).await {
            Ok(header) => probe_header(&header),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Audio header probe failed");
                Map::new()
            }
        }
    }
}

async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut header = Vec::new();
    file.take(HEADER_BYTES).read_to_end(&mut header).await?;
    Ok(header)
}

/// Inspect leading audio bytes and describe what they contain.
pub fn probe_header(header: &[u8]) -> Map<String, Value> {
    if let Some(wav) = parse_wav(header) {
        return wav;
    }
    let format = if header.starts_with(b"ID3") || is_mpeg_frame(header) {
        "mp3"
    } else if header.len() >= 8 && &header[4..8] == b"ftyp" {
        "m4a"
    } else if header.starts_with(b"fLaC") {
        "flac"
    } else if header.starts_with(b"OggS") {
        "ogg"
    } else {
        return Map::new();
    };
    let mut metadata = Map::new();
    metadata.insert("audio_format".into(), json!(format));
    metadata
}

fn is_mpeg_frame(header: &[u8]) -> bool {
    header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0
}

fn le_u16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(at..at + 2)?.try_into().ok()?))
}

fn le_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

struct WavFormat {
    codec: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    bits_per_sample: u16,
}

fn parse_fmt(header: &[u8], body: usize) -> Option<WavFormat> {
    Some(WavFormat {
        codec: le_u16(header, body)?,
        channels: le_u16(header, body + 2)?,
        sample_rate: le_u32(header, body + 4)?,
        byte_rate: le_u32(header, body + 8)?,
        bits_per_sample: le_u16(header, body + 14)?,
    })
}

fn parse_wav(header: &[u8]) -> Option<Map<String, Value>> {
    if header.len() < 12 || &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }

    let mut metadata = Map::new();
    metadata.insert("audio_format".into(), json!("wav"));
    let mut byte_rate = 0u32;
    let mut offset = 12usize;
    while offset + 8 <= header.len() {
        let id = &header[offset..offset + 4];
        let Some(size) = le_u32(header, offset + 4).map(|size| size as usize) else {
            break;
        };
        let body = offset + 8;
        match id {
            b"fmt " => {
                let Some(fmt) = parse_fmt(header, body) else {
                    break;
                };
                byte_rate = fmt.byte_rate;
                metadata.insert(
                    "codec".into(),
                    json!(if fmt.codec == 1 { "pcm" } else { "wav" }),
                );
                metadata.insert("channels".into(), json!(fmt.channels));
                metadata.insert("sample_rate".into(), json!(fmt.sample_rate));
                metadata.insert("bits_per_sample".into(), json!(fmt.bits_per_sample));
            }
            b"data" => {
                if byte_rate > 0 {
                    let seconds = size as f64 / f64::from(byte_rate);
                    metadata.insert(
                        "duration_seconds".into(),
                        json!((seconds * 1000.0).round() / 1000.0),
                    );
                }
                break;
            }
            _ => {}
        }
        // Chunks are word aligned.
        match body.checked_add(size).and_then(|end| end.checked_add(size & 1)) {
            Some(next) => offset = next,
            None => break,
        }
    }
    Some(metadata)
}

/// Probe that shells out to `ffprobe` for container and stream details.
#[derive(Debug, Clone)]
pub struct FfprobeAudioProbe {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeAudioProbe {
    /// Probe using the `ffprobe` binary at `ffprobe_path`.
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout: DEFAULT_FFPROBE_TIMEOUT,
        }
    }

    /// Kill the child and give up after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

#[async_trait]
impl AudioMetadataExtractor for FfprobeAudioProbe {
    async fn extract(&self, path: &Path) -> Map<String, Value> {
        let run = tokio::process::Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(path)
            .kill_on_drop(true)
            .output();
        let Ok(output) = tokio::time::timeout(self.timeout, run).await else {
            tracing::warn!(
                path = %path.display(),
                timeout_secs = self.timeout.as_secs(),
                "ffprobe timed out"
            );
            return Map::new();
        };
        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!(
                    path = %path.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "ffprobe failed"
                );
                return Map::new();
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to run ffprobe");
                return Map::new();
            }
        };
        match serde_json::from_slice::<FfprobeOutput>(&output.stdout) {
            Ok(parsed) => ffprobe_metadata(parsed),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Unreadable ffprobe output");
                Map::new()
            }
        }
    }
}

fn ffprobe_metadata(output: FfprobeOutput) -> Map<String, Value> {
    let mut metadata = Map::new();
    if let Some(format) = output.format {
        if let Some(name) = format.format_name {
            metadata.insert("audio_format".into(), json!(name));
        }
        if let Some(duration) = format.duration.and_then(|d| d.parse::<f64>().ok()) {
            metadata.insert("duration_seconds".into(), json!(duration));
        }
        if let Some(bit_rate) = format.bit_rate.and_then(|b| b.parse::<u64>().ok()) {
            metadata.insert("bit_rate".into(), json!(bit_rate));
        }
    }
    if let Some(stream) = output
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"))
    {
        if let Some(codec) = stream.codec_name {
            metadata.insert("codec".into(), json!(codec));
        }
        if let Some(rate) = stream.sample_rate.and_then(|r| r.parse::<u32>().ok()) {
            metadata.insert("sample_rate".into(), json!(rate));
        }
        if let Some(channels) = stream.channels {
            metadata.insert("channels".into(), json!(channels));
        }
    }
    metadata
}
