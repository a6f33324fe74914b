use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{PiwoError, PiwoResult};
use crate::frames::{frame_file_name, frame_file_pattern};
use crate::variant::ScalingAlgorithm;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where to find the ffmpeg tools and how long one invocation may run.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout: Duration::from_secs(900),
        }
    }
}

/// What the core needs to know about the input video.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub duration_secs: f64,
    pub fps: f64,
    pub audio_bitrate_kbps: Option<f64>,
    pub has_audio: bool,
}

/// Scaling applied while extracting frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub width: u32,
    pub height: u32,
    pub algorithm: ScalingAlgorithm,
}

impl FfmpegConfig {
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Reads duration, framerate and audio bitrate with ffprobe.
    pub fn probe(&self, input: &Path) -> PiwoResult<MediaMetadata> {
        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: Option<String>,
            r_frame_rate: Option<String>,
            avg_frame_rate: Option<String>,
            bit_rate: Option<String>,
        }
        #[derive(Deserialize)]
        struct ProbeFormat {
            duration: Option<String>,
        }
        #[derive(Deserialize)]
        struct ProbeOut {
            #[serde(default)]
            streams: Vec<ProbeStream>,
            format: Option<ProbeFormat>,
        }

        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_streams".into(),
            "-show_format".into(),
            input.into(),
        ];
        let stdout = run_with_timeout(&self.ffprobe, &args, self.timeout)?;
        let parsed: ProbeOut = serde_json::from_slice(&stdout)
            .map_err(|e| PiwoError::tool("ffprobe", format!("json parse failed: {e}")))?;

        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| PiwoError::tool("ffprobe", format!("no video stream in '{}'", input.display())))?;
        let fps = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_ff_ratio)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_ff_ratio))
            .ok_or_else(|| PiwoError::tool("ffprobe", "invalid video frame rate"))?;
        let duration_secs = parsed
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| PiwoError::tool("ffprobe", "missing duration"))?;

        let audio = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"));
        let audio_bitrate_kbps = audio
            .and_then(|s| s.bit_rate.as_deref())
            .and_then(|s| s.parse::<f64>().ok())
            .map(|bps| bps / 1000.0);

        Ok(MediaMetadata {
            duration_secs,
            fps,
            audio_bitrate_kbps,
            has_audio: audio.is_some(),
        })
    }

    /// Re-encodes `input` at `fps` into `output`, copying the audio stream.
    pub fn change_framerate(&self, input: &Path, fps: u32, output: &Path) -> PiwoResult<()> {
        let args: Vec<OsString> = vec![
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-r".into(),
            fps.to_string().into(),
            "-c:a".into(),
            "copy".into(),
            output.into(),
        ];
        run_with_timeout(&self.ffmpeg, &args, self.timeout)?;
        Ok(())
    }

    /// Extracts the audio track as MP3.
    pub fn extract_audio(&self, input: &Path, output: &Path) -> PiwoResult<()> {
        let args: Vec<OsString> = vec![
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-vn".into(),
            "-acodec".into(),
            "libmp3lame".into(),
            "-qscale:a".into(),
            "2".into(),
            output.into(),
        ];
        run_with_timeout(&self.ffmpeg, &args, self.timeout)?;
        Ok(())
    }

    /// Writes every frame of `input` to `out_dir/raw-frame-{n}.bmp`, numbered
    /// from `first_index`, optionally scaled.
    pub fn extract_frames(&self, input: &Path, out_dir: &Path, first_index: u32, scale: Option<Scale>) -> PiwoResult<()> {
        let args: Vec<OsString> = vec![
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-vf".into(),
            build_select_filter("gte(n\\,0)", scale).into(),
            "-vsync".into(),
            "vfr".into(),
            "-start_number".into(),
            first_index.to_string().into(),
            out_dir.join(frame_file_pattern()).into(),
        ];
        run_with_timeout(&self.ffmpeg, &args, self.timeout)?;
        Ok(())
    }

    /// Writes the single frame `frame_number` (0-based decoder order) of
    /// `input` to `out_dir/raw-frame-{file_number}.bmp`.
    pub fn extract_single_frame(&self, input: &Path, out_dir: &Path, frame_number: u32, file_number: u32, scale: Option<Scale>) -> PiwoResult<()> {
        let select = format!("eq(n\\,{})", frame_number);
        let args: Vec<OsString> = vec![
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-vf".into(),
            build_select_filter(&select, scale).into(),
            "-vsync".into(),
            "vfr".into(),
            "-frames:v".into(),
            "1".into(),
            out_dir.join(frame_file_name(file_number)).into(),
        ];
        run_with_timeout(&self.ffmpeg, &args, self.timeout)?;
        Ok(())
    }
}

pub(crate) fn build_select_filter(select: &str, scale: Option<Scale>) -> String {
    match scale {
        Some(s) => format!(
            "select={},scale={}:{}:sws_flags={}",
            select,
            s.width,
            s.height,
            s.algorithm.as_str()
        ),
        None => format!("select={}", select),
    }
}

fn parse_ff_ratio(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/').unwrap_or((s, "1"));
    let num = num.trim().parse::<f64>().ok()?;
    let den = den.trim().parse::<f64>().ok()?;
    if num <= 0.0 || den <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Runs `program` to completion and returns its stdout. The child is killed
/// once `timeout` elapses.
pub fn run_with_timeout(program: &Path, args: &[OsString], timeout: Duration) -> PiwoResult<Vec<u8>> {
    let tool = program
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    tracing::debug!(%tool, ?args, "running external command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PiwoError::tool(&tool, format!("failed to spawn (is it installed and on PATH?): {e}")))?;

    // Drain both pipes on their own threads so a chatty child cannot block
    // on a full pipe while we poll.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PiwoError::tool(
                    &tool,
                    format!("timed out after {}s", timeout.as_secs()),
                ));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(PiwoError::tool(&tool, format!("failed to wait: {e}"))),
        }
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

    if !status.success() {
        return Err(PiwoError::tool(
            &tool,
            format!("{}: {}", status, String::from_utf8_lossy(&stderr).trim()),
        ));
    }
    tracing::debug!(%tool, elapsed_ms = started.elapsed().as_millis() as u64, "external command finished");
    Ok(stdout)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}
