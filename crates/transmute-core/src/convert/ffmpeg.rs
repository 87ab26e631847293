//! Audio and video conversion by shelling out to `ffmpeg`.
//!
//! # フロー
//! 1. 入力ストリームを作業ディレクトリの `input.<src>` に書き出す
//! 2. `ffmpeg -progress pipe:1` を起動し、stderr の `Duration:` と stdout の
//!    `out_time_us=` から進捗を計算する
//! 3. 成功したら `output.<dst>` をストリームで返す（作業ディレクトリは
//!    ストリームが drop されたときに消える）

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use ulid::Ulid;

use crate::domain::format::{ConversionPair, Format};
use crate::ports::ByteStream;

use super::{ConversionInput, ConvertError, Converter, ProgressReporter};

const AUDIO_SOURCES: [&str; 5] = ["mp3", "wav", "ogg", "flac", "m4a"];
const VIDEO_SOURCES: [&str; 5] = ["mp4", "webm", "mov", "mkv", "avi"];

/// stderr lines kept for error messages.
const STDERR_TAIL: usize = 20;

/// Progress reserved for writing the input to disk.
const INPUT_SHARE: u8 = 10;

pub struct FfmpegConverter {
    program: PathBuf,
    work_dir: PathBuf,
}

impl FfmpegConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: std::env::temp_dir(),
        }
    }

    /// Directory under which per-job scratch directories are created.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}

/// Scratch directory removed on drop.
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    async fn create(base: &Path) -> io::Result<Self> {
        let dir = base.join(format!("transmute-{}", Ulid::new()));
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.dir)
            && err.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(dir = %self.dir.display(), error = %err, "failed to remove ffmpeg workspace");
        }
    }
}

/// Codec arguments for `target`, or `None` if ffmpeg output to it is not
/// supported.
fn codec_args(target: &Format) -> Option<&'static [&'static str]> {
    match target.as_str() {
        "mp3" => Some(&["-vn", "-codec:a", "libmp3lame", "-q:a", "2"]),
        "mp4" => Some(&[
            "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-c:a", "aac",
            "-b:a", "160k", "-movflags", "+faststart",
        ]),
        _ => None,
    }
}

fn build_args(input: &Path, output: &Path, target: &Format) -> Option<Vec<String>> {
    let codec = codec_args(target)?;
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-nostats", "-y", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(input.to_string_lossy().into_owned());
    args.extend(["-progress", "pipe:1"].iter().map(|s| s.to_string()));
    args.extend(codec.iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().into_owned());
    Some(args)
}

/// Parse `Duration: 00:01:02.50,` from ffmpeg's stderr banner into
/// microseconds.
fn parse_duration(line: &str) -> Option<u64> {
    let rest = line.trim_start().strip_prefix("Duration:")?.trim_start();
    let stamp = rest.split(',').next()?.trim();
    let mut parts = stamp.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total > 0.0).then(|| (total * 1_000_000.0) as u64)
}

/// Parse a `-progress` line into microseconds of output written.
///
/// `out_time_ms` is microseconds as well, despite its name.
fn parse_out_time(line: &str) -> Option<u64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn pairs(&self) -> Vec<ConversionPair> {
        let to_mp3 = AUDIO_SOURCES
            .iter()
            .chain(VIDEO_SOURCES.iter())
            .filter(|source| **source != "mp3")
            .map(|source| ConversionPair::new(*source, "mp3"));
        let to_mp4 = VIDEO_SOURCES
            .iter()
            .filter(|source| **source != "mp4")
            .map(|source| ConversionPair::new(*source, "mp4"));
        to_mp3.chain(to_mp4).collect()
    }

    async fn convert(
        &self,
        input: ConversionInput,
        progress: ProgressReporter,
    ) -> Result<ByteStream<'static>, ConvertError> {
        let ConversionInput {
            pair,
            size,
            mut body,
        } = input;

        let workspace = Workspace::create(&self.work_dir).await?;
        let input_path = workspace.dir.join(format!("input.{}", pair.source));
        let output_path = workspace.dir.join(format!("output.{}", pair.target));
        let Some(args) = build_args(&input_path, &output_path, &pair.target) else {
            return Err(ConvertError::Unsupported(pair));
        };

        let mut file = File::create(&input_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.report_fraction(written * u64::from(INPUT_SHARE), size.max(1) * 100);
        }
        file.flush().await?;
        drop(file);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("ffmpeg stderr not captured"))?;

        let duration_us = AtomicU64::new(0);

        let read_stderr = async {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(us) = parse_duration(&line) {
                    duration_us.store(us, Ordering::Relaxed);
                }
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok::<_, io::Error>(tail)
        };

        let read_progress = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let total = duration_us.load(Ordering::Relaxed);
                if let Some(done) = parse_out_time(&line)
                    && total > 0
                {
                    let span = u64::from(99 - INPUT_SHARE);
                    progress.report_fraction(
                        u64::from(INPUT_SHARE) * total + done.min(total) * span,
                        100 * total,
                    );
                }
            }
            Ok::<_, io::Error>(())
        };

        let (tail, read) = tokio::join!(read_stderr, read_progress);
        let status = child.wait().await?;
        let tail = tail?;
        read?;

        if !status.success() {
            return Err(ConvertError::Tool {
                program: self.program.display().to_string(),
                status: status.to_string(),
                stderr: Vec::from(tail).join("\n"),
            });
        }

        let output = File::open(&output_path).await?;
        tracing::debug!(%pair, "ffmpeg finished");
        // The workspace lives inside the stream and is removed after the
        // output has been read.
        let stream = ReaderStream::new(output).map(move |chunk| {
            let _keep = &workspace;
            chunk
        });
        Ok(Box::pin(stream))
    }
}
