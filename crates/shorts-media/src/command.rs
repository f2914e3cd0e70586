//! FFmpeg command builder and runner.
//!
//! The runner owns the encoder process for exactly the duration of a call:
//! the child is spawned with `kill_on_drop`, and on timeout or cancellation it
//! is killed and reaped before the call returns.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, FfmpegProgress};

/// Number of stderr lines kept for error reports.
pub const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the stderr reader after the process is gone.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input, so decoding starts at the nearest
    /// keyframe and frames up to `seconds` are discarded).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit the amount of input read.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter graph.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Select an input stream (`0:v:0`, `0:a:0?`, ...).
    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-nostdin".to_string());
        args.push("-hide_banner".to_string());
        args.push("-nostats".to_string());

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// How the child process stopped.
enum Exit {
    Status(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runner for FFmpeg commands with progress tracking, timeout and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Encoder binary
    program: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Wall-clock limit
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner for the `ffmpeg` found on `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout: None,
        }
    }

    /// Use a different encoder binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.program.display(), args.join(" "));
        self.run_args(&args, progress_callback).await
    }

    /// Run the configured program with raw arguments.
    ///
    /// Non-zero exit maps to `EncodeFailed`, the timeout to `EncodeTimedOut`
    /// (both with the last [`STDERR_TAIL_LINES`] diagnostic lines) and the
    /// cancel signal to `Cancelled`.
    pub async fn run_args<F>(&self, args: &[String], progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
                _ => MediaError::Io(e),
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        let mut reader = tokio::spawn(collect_stderr(stderr, progress_callback));

        let exit = self.wait_for_exit(&mut child).await?;

        let stderr_tail = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut reader).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(e)) => {
                warn!("stderr reader task failed: {}", e);
                String::new()
            }
            Err(_) => {
                reader.abort();
                warn!("stderr reader did not finish after process exit");
                String::new()
            }
        };

        match exit {
            Exit::Status(status) if status.success() => Ok(()),
            Exit::Status(status) => Err(MediaError::encode_failed(status.code(), stderr_tail)),
            Exit::TimedOut => Err(MediaError::EncodeTimedOut {
                timeout_secs: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                stderr_tail,
            }),
            Exit::Cancelled => Err(MediaError::Cancelled),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Wait for the child, killing and reaping it on timeout or cancellation.
    async fn wait_for_exit(&self, child: &mut Child) -> MediaResult<Exit> {
        let exit = tokio::select! {
            biased;
            status = child.wait() => Exit::Status(status?),
            _ = sleep_for(self.timeout) => Exit::TimedOut,
            _ = wait_cancelled(self.cancel_rx.clone()) => Exit::Cancelled,
        };

        match exit {
            Exit::TimedOut => {
                warn!(
                    "FFmpeg timed out after {:?}, killing process",
                    self.timeout.unwrap_or_default()
                );
            }
            Exit::Cancelled => info!("FFmpeg cancelled, killing process"),
            Exit::Status(_) => return Ok(exit),
        }

        // kill() waits for the child, so it is reaped before we return
        if let Err(e) = child.kill().await {
            warn!("Failed to kill FFmpeg process: {}", e);
        }
        Ok(exit)
    }
}

async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Resolves once the cancel flag is set. Never resolves without a receiver
/// or after the sender is dropped.
pub(crate) async fn wait_cancelled(cancel_rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel_rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Read stderr to EOF, forwarding progress and keeping the diagnostic tail.
async fn collect_stderr<F>(stderr: ChildStderr, progress_callback: F) -> String
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut progress = FfmpegProgress::default();
    let mut tail = StderrTail::new(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if is_progress_line(&line) {
            if let Some(snapshot) = progress.apply_line(&line) {
                progress_callback(snapshot);
            }
        } else {
            tail.push(line);
        }
    }

    tail.into_string()
}

/// Bounded buffer of the most recent non-empty lines.
#[derive(Debug)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.trim().is_empty() || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Tail of an already captured output.
    pub fn from_text(text: &str, capacity: usize) -> Self {
        let mut tail = Self::new(capacity);
        for line in text.lines() {
            tail.push(line);
        }
        tail
    }

    pub fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}
