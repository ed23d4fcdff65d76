use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use crate::config::TranscodeConfig;
use crate::error::JobError;
use crate::progress::{parse_progress_line, Progress};

/// Limits for one encoder run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    pub timeout: Duration,
    /// Diagnostic lines kept; older lines are dropped
    pub tail_lines: usize,
}

impl ExecuteOptions {
    pub fn from_config(cfg: &TranscodeConfig) -> Self {
        Self {
            timeout: cfg.encode_timeout(),
            tail_lines: cfg.diagnostic_tail_lines,
        }
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(4 * 60 * 60),
            tail_lines: 1000,
        }
    }
}

/// NotStarted -> Running -> {Completed, TimedOut, Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    NotStarted,
    Running,
    Completed,
    TimedOut,
    Failed,
}

/// Outcome of an encoder run that got as far as spawning
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub state: ExecutionState,
    pub exit_code: Option<i32>,
    pub tail: Vec<String>,
    pub last_progress: Option<Progress>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    /// Last `n` diagnostic lines joined for a job reason
    pub fn tail_text(&self, n: usize) -> String {
        let start = self.tail.len().saturating_sub(n);
        self.tail[start..].join("\n")
    }
}

/// Runs the encoder with a given argument list
#[async_trait]
pub trait EncoderRunner: Send + Sync {
    /// `Err` only when the process could not be started; every other outcome
    /// is described by the report state.
    async fn run(
        &self,
        args: &[String],
        opts: &ExecuteOptions,
        on_progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<ExecutionReport, JobError>;
}

/// Bounded tail of diagnostic output
#[derive(Debug)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    cap: usize,
}

impl DiagnosticTail {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { lines: VecDeque::with_capacity(cap.min(4096)), cap }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_vec(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Read up to the next `\n` or `\r`. ffmpeg redraws its status line with a
/// bare carriage return, so both count as terminators. Returns bytes consumed
/// (0 at EOF); the terminator is not copied into `buf`.
async fn read_segment<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    buf.clear();
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(i) => {
                buf.extend_from_slice(&available[..i]);
                reader.consume(i + 1);
                return Ok(consumed + i + 1);
            }
            None => {
                let n = available.len();
                buf.extend_from_slice(available);
                reader.consume(n);
                consumed += n;
            }
        }
    }
}

/// Native ffmpeg process
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    pub ffmpeg_bin: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self { ffmpeg_bin: ffmpeg_bin.into() }
    }
}

#[async_trait]
impl EncoderRunner for FfmpegEncoder {
    async fn run(
        &self,
        args: &[String],
        opts: &ExecuteOptions,
        on_progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<ExecutionReport, JobError> {
        let mut state = ExecutionState::NotStarted;
        debug!("Executing {} {} ({:?})", self.ffmpeg_bin.display(), args.join(" "), state);

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::Spawn(format!("{}: {}", self.ffmpeg_bin.display(), e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| JobError::Spawn("encoder stderr was not captured".to_string()))?;

        state = ExecutionState::Running;
        let started = Instant::now();
        let mut tail = DiagnosticTail::new(opts.tail_lines);
        let mut last_progress: Option<Progress> = None;

        let drive = async {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::with_capacity(256);
            loop {
                match read_segment(&mut reader, &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(p) = parse_progress_line(&line) {
                            on_progress(p.clone());
                            last_progress = Some(p);
                        }
                        tail.push(line);
                    }
                    Err(e) => {
                        warn!("Encoder stderr read failed: {}", e);
                        break;
                    }
                }
            }
            child.wait().await
        };

        let outcome = timeout(opts.timeout, drive).await;
        let (next, exit_code) = match outcome {
            Ok(Ok(status)) if status.success() => (ExecutionState::Completed, status.code()),
            Ok(Ok(status)) => (ExecutionState::Failed, status.code()),
            Ok(Err(e)) => {
                tail.push(format!("failed to wait for encoder: {}", e));
                (ExecutionState::Failed, None)
            }
            Err(_) => {
                warn!("Encoder exceeded {}s, killing it", opts.timeout.as_secs());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out encoder: {}", e);
                }
                (ExecutionState::TimedOut, None)
            }
        };
        debug!("Encoder {:?} -> {:?} after {:?}", state, next, started.elapsed());
        state = next;

        Ok(ExecutionReport {
            state,
            exit_code,
            tail: tail.into_vec(),
            last_progress,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_tail_drops_oldest() {
        let mut tail = DiagnosticTail::new(3);
        for i in 0..5 {
            tail.push(format!("line{}", i));
        }
        assert_eq!(tail.into_vec(), vec!["line2", "line3", "line4"]);
    }

    #[tokio::test]
    async fn test_segments_split_on_cr_and_lf() {
        let data: &[u8] = b"frame=1\rframe=2\nlast";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();
        let mut seen = Vec::new();
        while read_segment(&mut reader, &mut buf).await.unwrap() > 0 {
            seen.push(String::from_utf8(buf.clone()).unwrap());
        }
        assert_eq!(seen, vec!["frame=1", "frame=2", "last"]);
    }

    #[tokio::test]
    async fn test_progress_callback_and_completion() {
        let encoder = FfmpegEncoder::new("sh");
        let mut frames = Vec::new();
        let report = encoder
            .run(
                &sh("printf 'frame=  1 fps=1 speed=1x\\rframe=  2 fps=2 speed=2x\\r' >&2; echo done >&2"),
                &ExecuteOptions::default(),
                &mut |p: Progress| frames.push(p.frame),
            )
            .await
            .unwrap();

        assert_eq!(report.state, ExecutionState::Completed);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(frames, vec![1, 2]);
        assert_eq!(report.last_progress.unwrap().speed, Some(2.0));
        assert_eq!(report.tail.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_bounded_tail() {
        let encoder = FfmpegEncoder::new("sh");
        let opts = ExecuteOptions { tail_lines: 10, ..Default::default() };
        let report = encoder
            .run(&sh("for i in $(seq 1 50); do echo line$i >&2; done; exit 3"), &opts, &mut |_: Progress| {})
            .await
            .unwrap();

        assert_eq!(report.state, ExecutionState::Failed);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.tail.len(), 10);
        assert_eq!(report.tail[0], "line41");
        assert_eq!(report.tail_text(2), "line49\nline50");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let encoder = FfmpegEncoder::new("sh");
        let opts = ExecuteOptions { timeout: Duration::from_millis(200), ..Default::default() };
        let report = encoder.run(&sh("exec sleep 10"), &opts, &mut |_: Progress| {}).await.unwrap();

        assert_eq!(report.state, ExecutionState::TimedOut);
        assert!(report.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let encoder = FfmpegEncoder::new("/nonexistent/bin/ffmpeg");
        let err = encoder.run(&[], &ExecuteOptions::default(), &mut |_: Progress| {}).await.unwrap_err();
        assert!(matches!(err, JobError::Spawn(_)));
    }
}
