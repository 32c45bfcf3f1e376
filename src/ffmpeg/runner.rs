//! FFmpeg and ffprobe process spawning.
//!
//! Every child is registered in a process-wide table so `terminate_all_ffmpeg`
//! can stop in-flight work, and a watchdog kills it after the codec timeout.
//! Stdout is either parsed as `-progress pipe:1` output or captured raw.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, LazyLock, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use super::builder::format_args_for_display_multiline;
use super::discovery::{get_ffmpeg_path, get_ffprobe_path};
use super::progress::parse_ffmpeg_progress;
use crate::codec::ProgressCallback;
use crate::error::ThumbnailError;

pub const CODEC_TIMEOUT_ENV: &str = "VIDTHUMB_CODEC_TIMEOUT_SECS";
const DEFAULT_CODEC_TIMEOUT_SECS: u64 = 600;

/// Minimum interval between progress callbacks.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr.
const MAX_STDERR_BYTES: usize = 64 * 1024;

static ACTIVE_FFMPEG_PROCESSES: LazyLock<Mutex<HashMap<u64, Child>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);
static CODEC_TIMEOUT: OnceLock<Duration> = OnceLock::new();

fn codec_timeout() -> Duration {
    *CODEC_TIMEOUT.get_or_init(|| {
        let secs = std::env::var(CODEC_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&s| s > 0)
            .unwrap_or(DEFAULT_CODEC_TIMEOUT_SECS);
        Duration::from_secs(secs)
    })
}

enum StdoutMode {
    Progress {
        duration_secs: Option<f64>,
        callback: Option<ProgressCallback>,
    },
    Capture,
}

fn read_progress<R: Read + Send + 'static>(
    reader: R,
    duration_secs: Option<f64>,
    callback: Option<ProgressCallback>,
) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut duration = duration_secs.filter(|&d| d > 0.0);
        let mut last_emit = Instant::now();
        let mut last_progress = 0.0_f64;
        let mut reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf);
            let (progress, d) = parse_ffmpeg_progress(line.trim_end(), duration);
            duration = d;
            if let (Some(p), Some(cb)) = (progress, callback.as_ref()) {
                let now = Instant::now();
                if now.duration_since(last_emit) >= PROGRESS_EMIT_INTERVAL
                    || (p - last_progress).abs() >= 0.01
                    || p >= 1.0
                {
                    last_emit = now;
                    last_progress = p;
                    cb(p);
                }
            }
            line_buf.clear();
        }
        Vec::new()
    })
}

fn read_all<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut out = Vec::new();
        let _ = reader.read_to_end(&mut out);
        out
    })
}

fn read_stderr<R: Read + Send + 'static>(reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut tail = Vec::new();
        let mut reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            tail.extend_from_slice(&line_buf);
            if tail.len() > MAX_STDERR_BYTES {
                let excess = tail.len() - MAX_STDERR_BYTES;
                tail.drain(..excess);
            }
            line_buf.clear();
        }
        tail
    })
}

fn kill_child(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn run(program: &Path, args: &[String], mode: StdoutMode) -> Result<Vec<u8>, ThumbnailError> {
    log::debug!(
        target: "vidthumb::ffmpeg::runner",
        "Spawning {}\n{}",
        program.display(),
        format_args_for_display_multiline(args)
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| {
            ThumbnailError::external_tool(
                -1,
                format!("Failed to spawn {}: {}", program.display(), e),
            )
        })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_child(child);
        return Err(ThumbnailError::external_tool(-1, "Failed to capture FFmpeg output"));
    };

    let id = NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed);
    ACTIVE_FFMPEG_PROCESSES.lock().insert(id, child);

    let stdout_handle = match mode {
        StdoutMode::Progress {
            duration_secs,
            callback,
        } => read_progress(stdout, duration_secs, callback),
        StdoutMode::Capture => read_all(stdout),
    };
    let stderr_handle = read_stderr(stderr);

    let timeout = codec_timeout();
    let timed_out = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let watchdog = {
        let timed_out = Arc::clone(&timed_out);
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                let child = ACTIVE_FFMPEG_PROCESSES.lock().remove(&id);
                if let Some(child) = child {
                    timed_out.store(true, Ordering::SeqCst);
                    log::error!(
                        target: "vidthumb::ffmpeg::runner",
                        "child process {} exceeded {}s, killing",
                        id,
                        timeout.as_secs()
                    );
                    kill_child(child);
                }
            }
        })
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();
    drop(done_tx);
    let _ = watchdog.join();

    let child = ACTIVE_FFMPEG_PROCESSES.lock().remove(&id);
    let status = match child {
        Some(mut c) => c.wait()?,
        None if timed_out.load(Ordering::SeqCst) => {
            return Err(ThumbnailError::TimedOut(timeout.as_secs()));
        }
        None => {
            log::warn!(
                target: "vidthumb::ffmpeg::runner",
                "child process {} was aborted (terminated externally)",
                id
            );
            return Err(ThumbnailError::aborted());
        }
    };

    if status.success() {
        log::debug!(target: "vidthumb::ffmpeg::runner", "{} completed successfully", program.display());
        return Ok(stdout_bytes);
    }

    let stderr_str = String::from_utf8_lossy(&stderr_bytes).into_owned();
    let code = status.code().unwrap_or(-1);
    let err_preview = stderr_str
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    log::error!(
        target: "vidthumb::ffmpeg::runner",
        "{} failed (code={}): {}",
        program.display(),
        code,
        err_preview
    );
    Err(ThumbnailError::external_tool(code, stderr_str))
}

/// Run FFmpeg to completion, reporting progress parsed from `-progress pipe:1`.
/// `duration_secs` seeds the progress denominator.
pub fn run_ffmpeg_blocking(
    args: &[String],
    duration_secs: Option<f64>,
    progress_callback: Option<ProgressCallback>,
) -> Result<(), ThumbnailError> {
    run(
        get_ffmpeg_path()?,
        args,
        StdoutMode::Progress {
            duration_secs,
            callback: progress_callback,
        },
    )
    .map(|_| ())
}

/// Run FFmpeg to completion and return everything it wrote to stdout.
pub fn run_ffmpeg_capture(args: &[String]) -> Result<Vec<u8>, ThumbnailError> {
    run(get_ffmpeg_path()?, args, StdoutMode::Capture)
}

/// Run ffprobe to completion under the same watchdog and cancellation as FFmpeg.
pub fn run_ffprobe_capture(args: &[String]) -> Result<Vec<u8>, ThumbnailError> {
    run(&get_ffprobe_path()?, args, StdoutMode::Capture)
}

/// Kill every running FFmpeg or ffprobe child. Their callers fail with `Aborted`.
pub fn terminate_all_ffmpeg() -> usize {
    let children: Vec<Child> = ACTIVE_FFMPEG_PROCESSES
        .lock()
        .drain()
        .map(|(_, child)| child)
        .collect();
    let count = children.len();
    if count > 0 {
        log::info!(
            target: "vidthumb::ffmpeg::runner",
            "Terminating {} FFmpeg process(es)",
            count
        );
    }
    children.into_iter().for_each(kill_child);
    count
}

pub fn active_ffmpeg_count() -> usize {
    ACTIVE_FFMPEG_PROCESSES.lock().len()
}
