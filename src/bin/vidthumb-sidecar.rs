use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use vidthumb_core::ThumbnailError;
use vidthumb_core::sidecar_api::{self, ErrorPayload};

const WORKERS_ENV: &str = "VIDTHUMB_SIDECAR_WORKERS";
const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: ErrorPayload,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailParams {
    input_path: PathBuf,
    #[serde(default)]
    options: Value,
}

/// Jobs submitted but not yet finished, and a counter bumped by every cancel so
/// queued jobs can tell they were cancelled before they started.
#[derive(Clone)]
struct JobState {
    active: Arc<Mutex<BTreeSet<u64>>>,
    next_job_id: Arc<AtomicU64>,
    cancel_epoch: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(BTreeSet::new())),
            next_job_id: Arc::new(AtomicU64::new(1)),
            cancel_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    fn begin_job(&self) -> (u64, u64) {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(job_id);
        (job_id, self.cancel_epoch.load(Ordering::SeqCst))
    }

    fn finish_job(&self, job_id: u64) {
        self.active.lock().remove(&job_id);
    }

    fn cancelled_since(&self, epoch: u64) -> bool {
        self.cancel_epoch.load(Ordering::SeqCst) != epoch
    }

    fn cancel_all(&self) -> Vec<u64> {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        self.active.lock().iter().copied().collect()
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, ThumbnailError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: sidecar_api::error_payload(&err),
            },
        ),
    };
    if let Err(e) = written {
        log::error!(target: "vidthumb::sidecar", "failed to write response {}: {}", id, e);
    }
}

fn invalid_request(writer: &SharedWriter, summary: &str, detail: String) {
    let failure = RpcFailure {
        id: 0,
        error: ErrorPayload {
            kind: "request",
            summary: summary.to_string(),
            detail,
        },
    };
    let _ = write_json_line_shared(writer, &failure);
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ThumbnailError> {
    serde_json::from_value(params)
        .map_err(|e| ThumbnailError::from(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ThumbnailError> {
    serde_json::to_value(value)
        .map_err(|e| ThumbnailError::from(format!("Failed to serialize result: {}", e)))
}

fn dispatch_sync(method: &str, params: Value, jobs: &JobState) -> Result<Value, ThumbnailError> {
    match method {
        "app.capabilities" => to_value(sidecar_api::app_capabilities()?),
        "thumbnail.fingerprint" => {
            let parsed: ThumbnailParams = params_from_value(params)?;
            to_value(sidecar_api::fingerprint(&parsed.input_path, parsed.options)?)
        }
        "thumbnail.cancel" => {
            let job_ids = jobs.cancel_all();
            let processes = sidecar_api::cancel_all();
            Ok(json!({ "jobIds": job_ids, "terminatedProcesses": processes }))
        }
        _ => Err(ThumbnailError::from(format!("Unknown method: {}", method))),
    }
}

/// Runs one `thumbnail.generate` request once a worker permit is free.
async fn run_generate_job(
    request: RpcRequest,
    writer: SharedWriter,
    jobs: JobState,
    workers: Arc<Semaphore>,
) {
    let parsed: ThumbnailParams = match params_from_value(request.params) {
        Ok(parsed) => parsed,
        Err(err) => return respond(&writer, request.id, Err(err)),
    };

    let (job_id, epoch) = jobs.begin_job();
    let _job_guard = ActiveJobGuard {
        state: jobs.clone(),
        job_id,
    };
    emit_rpc_event(
        &writer,
        "thumbnail.job.queued",
        json!({ "jobId": job_id, "requestId": request.id }),
    );

    let Ok(_permit) = workers.acquire_owned().await else {
        return respond(&writer, request.id, Err(ThumbnailError::aborted()));
    };

    let result = if jobs.cancelled_since(epoch) {
        Err(ThumbnailError::aborted())
    } else {
        let writer_for_events = Arc::clone(&writer);
        let progress: sidecar_api::SidecarProgressEmitter = Arc::new(move |progress: f64| {
            emit_rpc_event(
                &writer_for_events,
                "thumbnail.job.progress",
                json!({ "jobId": job_id, "progress": progress }),
            );
        });
        let input_path = parsed.input_path;
        let options = parsed.options;
        tokio::task::spawn_blocking(move || {
            sidecar_api::generate_with_events(&input_path, options, Some(progress))
        })
        .await
        .unwrap_or_else(|e| Err(ThumbnailError::from(format!("Worker panicked: {}", e))))
    };

    let result = match result {
        Ok(result) => {
            emit_rpc_event(
                &writer,
                "thumbnail.job.complete",
                json!({ "jobId": job_id, "cached": result.cached }),
            );
            to_value(result)
        }
        Err(err) => {
            let payload = sidecar_api::error_payload(&err);
            emit_rpc_event(
                &writer,
                "thumbnail.job.error",
                json!({
                    "jobId": job_id,
                    "kind": payload.kind,
                    "summary": payload.summary,
                    "detail": payload.detail,
                }),
            );
            Err(err)
        }
    };
    respond(&writer, request.id, result);
}

fn worker_count() -> usize {
    std::env::var(WORKERS_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_WORKERS)
}

/// Drop finished jobs so the set only holds queued or running work.
fn reap_finished(running: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = running.try_join_next() {
        if let Err(err) = joined {
            log::error!(target: "vidthumb::sidecar", "job task failed: {}", err);
        }
        reaped += 1;
    }
    reaped
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    sidecar_api::cleanup_startup_temp();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let workers = worker_count();
    log::info!(target: "vidthumb::sidecar", "ready ({} worker(s))", workers);

    let semaphore = Arc::new(Semaphore::new(workers));
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobState::new();
    let mut running = JoinSet::new();

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                invalid_request(&stdout, "Invalid input stream", err.to_string());
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                invalid_request(&stdout, "Invalid request", err.to_string());
                continue;
            }
        };

        if request.method == "thumbnail.generate" {
            reap_finished(&mut running);
            running.spawn_on(
                run_generate_job(
                    request,
                    Arc::clone(&stdout),
                    jobs.clone(),
                    Arc::clone(&semaphore),
                ),
                runtime.handle(),
            );
        } else {
            let result = dispatch_sync(&request.method, request.params, &jobs);
            respond(&stdout, request.id, result);
        }
    }

    runtime.block_on(async {
        while let Some(joined) = running.join_next().await {
            if let Err(err) = joined {
                log::error!(target: "vidthumb::sidecar", "job task failed: {}", err);
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn finished_jobs_are_reaped_and_running_ones_kept() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let mut running = JoinSet::new();
        for _ in 0..3 {
            running.spawn_on(async {}, runtime.handle());
        }
        let gate = Arc::new(Semaphore::new(0));
        let held = Arc::clone(&gate);
        running.spawn_on(
            async move {
                let _permit = held.acquire().await;
            },
            runtime.handle(),
        );

        let mut reaped = 0;
        for _ in 0..200 {
            reaped += reap_finished(&mut running);
            if reaped == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(reaped, 3);
        assert_eq!(running.len(), 1);

        gate.add_permits(1);
        runtime.block_on(async {
            while running.join_next().await.is_some() {}
        });
        assert!(running.is_empty());
    }

    #[test]
    fn worker_count_defaults_to_two() {
        if std::env::var_os(WORKERS_ENV).is_none() {
            assert_eq!(worker_count(), DEFAULT_WORKERS);
        }
    }
}
