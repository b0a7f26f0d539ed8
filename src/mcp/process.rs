//! A managed MCP server process.
//!
//! `ServerProcess` owns one child process and everything needed to talk
//! to it: the stdin pipe, two background reader tasks, and the table of
//! in-flight requests. Requests and responses are correlated by string
//! ID, so concurrent callers can share one process and responses may
//! arrive in any order.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::errors::McpError;
use super::types::{JsonRpcError, JsonRpcRequest, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Best-effort wait after spawning; the protocol has no ready signal.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How long a stopping process gets to exit before being killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause between stop and start when restarting.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Default deadline for a single request/response round trip.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive timeouts beyond this trigger a process restart.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

// ─── Pending Requests ────────────────────────────────────────────────────────

/// A single-assignment result slot: registered by the issuing caller,
/// resolved by the stdout reader, removed on resolution, timeout, or
/// process teardown.
struct PendingRequest {
    created_at: Instant,
    slot: oneshot::Sender<Value>,
}

/// Shared between the request path (insert, timeout-remove) and the
/// stdout reader (resolve-remove). Nothing else touches it.
type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

// ─── Process State ───────────────────────────────────────────────────────────

/// The live OS process and everything that must be torn down with it.
struct RunningState {
    child: Child,
    stdin: ChildStdin,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// One supervised MCP server process.
pub struct ServerProcess {
    name: String,
    config: ServerConfig,
    state: Mutex<Option<RunningState>>,
    pending: PendingMap,
    request_id: AtomicU64,
    consecutive_timeouts: AtomicU32,
    starts: AtomicU32,
    request_timeout: Duration,
}

impl ServerProcess {
    /// Create a handle for a configured server. The process is not
    /// spawned until [`start`](Self::start) or the first request.
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_id: AtomicU64::new(0),
            consecutive_timeouts: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the request deadline (tests use short deadlines).
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times the process has been spawned.
    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Timeouts since the last successful response.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::SeqCst)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the configured command and wire up its streams.
    ///
    /// Idempotent: a no-op while the process is running, and concurrent
    /// callers serialize on the state lock, so a start racing another
    /// start simply observes the running process. Returns after a fixed
    /// settle delay; there is no protocol-level readiness handshake.
    pub async fn start(&self) -> Result<(), McpError> {
        let mut state = self.state.lock().await;

        if let Some(running) = state.as_mut() {
            if matches!(running.child.try_wait(), Ok(None)) {
                return Ok(());
            }
            // The previous process died underneath us; clean up before
            // respawning so no reader outlives its process.
            if let Some(stale) = state.take() {
                tracing::warn!(server = %self.name, "previous process exited, cleaning up");
                teardown(stale, &self.pending).await;
            }
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| McpError::SpawnFailed {
            name: self.name.clone(),
            reason: "failed to capture stderr".into(),
        })?;

        tracing::info!(
            server = %self.name,
            pid = child.id().unwrap_or(0),
            command = %self.config.command,
            "started MCP server process"
        );

        let stdout_task = tokio::spawn(read_stdout(
            self.name.clone(),
            stdout,
            Arc::clone(&self.pending),
        ));
        let stderr_task = tokio::spawn(read_stderr(self.name.clone(), stderr));

        *state = Some(RunningState {
            child,
            stdin,
            stdout_task,
            stderr_task,
        });
        self.starts.fetch_add(1, Ordering::SeqCst);

        // Give the server a moment to come up before the first request.
        sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Stop the process: graceful first, then force, then cancel and
    /// await the reader tasks so none outlives the process. Outstanding
    /// requests resolve to null. The handle can be started again.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return;
        };
        let RunningState {
            mut child,
            mut stdin,
            stdout_task,
            stderr_task,
        } = running;

        tracing::info!(server = %self.name, "stopping MCP server process");

        // Graceful: a shutdown notification, then EOF on stdin.
        let _ = stdin
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"shutdown\"}\n")
            .await;
        let _ = stdin.flush().await;
        drop(stdin);

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, code = status.code(), "process exited")
            }
            _ => {
                tracing::warn!(server = %self.name, "process did not exit in time, killing");
                let _ = child.kill().await;
            }
        }

        stdout_task.abort();
        stderr_task.abort();
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        // Outstanding callers observe their dropped slot as a null result.
        self.pending.lock().await.clear();
    }

    /// Stop then start, with a pause for the old process to release
    /// whatever it held.
    pub async fn restart(&self) -> Result<(), McpError> {
        self.stop().await;
        sleep(RESTART_DELAY).await;
        self.start().await
    }

    /// Whether the OS process is alive.
    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.as_mut() {
            Some(running) => matches!(running.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Health check used before discovery. Process liveness only; the
    /// protocol has no standard ping to probe responsiveness.
    pub async fn check_health(&self) -> bool {
        self.is_running().await
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Send a request and await the matching response.
    ///
    /// Returns the JSON-RPC `result` value, or `None` on any absorbed
    /// failure: timeout, error reply, broken pipe, or teardown. The
    /// pending entry is registered before the line is written so a reply
    /// racing the write still finds it.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Option<Value> {
        if !self.is_running().await {
            if let Err(e) = self.start().await {
                tracing::error!(server = %self.name, error = %e, "failed to start server for request");
                return None;
            }
            if !self.is_running().await {
                tracing::error!(server = %self.name, "server exited immediately after start");
                return None;
            }
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst).to_string();
        let request = JsonRpcRequest::new(&id, method, params);
        let line = match serde_json::to_string(&request) {
            Ok(s) => s + "\n",
            Err(e) => {
                tracing::error!(server = %self.name, error = %e, "failed to serialize request");
                return None;
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id.clone(),
            PendingRequest {
                created_at: Instant::now(),
                slot: tx,
            },
        );

        tracing::debug!(server = %self.name, %id, method, "sending request");

        let write_result = {
            let mut state = self.state.lock().await;
            match state.as_mut() {
                Some(running) => {
                    match running.stdin.write_all(line.as_bytes()).await {
                        Ok(()) => running.stdin.flush().await,
                        Err(e) => Err(e),
                    }
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "process not running",
                )),
            }
        };

        if let Err(e) = write_result {
            self.pending.lock().await.remove(&id);
            if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ) {
                tracing::warn!(server = %self.name, error = %e, "pipe broken, restarting server");
                if let Err(e) = self.restart().await {
                    tracing::error!(server = %self.name, error = %e, "restart after broken pipe failed");
                }
            } else {
                tracing::error!(server = %self.name, error = %e, "failed to write request");
            }
            return None;
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => {
                self.consecutive_timeouts.store(0, Ordering::SeqCst);
                self.extract_result(&id, response)
            }
            Ok(Err(_)) => {
                // Slot dropped by teardown; the entry is already gone.
                tracing::debug!(server = %self.name, %id, "request abandoned by shutdown");
                None
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                let timeouts = self.consecutive_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(server = %self.name, %id, method, timeouts, "request timed out");
                if timeouts > MAX_CONSECUTIVE_TIMEOUTS {
                    tracing::warn!(
                        server = %self.name,
                        "too many consecutive timeouts, restarting server"
                    );
                    if let Err(e) = self.restart().await {
                        tracing::error!(server = %self.name, error = %e, "restart after timeouts failed");
                    }
                    self.consecutive_timeouts.store(0, Ordering::SeqCst);
                }
                None
            }
        }
    }

    /// Pull the `result` member out of a response, surfacing JSON-RPC
    /// errors as null results.
    fn extract_result(&self, id: &str, response: Value) -> Option<Value> {
        if let Some(err) = response.get("error") {
            match serde_json::from_value::<JsonRpcError>(err.clone()) {
                Ok(err) => tracing::warn!(
                    server = %self.name,
                    id,
                    code = err.code,
                    message = %err.message,
                    "server returned an error"
                ),
                Err(_) => tracing::warn!(
                    server = %self.name,
                    id,
                    error = %err,
                    "server returned a malformed error object"
                ),
            }
            return None;
        }
        match response.get("result") {
            Some(result) => Some(result.clone()),
            None => {
                tracing::warn!(server = %self.name, id, "response missing result");
                None
            }
        }
    }
}

/// Kill a process remnant and await its readers; used when a process
/// died without going through `stop`.
async fn teardown(state: RunningState, pending: &PendingMap) {
    let RunningState {
        mut child,
        stdin,
        stdout_task,
        stderr_task,
    } = state;
    drop(stdin);
    let _ = child.kill().await;
    stdout_task.abort();
    stderr_task.abort();
    let _ = stdout_task.await;
    let _ = stderr_task.await;
    pending.lock().await.clear();
}

// ─── Stream Readers ──────────────────────────────────────────────────────────

/// Read newline-delimited JSON from stdout and resolve pending requests.
///
/// Empty lines are skipped; non-JSON lines are logged and dropped; a
/// missing or wrong protocol version is logged but the line is still
/// processed; a line with no usable `id`, or an `id` with no pending
/// entry, is logged and dropped without touching other requests. Exits
/// when stdout closes or the task is cancelled.
async fn read_stdout(name: String, stdout: ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let parsed: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(_) => {
                        tracing::debug!(server = %name, line = trimmed, "dropping non-JSON stdout line");
                        continue;
                    }
                };
                if parsed.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
                    tracing::warn!(server = %name, "response missing or invalid jsonrpc version");
                }
                let Some(id) = response_id(&parsed) else {
                    tracing::warn!(server = %name, "response missing id, dropping");
                    continue;
                };
                let entry = pending.lock().await.remove(&id);
                match entry {
                    Some(request) => {
                        tracing::debug!(
                            server = %name,
                            %id,
                            elapsed_ms = request.created_at.elapsed().as_millis() as u64,
                            "resolved pending request"
                        );
                        let _ = request.slot.send(parsed);
                    }
                    None => {
                        tracing::warn!(server = %name, %id, "response for unknown request id, dropping");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(server = %name, "stdout closed");
                break;
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "error reading stdout");
                break;
            }
        }
    }
}

/// Forward stderr lines to the log sink. Never touches the pending table.
async fn read_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            tracing::warn!(server = %name, "stderr: {}", trimmed);
        }
    }
    tracing::debug!(server = %name, "stderr closed");
}

/// Servers should echo our string IDs back, but tolerate numeric IDs.
fn response_id(response: &Value) -> Option<String> {
    match response.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
