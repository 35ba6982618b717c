//! Component E: a long-lived variant of the one-shot race, served over a
//! Unix stream socket. One request per connection: the client writes an
//! absolute input-file path terminated by a newline or EOF, the daemon
//! writes back the same verdict+comment lines a one-shot run would print to
//! stdout, then half-closes.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fs2::FileExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use crate::catalogue::Catalogue;
use crate::error::{JsiError, Result};
use crate::model::{CancelReason, RequestOptions};
use crate::output::write_stdout_summary;
use crate::paths::JsiDirectory;
use crate::supervisor;
use crate::task::Task;

/// Tracks every in-flight connection's `Task` so a shutdown can cancel all
/// of them with `CancelReason::Shutdown` instead of merely waiting them out.
#[derive(Clone, Default)]
struct TaskRegistry {
    next_id: Arc<AtomicU64>,
    tasks: Arc<Mutex<HashMap<u64, Task>>>,
}

impl TaskRegistry {
    fn register(&self, task: Task) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.lock().unwrap().insert(id, task);
        id
    }

    fn unregister(&self, id: u64) {
        self.tasks.lock().unwrap().remove(&id);
    }

    fn cancel_all(&self, reason: CancelReason) {
        for task in self.tasks.lock().unwrap().values() {
            task.cancel(reason);
        }
    }
}

const DEFAULT_MAX_INFLIGHT: usize = 16;
const CONNECTION_IDLE_CAP: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct DaemonOpts {
    pub max_inflight: usize,
}

impl Default for DaemonOpts {
    fn default() -> Self {
        Self {
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }
}

/// Holds the PID-file lock for the process lifetime; dropping it (including
/// on panic unwind) releases the lock.
struct PidFileGuard {
    _file: std::fs::File,
    pid_path: std::path::PathBuf,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.pid_path);
    }
}

/// Acquires the PID-file lock, detecting a still-running instance via both
/// the lock itself and a connect probe against the existing socket.
fn acquire_pid_lock(dir: &JsiDirectory) -> Result<PidFileGuard> {
    let pid_path = dir.pid_file();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&pid_path)?;

    if file.try_lock_exclusive().is_err() {
        let existing_pid = std::fs::read_to_string(&pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        return Err(JsiError::DaemonAlreadyRunning { pid: existing_pid });
    }

    file.set_len(0)?;
    {
        use std::io::Write;
        let mut f = &file;
        write!(f, "{}", std::process::id())?;
    }

    Ok(PidFileGuard {
        _file: file,
        pid_path,
    })
}

/// Removes a stale socket file, probing it first so a live daemon is never
/// torn down from under itself.
fn remove_stale_socket(socket_path: &std::path::Path) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    match std::os::unix::net::UnixStream::connect(socket_path) {
        Ok(_) => Err(JsiError::Internal(format!(
            "a daemon is already listening on {}",
            socket_path.display()
        ))),
        Err(_) => {
            std::fs::remove_file(socket_path)?;
            Ok(())
        }
    }
}

/// Runs the daemon accept loop until SIGTERM/SIGINT. Never returns `Ok` —
/// shutdown is an explicit process exit after cleanup.
pub async fn run(dir: JsiDirectory, catalogue: Arc<Catalogue>, opts: DaemonOpts) -> Result<()> {
    let _pid_guard = acquire_pid_lock(&dir)?;

    let socket_path = dir.socket_path();
    remove_stale_socket(&socket_path)?;

    let stdout_redirect = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.daemon_stdout_file())?;
    let stderr_redirect = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.daemon_stderr_file())?;
    redirect_stdio(stdout_redirect, stderr_redirect);

    // Bind last, after every other validation step has succeeded, so a
    // partially-initialized daemon never holds a live socket.
    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "daemon listening");
    println!("READY");

    let inflight = Arc::new(AtomicUsize::new(0));
    let registry = TaskRegistry::default();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down gracefully");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down gracefully");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        if inflight.load(Ordering::Acquire) >= opts.max_inflight {
                            warn!("max_inflight reached, rejecting connection");
                            let _ = reject_busy(stream).await;
                            continue;
                        }
                        inflight.fetch_add(1, Ordering::AcqRel);
                        let catalogue = catalogue.clone();
                        let inflight = inflight.clone();
                        let registry = registry.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, catalogue, registry).await {
                                warn!(error = %e, "connection handling failed");
                            }
                            inflight.fetch_sub(1, Ordering::AcqRel);
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept() failed");
                    }
                }
            }
        }
    }

    registry.cancel_all(CancelReason::Shutdown);
    shutdown(listener, connections, socket_path, sigterm, sigint).await;
    Ok(())
}

/// Waits for every in-flight connection to drain (bounded by
/// `SHUTDOWN_GRACE`), unlinking the socket first so no new connection can
/// race the shutdown. A second SIGTERM/SIGINT escalates to an immediate
/// abort of whatever remains in flight.
async fn shutdown(
    listener: UnixListener,
    mut connections: tokio::task::JoinSet<()>,
    socket_path: std::path::PathBuf,
    mut sigterm: tokio::signal::unix::Signal,
    mut sigint: tokio::signal::unix::Signal,
) {
    drop(listener);
    let _ = std::fs::remove_file(&socket_path);

    let grace = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            biased;

            _ = sigterm.recv() => {
                warn!("second SIGTERM received, aborting remaining connections immediately");
                connections.shutdown().await;
                break;
            }
            _ = sigint.recv() => {
                warn!("second SIGINT received, aborting remaining connections immediately");
                connections.shutdown().await;
                break;
            }
            joined = connections.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
            _ = &mut grace => {
                warn!("shutdown grace period elapsed, aborting remaining connections");
                connections.shutdown().await;
                break;
            }
        }
    }
}

async fn reject_busy(mut stream: UnixStream) -> std::io::Result<()> {
    stream.write_all(b"error: busy\n").await?;
    stream.shutdown().await
}

async fn handle_connection(
    stream: UnixStream,
    catalogue: Arc<Catalogue>,
    registry: TaskRegistry,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let read = tokio::time::timeout(CONNECTION_IDLE_CAP, reader.read_line(&mut line)).await;
    let n = match read {
        Ok(Ok(n)) => n,
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => 0,
        Ok(Err(e)) => return Err(JsiError::Io(e)),
        Err(_) => {
            debug!("connection idle timeout");
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let input_path = std::path::PathBuf::from(line.trim());
    let solvers = catalogue.select(None)?;
    let task = Task::new();
    let opts = RequestOptions::default();

    let registry_id = registry.register(task.clone());
    let outcome = supervisor::race(&catalogue, solvers, &input_path, &opts, task).await;
    registry.unregister(registry_id);
    let outcome = outcome?;

    let mut buf = Vec::new();
    write_stdout_summary(&mut buf, &outcome)?;
    writer.write_all(&buf).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Redirects the process's stdout/stderr fds to `stdout`/`stderr`, the way a
/// detached daemon keeps its output reachable without a controlling
/// terminal. `stdout`/`stderr` are deliberately leaked: fds 1/2 now own
/// them.
fn redirect_stdio(stdout: std::fs::File, stderr: std::fs::File) {
    if let Err(e) = nix::unistd::dup2(stdout.as_raw_fd(), 1) {
        warn!(error = %e, "failed to redirect stdout");
    }
    if let Err(e) = nix::unistd::dup2(stderr.as_raw_fd(), 2) {
        warn!(error = %e, "failed to redirect stderr");
    }
    std::mem::forget(stdout);
    std::mem::forget(stderr);
}

/// Used by the client binaries and tests to decide whether a daemon is
/// reachable before trying to connect for real.
pub fn is_running(dir: &JsiDirectory) -> bool {
    std::os::unix::net::UnixStream::connect(dir.socket_path()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn pid_lock_detects_running_instance() {
        let tmp = TempDir::new("jsi-daemon-test").unwrap();
        let dir = JsiDirectory::try_new(tmp.path().join(".jsi")).unwrap();
        let guard = acquire_pid_lock(&dir).unwrap();
        let second = acquire_pid_lock(&dir);
        assert!(matches!(second, Err(JsiError::DaemonAlreadyRunning { .. })));
        drop(guard);
        assert!(acquire_pid_lock(&dir).is_ok());
    }

    #[test]
    fn remove_stale_socket_when_nothing_listening() {
        let tmp = TempDir::new("jsi-daemon-test").unwrap();
        let dir = JsiDirectory::try_new(tmp.path().join(".jsi")).unwrap();
        let socket_path = dir.socket_path();
        // A bound-then-dropped listener leaves the path on disk with
        // nothing accepting connections, simulating a crashed daemon.
        {
            let _listener = std::os::unix::net::UnixListener::bind(&socket_path).unwrap();
        }
        assert!(socket_path.exists());
        assert!(remove_stale_socket(&socket_path).is_ok());
        assert!(!socket_path.exists());
    }

    #[test]
    fn remove_stale_socket_refuses_live_daemon() {
        let tmp = TempDir::new("jsi-daemon-test").unwrap();
        let dir = JsiDirectory::try_new(tmp.path().join(".jsi")).unwrap();
        let socket_path = dir.socket_path();
        let _listener = std::os::unix::net::UnixListener::bind(&socket_path).unwrap();
        assert!(remove_stale_socket(&socket_path).is_err());
    }

    #[test]
    fn cancel_all_reaches_every_registered_task() {
        let registry = TaskRegistry::default();
        let a = Task::new();
        let b = Task::new();
        registry.register(a.clone());
        registry.register(b.clone());
        registry.cancel_all(CancelReason::Shutdown);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn handle_connection_races_and_replies_over_the_socket() {
        let tmp = TempDir::new("jsi-daemon-test").unwrap();
        let jsi_dir = JsiDirectory::try_new(tmp.path().join(".jsi")).unwrap();
        std::fs::write(
            jsi_dir.solvers_file(),
            r#"{"solvers":[{"name":"always-sat","enabled":true,"executable":"true","always_sat":true}]}"#,
        )
        .unwrap();
        let catalogue = Arc::new(Catalogue::load(&jsi_dir).unwrap());
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let (client, server) = UnixStream::pair().unwrap();
        let registry = TaskRegistry::default();
        let handle = tokio::spawn(handle_connection(server, catalogue, registry));

        let (mut read_half, mut write_half) = client.into_split();
        let mut request = input.to_string_lossy().into_owned();
        request.push('\n');
        write_half.write_all(request.as_bytes()).await.unwrap();
        write_half.shutdown().await.unwrap();

        let mut response = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut read_half, &mut response)
            .await
            .unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(response, "sat\n; (result from always-sat)\n");
    }
}
