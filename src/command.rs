use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use derive_builder::Builder;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::error::JsiError;
use crate::model::{CommandResult, Verdict};
use crate::task::Task;

const STDERR_CAP: usize = 64 * 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
enum ChildExit {
    BeforeDeadline(std::process::ExitStatus),
    WithinGrace(std::process::ExitStatus),
    Killed,
}

/// Component C: supervises one solver child process end to end. Built with
/// `CommandBuilder` so callers only set the fields that apply.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct SolverCommand {
    pub solver_name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    #[builder(default)]
    pub env: Vec<(String, String)>,
    pub stdout_path: PathBuf,
    pub deadline: Duration,
    /// Window between SIGTERM and SIGKILL; spec §4.C default is 1s.
    #[builder(default = "Duration::from_secs(1)")]
    pub grace: Duration,
    /// Exit-code -> verdict overrides, consulted before stdout classification.
    #[builder(default)]
    pub verdict_map: std::collections::HashMap<i32, Verdict>,
}

impl SolverCommand {
    /// Runs the solver to completion, termination, or cancellation, never
    /// returning an `Err` for solver-side failures — those are folded into
    /// the returned `CommandResult` per the contained-error contract.
    pub async fn run(self, task: &Task) -> CommandResult {
        let started_at = SystemTime::now();

        let stdout_file = match File::create(&self.stdout_path) {
            Ok(f) => f,
            Err(source) => {
                return self.spawn_failure(started_at, JsiError::Spawn {
                    solver: self.solver_name.clone(),
                    source,
                });
            }
        };

        let stderr_path = self.stderr_scratch_path();
        match self.spawn_child(stdout_file, &stderr_path) {
            Ok(child) => self.supervise(child, task, started_at, &stderr_path).await,
            Err(source) => self.spawn_failure(
                started_at,
                JsiError::Spawn {
                    solver: self.solver_name.clone(),
                    source,
                },
            ),
        }
    }

    fn stderr_scratch_path(&self) -> PathBuf {
        self.stdout_path.with_extension(format!(
            "{}.stderr",
            self.stdout_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
        ))
    }

    fn spawn_child(&self, stdout_file: File, stderr_path: &std::path::Path) -> std::io::Result<Child> {
        let stderr_file = File::create(stderr_path)?;
        trace!(solver = %self.solver_name, executable = %self.executable.display(), "spawning solver");
        tokio::process::Command::new(&self.executable)
            .args(&self.args)
            .envs(self.env.iter().cloned())
            .stdin(std::process::Stdio::null())
            .stdout(stdout_file)
            .stderr(stderr_file)
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
    }

    async fn supervise(
        &self,
        mut child: Child,
        task: &Task,
        started_at: SystemTime,
        stderr_path: &std::path::Path,
    ) -> CommandResult {
        let pid = child.id().map(|p| p as i32);
        let deadline = Instant::now() + self.deadline;
        let cancelled_token = task.token();
        let force_token = task.force_token();

        let exit = tokio::select! {
            biased;
            res = child.wait() => match res {
                Ok(status) => ChildExit::BeforeDeadline(status),
                Err(_) => ChildExit::Killed,
            },
            _ = cancelled_token.cancelled() => {
                self.terminate(pid, &mut child, &force_token).await
            }
            _ = sleep_until(deadline) => {
                debug!(solver = %self.solver_name, "deadline reached, sending SIGTERM");
                self.terminate(pid, &mut child, &force_token).await
            }
        };

        let ended_at = SystemTime::now();
        let cancelled = matches!(exit, ChildExit::WithinGrace(_) | ChildExit::Killed);

        let (verdict, exit_code) = self.classify(&exit);
        let stderr = read_bounded_and_remove(stderr_path);

        CommandResult {
            solver_name: self.solver_name.clone(),
            verdict,
            exit_code,
            started_at,
            ended_at,
            stdout_path: self.stdout_path.clone(),
            stderr,
            cancelled,
        }
    }

    /// SIGTERM the process group, wait out the grace period, then SIGKILL.
    /// Guarantees the child is reaped before returning. The grace wait is
    /// also cut short by `force_token` (a second SIGINT/SIGTERM observed by
    /// the caller, spec §4.D.3 / §4.E's second-signal escalation), so a
    /// user's second interrupt reaches SIGKILL immediately instead of
    /// waiting out the full grace period.
    async fn terminate(
        &self,
        pid: Option<i32>,
        child: &mut Child,
        force_token: &tokio_util::sync::CancellationToken,
    ) -> ChildExit {
        if let Some(pid) = pid {
            if let Err(e) = signal::killpg(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(solver = %self.solver_name, error = %e, "failed to send SIGTERM");
            }
        }

        if !self.grace.is_zero() && !force_token.is_cancelled() {
            let grace_wait = tokio::select! {
                biased;
                _ = force_token.cancelled() => None,
                res = tokio::time::timeout(self.grace, child.wait()) => res.ok(),
            };
            if let Some(Ok(status)) = grace_wait {
                return ChildExit::WithinGrace(status);
            }
        }

        debug!(solver = %self.solver_name, "grace period elapsed or escalated, sending SIGKILL");
        if let Some(pid) = pid {
            let _ = signal::killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
        let _ = child.wait().await;
        ChildExit::Killed
    }

    /// Exit code + stdout -> verdict, per spec §4.C. stdout takes
    /// precedence over the exit code: a solver that prints `sat` and then
    /// exits non-zero is still classified `sat`, modelling real solvers
    /// that answer before a cleanup error. `verdict_map` overrides both.
    fn classify(&self, exit: &ChildExit) -> (Verdict, i32) {
        let code = match exit {
            ChildExit::Killed => -1,
            ChildExit::BeforeDeadline(status) | ChildExit::WithinGrace(status) => {
                status.code().unwrap_or(-1)
            }
        };

        if let Some(v) = self.verdict_map.get(&code) {
            return (*v, code);
        }

        match self.verdict_from_stdout() {
            Some(verdict) => (verdict, code),
            None => (Verdict::Error, code),
        }
    }

    /// Reads up to the first 64 bytes of `stdout_path` and classifies by
    /// prefix. `None` means the prefix matched neither a verdict keyword nor
    /// an empty file, i.e. genuinely unclassifiable output.
    fn verdict_from_stdout(&self) -> Option<Verdict> {
        let mut buf = [0u8; 64];
        let n = File::open(&self.stdout_path)
            .and_then(|mut f| f.read(&mut buf))
            .unwrap_or(0);
        let head = String::from_utf8_lossy(&buf[..n]);
        let head = head.trim_start();
        if head.is_empty() {
            Some(Verdict::Unknown)
        } else if head.starts_with("unsat") {
            Some(Verdict::Unsat)
        } else if head.starts_with("sat") {
            Some(Verdict::Sat)
        } else if head.starts_with("unknown") {
            Some(Verdict::Unknown)
        } else {
            None
        }
    }

    fn spawn_failure(&self, started_at: SystemTime, err: JsiError) -> CommandResult {
        warn!(solver = %self.solver_name, error = %err, "solver failed to spawn");
        CommandResult {
            solver_name: self.solver_name.clone(),
            verdict: Verdict::Error,
            exit_code: -1,
            started_at,
            ended_at: SystemTime::now(),
            stdout_path: self.stdout_path.clone(),
            stderr: Vec::new(),
            cancelled: false,
        }
    }
}

/// Runs one of the two virtual solvers (`always_sat`/`always_unsat`) without
/// spawning any process at all.
pub fn virtual_result(solver_name: &str, verdict: Verdict, stdout_path: PathBuf) -> CommandResult {
    let now = SystemTime::now();
    let _ = std::fs::write(&stdout_path, format!("{}\n", verdict.as_str()));
    CommandResult {
        solver_name: solver_name.to_string(),
        verdict,
        exit_code: 0,
        started_at: now,
        ended_at: now,
        stdout_path,
        stderr: Vec::new(),
        cancelled: false,
    }
}

/// Reads up to `STDERR_CAP` bytes from the solver's captured stderr and
/// removes the scratch file; stderr is diagnostic only, never parsed for a
/// verdict.
fn read_bounded_and_remove(path: &std::path::Path) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Ok(mut f) = File::open(path) {
        let _ = f.take(STDERR_CAP as u64).read_to_end(&mut buf);
    }
    let _ = std::fs::remove_file(path);
    buf
}
