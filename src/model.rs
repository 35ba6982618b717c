use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// A solver's verdict on an input. `Sat`/`Unsat` are definitive; `Unknown`
/// and `Error` never win a race on their own.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Sat,
    Unsat,
    Unknown,
    Error,
}

impl Verdict {
    pub fn is_definitive(self) -> bool {
        matches!(self, Verdict::Sat | Verdict::Unsat)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Sat => "sat",
            Verdict::Unsat => "unsat",
            Verdict::Unknown => "unknown",
            Verdict::Error => "error",
        }
    }
}

/// The result of running one solver to completion (or termination).
/// Immutable once produced; `stderr` is capped at 64 KiB.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub solver_name: String,
    pub verdict: Verdict,
    pub exit_code: i32,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub stdout_path: PathBuf,
    pub stderr: Vec<u8>,
    pub cancelled: bool,
}

impl CommandResult {
    pub fn elapsed(&self) -> Duration {
        self.ended_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }

    pub fn stdout_size(&self) -> u64 {
        std::fs::metadata(&self.stdout_path)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Status of a Task's lifecycle. Transitions are monotonic:
/// NotStarted -> Running -> Terminating -> Completed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskStatus {
    NotStarted = 0,
    Running = 1,
    Terminating = 2,
    Completed = 3,
}

impl TaskStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::NotStarted,
            1 => TaskStatus::Running,
            2 => TaskStatus::Terminating,
            _ => TaskStatus::Completed,
        }
    }
}

/// Why a Task was cancelled. Recorded for logging/testing, first writer wins.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CancelReason {
    WinnerFound,
    Timeout,
    Interrupted,
    Shutdown,
}

/// Options governing one race, named directly after the CLI/daemon request
/// surface in spec §6.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub sequence: Option<Vec<String>>,
    pub timeout_ms: Option<u64>,
    pub model: bool,
    pub full_run: bool,
    pub output_csv_path: Option<PathBuf>,
    /// Directory for per-solver stdout capture files; `None` keeps the
    /// default convention of writing alongside the input file.
    pub output_dir: Option<PathBuf>,
}

/// The final result of a race: the winner (if any), the aggregate verdict,
/// and every Command's individual result.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub winner: Option<String>,
    pub verdict: Verdict,
    pub elapsed: Duration,
    pub results: Vec<CommandResult>,
    pub disagreement: bool,
}
