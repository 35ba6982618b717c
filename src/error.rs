use std::path::PathBuf;

/// Error taxonomy for the crate. Configuration and resolution errors abort a
/// run before any solver is spawned; solver/timeout/interrupted conditions
/// are folded into an `Outcome` instead and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum JsiError {
    #[error("configuration error in {path}: {source}")]
    Configuration {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to resolve solver `{name}`: {reason}")]
    Resolution { name: String, reason: String },

    #[error("failed to spawn `{solver}`: {source}")]
    Spawn {
        solver: String,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon is busy (max_inflight reached)")]
    DaemonBusy,

    #[error("a jsi daemon is already running (pid {pid})")]
    DaemonAlreadyRunning { pid: u32 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JsiError>;

impl JsiError {
    /// Every variant here represents a failure that prevented a request from
    /// producing an `Outcome` at all (configuration/resolution/spawn/daemon
    /// lifecycle errors) -- the CLI spec's exit code 2.
    pub fn exit_code(&self) -> i32 {
        2
    }
}
