//! One-shot CLI entry point: parses arguments, then either races a single
//! input file through the supervisor or hands control to the daemon accept
//! loop. Exit codes follow spec §6: 0 winner, 1 unknown, 2 error, 130
//! interrupted.

use std::sync::Arc;

use console::Style;
use structopt::StructOpt;
use tracing::{debug, error};

use jsi::catalogue::{self, Catalogue};
use jsi::cli::{InitOpts, Opts};
use jsi::daemon::{self, DaemonOpts};
use jsi::error::JsiError;
use jsi::model::{CancelReason, Verdict};
use jsi::output::{write_csv_atomic, write_stdout_summary};
use jsi::paths::JsiDirectory;
use jsi::supervisor;
use jsi::task::Task;

const EXIT_WINNER: i32 = 0;
const EXIT_UNKNOWN: i32 = 1;
const EXIT_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    // `jsi init` is handled ahead of `Opts::from_args()` since it shares no
    // fields with the one-shot/daemon surface.
    if std::env::args().nth(1).as_deref() == Some("init") {
        let argv = std::iter::once("jsi-init".to_string()).chain(std::env::args().skip(2));
        let init_opts = InitOpts::from_iter(argv);
        std::process::exit(run_init(init_opts));
    }

    let opts = Opts::from_args();
    let _log_guard = jsi::logging::init(opts.log_file.as_deref());

    let code = match run(opts).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal error");
            eprintln!("{}: {e}", Style::new().red().bold().apply_to("error"));
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run_init(opts: InitOpts) -> i32 {
    match JsiDirectory::try_default()
        .and_then(|dir| catalogue::scaffold(&dir, opts.force).map(|()| dir))
    {
        Ok(dir) => {
            println!(
                "initialized {} (edit solvers.json to add/enable solvers)",
                dir.data_dir().display()
            );
            EXIT_WINNER
        }
        Err(e) => {
            eprintln!("{}: {e}", Style::new().red().bold().apply_to("error"));
            EXIT_ERROR
        }
    }
}

async fn run(opts: Opts) -> Result<i32, JsiError> {
    let dir = JsiDirectory::try_default()?;

    if opts.daemon {
        let catalogue = Arc::new(Catalogue::load(&dir)?);
        daemon::run(
            dir,
            catalogue,
            DaemonOpts {
                max_inflight: opts.max_inflight,
            },
        )
        .await?;
        return Ok(EXIT_WINNER);
    }

    let input_file = opts
        .input_file
        .clone()
        .ok_or_else(|| JsiError::Internal("missing input file (or pass --daemon)".into()))?;
    if !input_file.is_file() {
        return Err(JsiError::Internal(format!(
            "input file not found: {}",
            input_file.display()
        )));
    }

    let catalogue = Catalogue::load(&dir)?;
    let solvers = catalogue.select(opts.sequence.as_deref())?;
    let request_opts = opts.to_request_options();
    debug!(solvers = solvers.len(), ?request_opts, "starting race");

    let task = Task::new();
    let task_for_reason = task.clone();
    let outcome = supervisor::race(&catalogue, solvers, &input_file, &request_opts, task).await?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_stdout_summary(&mut handle, &outcome)?;

    if let Some(csv_path) = &request_opts.output_csv_path {
        write_csv_atomic(csv_path, &outcome)?;
    }

    if task_for_reason.cancel_reason() == Some(CancelReason::Interrupted) {
        return Ok(EXIT_INTERRUPTED);
    }

    Ok(match outcome.verdict {
        Verdict::Sat | Verdict::Unsat if outcome.winner.is_some() => EXIT_WINNER,
        Verdict::Error => EXIT_ERROR,
        _ => EXIT_UNKNOWN,
    })
}
