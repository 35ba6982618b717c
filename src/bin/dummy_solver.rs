//! A fixture "solver" used by the test suite in place of a real SMT solver.
//! Speaks the same stdout/exit-code contract a real solver would, but its
//! behavior is picked by the operator instead of by actually solving
//! anything.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;

#[derive(StructOpt)]
enum Mode {
    /// Prints `sat` and exits 0.
    Sat,
    /// Prints `unsat` and exits 0.
    Unsat,
    /// Prints `unknown` and exits 0.
    Unknown,
    /// Prints nothing and exits 1.
    Error,
    /// Prints `sat` and then exits 1, modelling a solver that answers
    /// before a cleanup error.
    SatThenError,
    /// Sleeps `milliseconds`, then prints `sat` and exits 0.
    SleepThenSat {
        #[structopt(long)]
        milliseconds: u64,
    },
    /// Sleeps `milliseconds`, then prints `unknown` and exits 0.
    SleepThenUnknown {
        #[structopt(long)]
        milliseconds: u64,
    },
    /// Ignores everything but SIGTERM; exits 0 promptly on receipt.
    SigtermThenExit,
    /// Ignores SIGTERM entirely; only SIGKILL ends it.
    NeverTerminate,
}

fn main() {
    let opts = Mode::from_args();

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term)).unwrap();

    match opts {
        Mode::Sat => emit("sat"),
        Mode::Unsat => emit("unsat"),
        Mode::Unknown => emit("unknown"),
        Mode::Error => std::process::exit(1),
        Mode::SatThenError => {
            emit_no_exit("sat");
            std::process::exit(1);
        }
        Mode::SleepThenSat { milliseconds } => {
            std::thread::sleep(Duration::from_millis(milliseconds));
            emit("sat");
        }
        Mode::SleepThenUnknown { milliseconds } => {
            std::thread::sleep(Duration::from_millis(milliseconds));
            emit("unknown");
        }
        Mode::SigtermThenExit => {
            while !term.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        Mode::NeverTerminate => loop {
            std::thread::sleep(Duration::from_millis(200));
        },
    }
}

fn emit_no_exit(verdict: &str) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{verdict}");
    let _ = out.flush();
}

fn emit(verdict: &str) -> ! {
    emit_no_exit(verdict);
    std::process::exit(0)
}
