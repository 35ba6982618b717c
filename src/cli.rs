use std::path::PathBuf;

use structopt::StructOpt;

use crate::model::RequestOptions;

/// `jsi` races a configured set of SMT solvers against one input file and
/// reports the first definitive verdict.
#[derive(Debug, StructOpt)]
#[structopt(name = "jsi")]
pub struct Opts {
    /// Input SMT-LIB 2 file. Omitted when `--daemon` is passed.
    #[structopt(parse(from_os_str))]
    pub input_file: Option<PathBuf>,

    /// Comma-separated list of solver names to race, in this order. Default:
    /// every `enabled` entry in solvers.json, in declaration order.
    #[structopt(long, use_delimiter = true)]
    pub sequence: Option<Vec<String>>,

    /// Wall-clock timeout in seconds for the whole race.
    #[structopt(long)]
    pub timeout: Option<u64>,

    /// Wait for every solver to finish instead of cancelling losers once a
    /// definitive verdict is found.
    #[structopt(long)]
    pub full_run: bool,

    /// Ask each solver to produce a model/witness alongside its verdict.
    #[structopt(long)]
    pub model: bool,

    /// Write a per-solver results table to this CSV path.
    #[structopt(long, parse(from_os_str))]
    pub csv: Option<PathBuf>,

    /// Directory for per-solver stdout capture files; default is alongside
    /// the input file.
    #[structopt(long, parse(from_os_str))]
    pub output_dir: Option<PathBuf>,

    /// Run as a long-lived daemon instead of a one-shot race.
    #[structopt(long)]
    pub daemon: bool,

    /// Maximum number of connections the daemon supervises concurrently;
    /// excess connections are answered with `error: busy`. Ignored outside
    /// `--daemon`.
    #[structopt(long, default_value = "16")]
    pub max_inflight: usize,

    /// Redirect log output to this file instead of stderr.
    #[structopt(long, parse(from_os_str))]
    pub log_file: Option<PathBuf>,
}

impl Opts {
    pub fn to_request_options(&self) -> RequestOptions {
        RequestOptions {
            sequence: self.sequence.clone(),
            timeout_ms: self.timeout.map(|secs| secs.saturating_mul(1000)),
            model: self.model,
            full_run: self.full_run,
            output_csv_path: self.csv.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

/// `jsi init` scaffolds `~/.jsi` for first-time users.
#[derive(Debug, StructOpt)]
#[structopt(name = "jsi-init")]
pub struct InitOpts {
    /// Overwrite an existing solvers.json with the bundled defaults.
    #[structopt(long)]
    pub force: bool,
}
