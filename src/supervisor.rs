use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalogue::{Catalogue, SolverDef};
use crate::command::{self, SolverCommandBuilder};
use crate::error::{JsiError, Result};
use crate::model::{CancelReason, CommandResult, Outcome, RequestOptions, Verdict};
use crate::task::Task;

/// Per-solver wall-clock ceiling used when a request sets no explicit
/// `--timeout`; large enough to never fire in practice, but finite so a
/// runaway Command is never literally unbounded.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(3600);

/// Component D: races every selected solver against one input file and
/// returns the synthesized `Outcome`.
pub async fn race(
    catalogue: &Catalogue,
    solvers: Vec<SolverDef>,
    input_file: &Path,
    opts: &RequestOptions,
    task: Task,
) -> Result<Outcome> {
    // Resolution happens before anything is spawned: a missing executable
    // aborts the whole race rather than being folded into a per-Command
    // error.
    let mut resolved = Vec::with_capacity(solvers.len());
    for solver in &solvers {
        let exe = catalogue.resolve_executable(solver)?;
        resolved.push((solver.clone(), exe));
    }

    let request_id = uuid::Uuid::new_v4();
    debug!(%request_id, input = %input_file.display(), solvers = solvers.len(), "race starting");
    if let Some(dir) = &opts.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let start = Instant::now();
    task.mark_started();

    let deadline = opts
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_DEADLINE);

    let deadline_watch = opts
        .timeout_ms
        .map(Duration::from_millis)
        .map(|d| spawn_deadline_watcher(task.clone(), d));
    let sigint_watch = spawn_sigint_watcher(task.clone());

    let mut set: JoinSet<(usize, CommandResult)> = JoinSet::new();

    for (idx, (solver, exe)) in resolved.into_iter().enumerate() {
        let stdout_path = match &opts.output_dir {
            Some(dir) => Catalogue::stdout_path_in(dir, input_file, &solver.name),
            None => Catalogue::stdout_path_for(input_file, &solver.name),
        };
        let sub_task = task.clone();

        if solver.always_sat || solver.always_unsat {
            let verdict = if solver.always_sat {
                Verdict::Sat
            } else {
                Verdict::Unsat
            };
            let name = solver.name.clone();
            set.spawn(async move { (idx, command::virtual_result(&name, verdict, stdout_path)) });
            continue;
        }

        let exe = exe.expect("non-virtual solver always resolves to a path");
        let args = catalogue.build_args(&solver, input_file, opts.model);
        let verdict_map = parse_verdict_map(&solver.verdict_map);
        let cmd = SolverCommandBuilder::default()
            .solver_name(solver.name.clone())
            .executable(exe)
            .args(args)
            .stdout_path(stdout_path)
            .deadline(deadline)
            .verdict_map(verdict_map)
            .build()
            .map_err(|e| JsiError::Internal(format!("failed to build command: {e}")))?;

        set.spawn(async move { (idx, cmd.run(&sub_task).await) });
    }

    // Winner resolution happens here, in this single loop, rather than via a
    // shared slot raced from inside each spawned task: before deciding on any
    // one result, every result that is *already* ready is drained and sorted
    // by spawn index, so commands that become observable in the same tick
    // are tie-broken by spawn order (spec §5/§9.1) instead of by whichever
    // task happened to be polled first by the runtime.
    let mut winner: Option<(usize, String)> = None;
    let mut indexed_results = Vec::new();
    loop {
        let first = match set.join_next().await {
            Some(joined) => joined,
            None => break,
        };
        let mut batch = Vec::new();
        match first {
            Ok(pair) => batch.push(pair),
            Err(e) => warn!(error = %e, "a solver task panicked; dropping its result"),
        }
        while let Some(joined) = set.try_join_next() {
            match joined {
                Ok(pair) => batch.push(pair),
                Err(e) => warn!(error = %e, "a solver task panicked; dropping its result"),
            }
        }
        batch.sort_by_key(|(idx, _)| *idx);

        for (idx, result) in batch {
            if winner.is_none() && result.verdict.is_definitive() {
                winner = Some((idx, result.solver_name.clone()));
                if !opts.full_run {
                    task.cancel(CancelReason::WinnerFound);
                }
            }
            indexed_results.push((idx, result));
        }
    }

    if let Some(handle) = deadline_watch {
        handle.abort();
    }
    sigint_watch.abort();

    indexed_results.sort_by_key(|(idx, _)| *idx);
    let results: Vec<CommandResult> = indexed_results.into_iter().map(|(_, r)| r).collect();

    let winner = winner.map(|(_, name)| name);
    let verdict = outcome_verdict(&winner, &results);
    let disagreement = has_disagreement(&results);

    task.mark_completed();
    info!(
        %request_id,
        winner = ?winner,
        verdict = verdict.as_str(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "race complete"
    );

    Ok(Outcome {
        winner,
        verdict,
        elapsed: start.elapsed(),
        results,
        disagreement,
    })
}

fn outcome_verdict(winner: &Option<String>, results: &[CommandResult]) -> Verdict {
    if let Some(winner_name) = winner {
        if let Some(r) = results.iter().find(|r| &r.solver_name == winner_name) {
            return r.verdict;
        }
    }
    if !results.is_empty() && results.iter().all(|r| r.verdict == Verdict::Error) {
        Verdict::Error
    } else {
        Verdict::Unknown
    }
}

fn has_disagreement(results: &[CommandResult]) -> bool {
    let mut seen_sat = false;
    let mut seen_unsat = false;
    for r in results {
        match r.verdict {
            Verdict::Sat => seen_sat = true,
            Verdict::Unsat => seen_unsat = true,
            _ => {}
        }
    }
    seen_sat && seen_unsat
}

fn parse_verdict_map(raw: &HashMap<i32, String>) -> HashMap<i32, Verdict> {
    raw.iter()
        .filter_map(|(code, verdict)| {
            let v = match verdict.as_str() {
                "sat" => Verdict::Sat,
                "unsat" => Verdict::Unsat,
                "unknown" => Verdict::Unknown,
                "error" => Verdict::Error,
                _ => return None,
            };
            Some((*code, v))
        })
        .collect()
}

fn spawn_deadline_watcher(task: Task, deadline: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        task.cancel(CancelReason::Timeout);
    })
}

/// First SIGINT cancels the race with `Interrupted`; a second SIGINT within
/// 2s escalates every Command's termination straight to SIGKILL (spec
/// §4.D.3) instead of waiting out their grace periods.
const SECOND_INTERRUPT_WINDOW: Duration = Duration::from_secs(2);

fn spawn_sigint_watcher(task: Task) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sig = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        sig.recv().await;
        task.cancel(CancelReason::Interrupted);

        if tokio::time::timeout(SECOND_INTERRUPT_WINDOW, sig.recv())
            .await
            .is_ok()
        {
            warn!("second SIGINT received, escalating to immediate SIGKILL");
            task.force_kill();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestOptions;
    use crate::paths::JsiDirectory;
    use std::path::PathBuf;
    use tempdir::TempDir;

    fn dir_with_catalogue(json: &str) -> (TempDir, JsiDirectory) {
        let tmp = TempDir::new("jsi-supervisor-test").unwrap();
        let jsi_dir = JsiDirectory::try_new(tmp.path().join(".jsi")).unwrap();
        std::fs::write(jsi_dir.solvers_file(), json).unwrap();
        (tmp, jsi_dir)
    }

    #[tokio::test]
    async fn always_sat_wins_instantly() {
        let (tmp, jsi_dir) = dir_with_catalogue(
            r#"{"solvers":[{"name":"always-sat","enabled":true,"executable":"true","always_sat":true}]}"#,
        );
        let catalogue = Catalogue::load(&jsi_dir).unwrap();
        let solvers = catalogue.select(None).unwrap();
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let outcome = race(
            &catalogue,
            solvers,
            &input,
            &RequestOptions::default(),
            Task::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.winner.as_deref(), Some("always-sat"));
        assert_eq!(outcome.verdict, Verdict::Sat);
        assert!(!outcome.disagreement);
    }

    #[tokio::test]
    async fn disagreement_is_recorded() {
        let (tmp, jsi_dir) = dir_with_catalogue(
            r#"{"solvers":[
                {"name":"always-sat","enabled":true,"executable":"true","always_sat":true},
                {"name":"always-unsat","enabled":true,"executable":"true","always_unsat":true}
            ]}"#,
        );
        let catalogue = Catalogue::load(&jsi_dir).unwrap();
        let solvers = catalogue.select(None).unwrap();
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let mut opts = RequestOptions::default();
        opts.full_run = true;
        let outcome = race(&catalogue, solvers, &input, &opts, Task::new())
            .await
            .unwrap();

        assert!(outcome.disagreement);
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn unresolvable_solver_aborts_before_spawn() {
        let (tmp, jsi_dir) = dir_with_catalogue(
            r#"{"solvers":[{"name":"ghost","enabled":true,"executable":"definitely-not-on-path-xyz"}]}"#,
        );
        let catalogue = Catalogue::load(&jsi_dir).unwrap();
        let solvers = catalogue.select(None).unwrap();
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let err = race(
            &catalogue,
            solvers,
            &input,
            &RequestOptions::default(),
            Task::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JsiError::Resolution { .. }));
    }

    fn dummy_path() -> String {
        for mode in ["release", "debug"] {
            let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("target")
                .join(mode)
                .join("dummy_solver");
            if path.exists() {
                return path.to_string_lossy().into_owned();
            }
        }
        panic!("dummy_solver binary not built; run `cargo build --bin dummy_solver` first")
    }

    fn dummy_catalogue_json() -> String {
        let exe = dummy_path();
        format!(
            r#"{{"solvers":[
                {{"name":"fast-sat","enabled":true,"executable":"{exe}","args":["sleep-then-sat","--milliseconds","50"]}},
                {{"name":"slow-unknown","enabled":true,"executable":"{exe}","args":["sleep-then-unknown","--milliseconds","5000"]}}
            ]}}"#
        )
    }

    #[tokio::test]
    async fn fast_sat_wins_race_and_cancels_slow_unknown() {
        let (tmp, jsi_dir) = dir_with_catalogue(&dummy_catalogue_json());
        let catalogue = Catalogue::load(&jsi_dir).unwrap();
        let solvers = catalogue.select(None).unwrap();
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let mut opts = RequestOptions::default();
        opts.timeout_ms = Some(10_000);
        let outcome = race(&catalogue, solvers, &input, &opts, Task::new())
            .await
            .unwrap();

        assert_eq!(outcome.winner.as_deref(), Some("fast-sat"));
        assert_eq!(outcome.verdict, Verdict::Sat);
        let slow = outcome
            .results
            .iter()
            .find(|r| r.solver_name == "slow-unknown")
            .unwrap();
        assert!(slow.cancelled);
        assert!(outcome.elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn all_unknown_yields_unknown_verdict_and_no_winner() {
        let exe = dummy_path();
        let json = format!(
            r#"{{"solvers":[
                {{"name":"a","enabled":true,"executable":"{exe}","args":["unknown"]}},
                {{"name":"b","enabled":true,"executable":"{exe}","args":["unknown"]}}
            ]}}"#
        );
        let (tmp, jsi_dir) = dir_with_catalogue(&json);
        let catalogue = Catalogue::load(&jsi_dir).unwrap();
        let solvers = catalogue.select(None).unwrap();
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let outcome = race(
            &catalogue,
            solvers,
            &input,
            &RequestOptions::default(),
            Task::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.verdict, Verdict::Unknown);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| !r.cancelled));
    }

    #[tokio::test]
    async fn global_timeout_yields_unknown_and_reaps_everyone() {
        let exe = dummy_path();
        let json = format!(
            r#"{{"solvers":[{{"name":"stuck","enabled":true,"executable":"{exe}","args":["sleep-then-sat","--milliseconds","30000"]}}]}}"#
        );
        let (tmp, jsi_dir) = dir_with_catalogue(&json);
        let catalogue = Catalogue::load(&jsi_dir).unwrap();
        let solvers = catalogue.select(None).unwrap();
        let input = tmp.path().join("input.smt2");
        std::fs::write(&input, "(check-sat)\n").unwrap();

        let mut opts = RequestOptions::default();
        opts.timeout_ms = Some(300);
        let start = Instant::now();
        let outcome = race(&catalogue, solvers, &input, &opts, Task::new())
            .await
            .unwrap();

        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.verdict, Verdict::Unknown);
        assert!(outcome.results[0].cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
