use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::model::Outcome;

/// Writes the single verdict line and single comment line this crate ever
/// puts on stdout (spec §4.D.5); everything else (progress, warnings) goes
/// to stderr via `tracing`.
pub fn write_stdout_summary(out: &mut impl Write, outcome: &Outcome) -> std::io::Result<()> {
    writeln!(out, "{}", outcome.verdict.as_str())?;
    match &outcome.winner {
        Some(winner) => writeln!(out, "; (result from {winner})")?,
        None => writeln!(out, "; (no solver produced a definitive verdict)")?,
    }
    Ok(())
}

/// Writes the race CSV atomically (write-tmp-then-rename), with the header
/// `solver,result,exit,time,output file,size`.
pub fn write_csv_atomic(path: &Path, outcome: &Outcome) -> Result<()> {
    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        writeln!(file, "solver,result,exit,time,output file,size")?;
        for r in &outcome.results {
            writeln!(
                file,
                "{},{},{},{:.3},{},{}",
                r.solver_name,
                r.verdict.as_str(),
                r.exit_code,
                r.elapsed().as_secs_f64(),
                r.stdout_path.display(),
                r.stdout_size(),
            )?;
        }
        file.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandResult, Verdict};
    use std::time::{Duration, SystemTime};
    use tempdir::TempDir;

    fn sample_outcome() -> Outcome {
        let now = SystemTime::now();
        Outcome {
            winner: Some("z3".into()),
            verdict: Verdict::Sat,
            elapsed: Duration::from_millis(120),
            disagreement: false,
            results: vec![CommandResult {
                solver_name: "z3".into(),
                verdict: Verdict::Sat,
                exit_code: 0,
                started_at: now,
                ended_at: now,
                stdout_path: "/tmp/x.smt2.z3.out".into(),
                stderr: Vec::new(),
                cancelled: false,
            }],
        }
    }

    #[test]
    fn stdout_summary_is_two_lines() {
        let outcome = sample_outcome();
        let mut buf = Vec::new();
        write_stdout_summary(&mut buf, &outcome).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "sat");
        assert!(lines[1].starts_with(';'));
    }

    #[test]
    fn stdout_summary_matches_literal_winner_format() {
        let outcome = Outcome {
            winner: Some("always-sat".into()),
            ..sample_outcome()
        };
        let mut buf = Vec::new();
        write_stdout_summary(&mut buf, &outcome).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "sat\n; (result from always-sat)\n"
        );
    }

    #[test]
    fn stdout_summary_without_winner_has_no_result_line() {
        let outcome = Outcome {
            winner: None,
            verdict: Verdict::Unknown,
            ..sample_outcome()
        };
        let mut buf = Vec::new();
        write_stdout_summary(&mut buf, &outcome).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("unknown\n"));
        assert!(!text.contains("result from"));
    }

    #[test]
    fn csv_written_atomically() {
        let tmp = TempDir::new("jsi-output-test").unwrap();
        let csv_path = tmp.path().join("results.csv");
        let outcome = sample_outcome();
        write_csv_atomic(&csv_path, &outcome).unwrap();
        assert!(csv_path.exists());
        assert!(!csv_path.with_extension("csv.tmp").exists());
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("solver,result,exit,time,output file,size"));
        assert!(content.contains("z3,sat,0,"));
    }
}
