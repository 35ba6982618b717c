//! Minimal low-latency daemon client: the same wire round-trip as
//! `jsi-client`, but blocking and with no async runtime to initialize, for
//! callers where per-process startup overhead matters (spec §4.E).

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::ExitCode;

use jsi::paths::JsiDirectory;

fn main() -> ExitCode {
    let Some(input_file) = env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: jsi-client-lite <absolute-input-file>");
        return ExitCode::from(2);
    };

    if !input_file.is_absolute() {
        eprintln!("input file must be an absolute path: {}", input_file.display());
        return ExitCode::from(2);
    }

    let dir = match JsiDirectory::try_default() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let mut stream = match UnixStream::connect(dir.socket_path()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to connect to daemon: {e}");
            return ExitCode::from(2);
        }
    };

    let mut request = input_file.to_string_lossy().into_owned();
    request.push('\n');
    if let Err(e) = stream.write_all(request.as_bytes()) {
        eprintln!("error: failed to send request: {e}");
        return ExitCode::from(2);
    }
    if let Err(e) = stream.shutdown(std::net::Shutdown::Write) {
        eprintln!("error: failed to half-close: {e}");
        return ExitCode::from(2);
    }

    let mut response = String::new();
    if let Err(e) = stream.read_to_string(&mut response) {
        eprintln!("error: failed to read response: {e}");
        return ExitCode::from(2);
    }
    print!("{response}");

    match response.lines().next() {
        Some("sat") | Some("unsat") => ExitCode::from(0),
        Some("unknown") => ExitCode::from(1),
        _ => ExitCode::from(2),
    }
}
