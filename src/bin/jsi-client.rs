//! Full-runtime daemon client: connects to `~/.jsi/daemon/server.sock`,
//! streams the input path, half-closes, and relays the response to stdout.
//! Useful when embedded in a larger async program, or for parity testing
//! against `jsi-client-lite`. Both speak the identical wire protocol
//! (spec §4.E, §6).

use std::path::PathBuf;

use anyhow::{bail, Context};
use structopt::StructOpt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use jsi::paths::JsiDirectory;

#[derive(StructOpt)]
#[structopt(name = "jsi-client")]
struct Opts {
    /// Absolute path to the SMT-LIB 2 input file.
    #[structopt(parse(from_os_str))]
    input_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::from_args();
    let dir = JsiDirectory::try_default()?;
    let socket_path = dir.socket_path();

    if !opts.input_file.is_absolute() {
        bail!("input file must be an absolute path: {:?}", opts.input_file);
    }

    let mut stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;

    let mut request = opts.input_file.to_string_lossy().into_owned();
    request.push('\n');
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    print!("{response}");

    let exit = match response.lines().next() {
        Some("sat") | Some("unsat") => 0,
        Some("unknown") => 1,
        _ => 2,
    };
    std::process::exit(exit);
}
