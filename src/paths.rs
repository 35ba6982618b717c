use std::path::{Path, PathBuf};

use crate::error::{JsiError, Result};

const PATH_SOLVERS: &str = "solvers.json";
const PATH_CACHE: &str = "cache.json";
const DAEMON_DIR: &str = "daemon";
const PATH_SOCKET: &str = "server.sock";
const PATH_PID: &str = "server.pid";
const PATH_STDOUT: &str = "server.out";
const PATH_STDERR: &str = "server.err";

const DEFAULT_DIR_NAME: &str = ".jsi";

/// Resolves and ensures existence of the `~/.jsi` state directory and its
/// children. Mirrors the layout fixed by the wire/state section of the spec.
pub struct JsiDirectory {
    pub data_dir: PathBuf,
}

impl JsiDirectory {
    pub fn try_new(data_dir: PathBuf) -> Result<Self> {
        if data_dir.exists() {
            if !data_dir.is_dir() {
                return Err(JsiError::Internal(format!(
                    "{} exists and is not a directory",
                    data_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&data_dir)?;
        }
        let daemon_dir = data_dir.join(DAEMON_DIR);
        if !daemon_dir.exists() {
            std::fs::create_dir_all(&daemon_dir)?;
        }
        Ok(Self { data_dir })
    }

    /// Resolves `~/.jsi`, honoring `HOME` as named in the spec's environment
    /// variable section.
    pub fn try_default() -> Result<Self> {
        let home = std::env::var_os("HOME").ok_or_else(|| {
            JsiError::Internal("HOME is not set; cannot locate ~/.jsi".into())
        })?;
        Self::try_new(PathBuf::from(home).join(DEFAULT_DIR_NAME))
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_path()
    }

    pub fn solvers_file(&self) -> PathBuf {
        self.data_dir.join(PATH_SOLVERS)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join(PATH_CACHE)
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.data_dir.join(DAEMON_DIR)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.daemon_dir().join(PATH_SOCKET)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.daemon_dir().join(PATH_PID)
    }

    pub fn daemon_stdout_file(&self) -> PathBuf {
        self.daemon_dir().join(PATH_STDOUT)
    }

    pub fn daemon_stderr_file(&self) -> PathBuf {
        self.daemon_dir().join(PATH_STDERR)
    }
}

#[cfg(test)]
mod test {
    use tempdir::TempDir;

    const PREFIX: &str = "jsi-dir-test";
    const DATA_DIR: &str = ".jsi";

    #[test]
    fn try_new_not_existing() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let data_dir = tmp_dir.path().join(DATA_DIR);
        let dir = super::JsiDirectory::try_new(data_dir.clone());
        assert!(dir.is_ok());
        assert!(data_dir.exists());
        assert!(data_dir.join("daemon").exists());
    }

    #[test]
    fn try_new_existing() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let data_dir = tmp_dir.path().join(DATA_DIR);
        std::fs::create_dir_all(&data_dir).unwrap();
        let dir = super::JsiDirectory::try_new(data_dir.clone());
        assert!(dir.is_ok());
    }

    #[test]
    fn try_new_not_dir() {
        let tmp_dir = TempDir::new(PREFIX).unwrap();
        let data_dir = tmp_dir.path().join(DATA_DIR);
        std::fs::File::create(&data_dir).unwrap();
        let dir = super::JsiDirectory::try_new(data_dir.clone());
        assert!(dir.is_err());
    }

    macro_rules! check_filename {
        ($name:ident, $ref:literal) => {
            #[test]
            fn $name() {
                let tmp_dir = TempDir::new(PREFIX).unwrap();
                let data_dir = tmp_dir.path().join(DATA_DIR);
                let dir = super::JsiDirectory::try_new(data_dir.clone()).unwrap();
                let file = dir.$name();
                assert_eq!(file.file_name().unwrap(), $ref);
            }
        };
    }

    check_filename!(solvers_file, "solvers.json");
    check_filename!(cache_file, "cache.json");
    check_filename!(socket_path, "server.sock");
    check_filename!(pid_file, "server.pid");
}
