use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JsiError, Result};
use crate::paths::JsiDirectory;

/// A solver as declared in `solvers.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverDef {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Executable name to resolve on PATH, or an absolute path.
    pub executable: String,
    /// Argv template; `{file}` is substituted with the input path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Argv tokens appended when a request asks for a model/witness.
    #[serde(default)]
    pub model_arg: Vec<String>,
    /// Exit-code -> verdict overrides, consulted before stdout classification.
    #[serde(default)]
    pub verdict_map: HashMap<i32, String>,
    /// Virtual solvers that never actually run a binary.
    #[serde(default)]
    pub always_sat: bool,
    #[serde(default)]
    pub always_unsat: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CatalogueFile {
    solvers: Vec<SolverDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CacheFile {
    /// executable name -> resolved absolute path
    resolved: HashMap<String, PathBuf>,
}

const BUNDLED_DEFAULTS: &str = r#"{
  "solvers": [
    { "name": "z3", "enabled": true, "executable": "z3", "args": ["{file}"], "model_arg": ["-model"] },
    { "name": "cvc5", "enabled": true, "executable": "cvc5", "args": ["{file}"], "model_arg": ["--produce-models"] },
    { "name": "yices", "enabled": true, "executable": "yices-smt2", "args": ["{file}"], "model_arg": ["--smt2-model-format"] },
    { "name": "always-sat", "enabled": false, "executable": "true", "always_sat": true },
    { "name": "always-unsat", "enabled": false, "executable": "true", "always_unsat": true }
  ]
}"#;

/// Scaffolds `~/.jsi/solvers.json` from the bundled defaults for first-time
/// users (`jsi init`). Leaves an existing user file alone unless `force`.
pub fn scaffold(dir: &JsiDirectory, force: bool) -> Result<()> {
    let path = dir.solvers_file();
    if path.exists() && !force {
        return Ok(());
    }
    std::fs::write(&path, BUNDLED_DEFAULTS)?;
    Ok(())
}

/// Component A: resolves solver names to executables and builds their argv.
pub struct Catalogue {
    solvers: Vec<SolverDef>,
    cache_path: PathBuf,
}

impl Catalogue {
    /// Loads `~/.jsi/solvers.json`, falling back to the bundled defaults if
    /// the file does not exist. A malformed file is a configuration error.
    pub fn load(dir: &JsiDirectory) -> Result<Self> {
        let solvers_path = dir.solvers_file();
        let file: CatalogueFile = if solvers_path.exists() {
            let raw = std::fs::read_to_string(&solvers_path)?;
            serde_json::from_str(&raw).map_err(|source| JsiError::Configuration {
                path: solvers_path.clone(),
                source,
            })?
        } else {
            serde_json::from_str(BUNDLED_DEFAULTS).expect("bundled defaults are valid JSON")
        };

        let mut seen = std::collections::HashSet::new();
        for s in &file.solvers {
            if !seen.insert(&s.name) {
                use serde::de::Error as _;
                return Err(JsiError::Configuration {
                    path: solvers_path,
                    source: serde_json::Error::custom(format!(
                        "duplicate solver name `{}`",
                        s.name
                    )),
                });
            }
        }

        Ok(Self {
            solvers: file.solvers,
            cache_path: dir.cache_file(),
        })
    }

    /// Returns the solvers to race for a request: the explicit `sequence` in
    /// declaration order if given, otherwise every `enabled` entry.
    pub fn select(&self, sequence: Option<&[String]>) -> Result<Vec<SolverDef>> {
        match sequence {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.solvers
                        .iter()
                        .find(|s| &s.name == name)
                        .cloned()
                        .ok_or_else(|| JsiError::Resolution {
                            name: name.clone(),
                            reason: "not declared in solvers.json".into(),
                        })
                })
                .collect(),
            None => Ok(self
                .solvers
                .iter()
                .filter(|s| s.enabled)
                .cloned()
                .collect()),
        }
    }

    /// Resolves `solver.executable` to an absolute path, consulting (and
    /// updating) `cache.json`. Virtual solvers (`always_sat`/`always_unsat`)
    /// never need resolution and always return `None`.
    pub fn resolve_executable(&self, solver: &SolverDef) -> Result<Option<PathBuf>> {
        if solver.always_sat || solver.always_unsat {
            return Ok(None);
        }

        let raw = Path::new(&solver.executable);
        if raw.is_absolute() {
            return Ok(Some(raw.to_path_buf()));
        }

        let mut cache = self.read_cache();
        if let Some(cached) = cache.resolved.get(&solver.executable) {
            if cached.exists() {
                return Ok(Some(cached.clone()));
            }
        }

        let resolved = which(&solver.executable).ok_or_else(|| JsiError::Resolution {
            name: solver.name.clone(),
            reason: format!("`{}` not found on PATH", solver.executable),
        })?;

        cache
            .resolved
            .insert(solver.executable.clone(), resolved.clone());
        self.write_cache_atomic(&cache)?;

        Ok(Some(resolved))
    }

    /// Builds the argv for invoking `solver` against `input_file`, applying
    /// `{file}` substitution and an optional model-producing flag.
    pub fn build_args(&self, solver: &SolverDef, input_file: &Path, want_model: bool) -> Vec<String> {
        let file_str = input_file.to_string_lossy().to_string();
        let mut args: Vec<String> = solver
            .args
            .iter()
            .map(|a| a.replace("{file}", &file_str))
            .collect();
        if want_model {
            args.extend(solver.model_arg.iter().cloned());
        }
        args
    }

    /// The convention-based stdout capture path for one solver run:
    /// `{input_path}.{solver_name}.out`, alongside the input file unless
    /// `output_dir` redirects it.
    pub fn stdout_path_for(input_file: &Path, solver_name: &str) -> PathBuf {
        let mut name = input_file.as_os_str().to_os_string();
        name.push(format!(".{solver_name}.out"));
        PathBuf::from(name)
    }

    /// As `stdout_path_for`, but rooted under `output_dir` (keyed by the
    /// input file's own basename so multiple inputs don't collide).
    pub fn stdout_path_in(output_dir: &Path, input_file: &Path, solver_name: &str) -> PathBuf {
        let base = input_file
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| input_file.as_os_str().to_os_string());
        let mut name = base;
        name.push(format!(".{solver_name}.out"));
        output_dir.join(name)
    }

    fn read_cache(&self) -> CacheFile {
        std::fs::read_to_string(&self.cache_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Writes `cache.json` via write-tmp-then-rename so readers never
    /// observe a truncated file.
    fn write_cache_atomic(&self, cache: &CacheFile) -> Result<()> {
        let tmp_path = self.cache_path.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(cache)
            .map_err(|e| JsiError::Internal(format!("failed to serialize cache: {e}")))?;
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.cache_path)?;
        Ok(())
    }
}

/// Minimal PATH scan, avoiding a dependency on the `which` crate for a single
/// directory-listing loop.
fn which(executable: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(executable);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
