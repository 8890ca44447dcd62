//! Layered configuration: defaults, `.fenicsxrc`, then `FENICSX_*` environment.

use std::{
    collections::HashMap,
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Result};
use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let rc = if config_path.exists() {
            fs::read_to_string(&config_path).ok()
        } else {
            None
        };
        let mut cfg = Self::from_sources(rc.as_deref(), config_vars(env::vars_os()));
        cfg.config_path = config_path;
        cfg
    }

    /// Builds a config from rc file text and an environment snapshot.
    /// Environment keys take precedence over the rc file.
    pub fn from_sources<I>(rc: Option<&str>, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = default_map();

        if let Some(text) = rc {
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((k, v)) = line.split_once('=') {
                    map.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }

        for (k, v) in vars {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self {
            inner: map,
            config_path: default_config_path(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).filter(|v| !v.is_empty()).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn install_script(&self) -> PathBuf {
        self.get_path("FENICSX_INSTALL_SCRIPT")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_SCRIPT))
    }
}

pub const DEFAULT_RUNNER: &str = "/content/micromamba/bin/micromamba";
pub const DEFAULT_ENV_NAME: &str = "fenicsx";
pub const DEFAULT_INSTALL_SCRIPT: &str = "setup/install_fenicsx.sh";

/// Everything the dispatcher needs to know about the host tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub runner_path: PathBuf,
    pub environment_name: String,
    pub default_process_count: usize,
    pub python: String,
    pub probe_program: String,
    pub probe_timeout: Duration,
    pub root_prefix: Option<PathBuf>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            runner_path: PathBuf::from(DEFAULT_RUNNER),
            environment_name: DEFAULT_ENV_NAME.to_string(),
            default_process_count: 1,
            python: "python".to_string(),
            probe_program: "mpiexec".to_string(),
            probe_timeout: Duration::from_secs(2),
            root_prefix: None,
        }
    }
}

impl DispatcherConfig {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base = Self::default();
        let default_process_count = match cfg.get("FENICSX_DEFAULT_NP") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => bail!("FENICSX_DEFAULT_NP must be a positive integer, got '{}'", raw),
            },
            None => base.default_process_count,
        };

        Ok(Self {
            runner_path: cfg.get_path("FENICSX_RUNNER").unwrap_or(base.runner_path),
            environment_name: cfg.get("FENICSX_ENV_NAME").unwrap_or(base.environment_name),
            default_process_count,
            python: cfg.get("FENICSX_PYTHON").unwrap_or(base.python),
            probe_program: cfg.get("FENICSX_MPI_PROBE").unwrap_or(base.probe_program),
            probe_timeout: cfg
                .get_u64("FENICSX_PROBE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.probe_timeout),
            root_prefix: cfg.get_path("FENICSX_ROOT_PREFIX"),
        })
    }

    /// Directory holding the runner binary, prepended to `PATH` when a root prefix is set.
    pub fn runner_dir(&self) -> Option<&Path> {
        self.runner_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("FENICSX_")
}

/// `FENICSX_*` entries that are valid UTF-8. Anything else in the host
/// environment is left alone, whatever its encoding.
fn config_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .filter(|(k, _)| is_config_key(k))
        .collect()
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("fenicsx").join(".fenicsxrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("FENICSX_RUNNER".into(), DEFAULT_RUNNER.into());
    m.insert("FENICSX_ENV_NAME".into(), DEFAULT_ENV_NAME.into());
    m.insert("FENICSX_DEFAULT_NP".into(), "1".into());
    m.insert("FENICSX_PYTHON".into(), "python".into());
    m.insert("FENICSX_MPI_PROBE".into(), "mpiexec".into());
    m.insert("FENICSX_PROBE_TIMEOUT_MS".into(), "2000".into());
    m.insert("FENICSX_INSTALL_SCRIPT".into(), DEFAULT_INSTALL_SCRIPT.into());
    m
}
