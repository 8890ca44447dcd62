//! Child environment, command line construction and captured execution.

use std::{
    collections::BTreeMap,
    env,
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::{config::DispatcherConfig, mpi::MpiImplementation};

/// Variables that let Open MPI launch ranks as root (Colab runs as root).
pub const ROOT_PERMISSION_FLAGS: [(&str, &str); 2] = [
    ("OMPI_ALLOW_RUN_AS_ROOT", "1"),
    ("OMPI_ALLOW_RUN_AS_ROOT_CONFIRM", "1"),
];

/// Environment handed to child processes. Host variables are kept as raw
/// OS strings, so names and values need not be UTF-8.
pub type ChildEnv = BTreeMap<OsString, OsString>;

/// Copy of the current environment with the launcher flags and `overrides` on top.
pub fn child_environment(cfg: &DispatcherConfig, overrides: &BTreeMap<String, String>) -> ChildEnv {
    let mut env: ChildEnv = env::vars_os().collect();
    apply_overlay(&mut env, cfg, overrides);
    env
}

fn apply_overlay(env: &mut ChildEnv, cfg: &DispatcherConfig, overrides: &BTreeMap<String, String>) {
    for (k, v) in ROOT_PERMISSION_FLAGS {
        env.insert(k.into(), v.into());
    }

    if let Some(prefix) = &cfg.root_prefix {
        env.insert("MAMBA_ROOT_PREFIX".into(), prefix.clone().into_os_string());
        if let Some(dir) = cfg.runner_dir() {
            let path = prepend_path(dir, env.get(OsStr::new("PATH")).map(OsString::as_os_str));
            env.insert("PATH".into(), path);
        }
    }

    for (k, v) in overrides {
        env.insert(k.into(), v.into());
    }
}

fn prepend_path(dir: &Path, current: Option<&OsStr>) -> OsString {
    let mut parts = vec![dir.to_path_buf()];
    if let Some(cur) = current {
        parts.extend(env::split_paths(cur));
    }
    env::join_paths(parts).unwrap_or_else(|_| current.unwrap_or_default().to_os_string())
}

/// Program and arguments for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub process_count: usize,
}

impl LaunchPlan {
    /// `<runner> run -n <env> python <script>` for one rank, otherwise
    /// `<runner> run -n <env> <launcher> -n <count> python <script>`.
    pub fn new(
        cfg: &DispatcherConfig,
        implementation: MpiImplementation,
        process_count: usize,
        script: &Path,
    ) -> Self {
        let mut args = vec![
            "run".to_string(),
            "-n".to_string(),
            cfg.environment_name.clone(),
        ];
        if process_count > 1 {
            args.push(implementation.launcher().to_string());
            args.push("-n".to_string());
            args.push(process_count.to_string());
        }
        args.push(cfg.python.clone());
        args.push(script.to_string_lossy().into_owned());

        Self {
            program: cfg.runner_path.to_string_lossy().into_owned(),
            args,
            process_count,
        }
    }

    pub fn is_multi_process(&self) -> bool {
        self.process_count > 1
    }

    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

/// Text captured from a finished child.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run the plan to completion. Only a failure to start the program is an error;
/// a non-zero exit is reported through `Captured::code`.
pub async fn execute(plan: &LaunchPlan, env: &ChildEnv) -> Result<Captured> {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", plan.program))?;
    let out = child
        .wait_with_output()
        .await
        .with_context(|| format!("failed waiting on {}", plan.program))?;

    debug!(code = ?out.status.code(), "child exited");
    Ok(Captured {
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        code: out.status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg() -> DispatcherConfig {
        DispatcherConfig::default()
    }

    fn var<'a>(env: &'a ChildEnv, key: &str) -> Option<&'a str> {
        env.get(OsStr::new(key)).and_then(|v| v.to_str())
    }

    #[test]
    fn single_process_form() {
        let plan = LaunchPlan::new(&cfg(), MpiImplementation::OpenMpi, 1, Path::new("/tmp/a.py"));
        assert_eq!(
            plan.argv(),
            vec!["/content/micromamba/bin/micromamba", "run", "-n", "fenicsx", "python", "/tmp/a.py"]
        );
        assert!(!plan.is_multi_process());
    }

    #[test]
    fn multi_process_form_uses_detected_launcher() {
        let plan = LaunchPlan::new(&cfg(), MpiImplementation::OpenMpi, 4, Path::new("/tmp/a.py"));
        assert_eq!(
            plan.args,
            vec!["run", "-n", "fenicsx", "mpirun", "-n", "4", "python", "/tmp/a.py"]
        );
        assert!(plan.is_multi_process());

        let plan = LaunchPlan::new(&cfg(), MpiImplementation::Mpich, 2, Path::new("/tmp/a.py"));
        assert_eq!(plan.args[3..6], ["mpiexec", "-n", "2"]);
    }

    #[test]
    fn overlay_sets_root_flags_and_overrides() {
        let mut env = ChildEnv::new();
        env.insert("OMPI_ALLOW_RUN_AS_ROOT".into(), "0".into());
        let mut overrides = BTreeMap::new();
        overrides.insert("OMP_NUM_THREADS".to_string(), "1".to_string());

        apply_overlay(&mut env, &cfg(), &overrides);
        assert_eq!(var(&env, "OMPI_ALLOW_RUN_AS_ROOT"), Some("1"));
        assert_eq!(var(&env, "OMPI_ALLOW_RUN_AS_ROOT_CONFIRM"), Some("1"));
        assert_eq!(var(&env, "OMP_NUM_THREADS"), Some("1"));
        assert!(!env.contains_key(OsStr::new("MAMBA_ROOT_PREFIX")));
    }

    #[cfg(unix)]
    #[test]
    fn root_prefix_sets_mamba_vars() {
        let cfg = DispatcherConfig {
            runner_path: PathBuf::from("/opt/mamba/bin/micromamba"),
            root_prefix: Some(PathBuf::from("/opt/mamba")),
            ..DispatcherConfig::default()
        };
        let mut env = ChildEnv::new();
        env.insert("PATH".into(), "/usr/bin:/bin".into());

        apply_overlay(&mut env, &cfg, &BTreeMap::new());
        assert_eq!(var(&env, "MAMBA_ROOT_PREFIX"), Some("/opt/mamba"));
        assert_eq!(var(&env, "PATH"), Some("/opt/mamba/bin:/usr/bin:/bin"));
    }

    #[test]
    fn child_environment_copies_host() {
        let env = child_environment(&cfg(), &BTreeMap::new());
        for (k, _) in std::env::vars_os() {
            if !k.to_string_lossy().starts_with("OMPI_ALLOW_RUN_AS_ROOT") {
                assert!(env.contains_key(&k), "missing {:?}", k);
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn child_environment_keeps_non_utf8_values() {
        use std::os::unix::ffi::OsStrExt;

        let value = OsStr::from_bytes(b"\xff\xfe");
        std::env::set_var("FENICSX_TEST_RAW_BYTES", value);
        let env = child_environment(&cfg(), &BTreeMap::new());
        std::env::remove_var("FENICSX_TEST_RAW_BYTES");

        assert_eq!(env.get(OsStr::new("FENICSX_TEST_RAW_BYTES")).map(OsString::as_os_str), Some(value));
        assert_eq!(var(&env, "OMPI_ALLOW_RUN_AS_ROOT"), Some("1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_environment_reaches_child() {
        use std::os::unix::ffi::OsStrExt;

        let mut env = ChildEnv::new();
        env.insert("PATH".into(), std::env::var_os("PATH").unwrap_or_default());
        env.insert("RAW".into(), OsStr::from_bytes(b"a\xffb").to_os_string());
        let plan = LaunchPlan {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "printf %s \"$RAW\" | od -An -tx1".into()],
            process_count: 1,
        };
        let got = execute(&plan, &env).await.unwrap();
        assert_eq!(got.stdout.split_whitespace().collect::<Vec<_>>(), ["61", "ff", "62"]);
    }

    #[tokio::test]
    async fn missing_program_is_launch_error() {
        let plan = LaunchPlan {
            program: "fenicsx-no-such-runner".into(),
            args: vec![],
            process_count: 1,
        };
        let err = execute(&plan, &ChildEnv::new()).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn fenicsx-no-such-runner"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_captured() {
        let plan = LaunchPlan {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "echo out; echo err >&2; exit 3".into()],
            process_count: 1,
        };
        let got = execute(&plan, &ChildEnv::new()).await.unwrap();
        assert_eq!(got.stdout, "out\n");
        assert_eq!(got.stderr, "err\n");
        assert_eq!(got.code, Some(3));
        assert!(!got.success());
    }
}
