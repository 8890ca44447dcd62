//! MPI implementation detection from the launcher's version banner.

use std::{fmt, process::Stdio, time::Duration};

use serde::Serialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::process::ChildEnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MpiImplementation {
    OpenMpi,
    Mpich,
}

impl MpiImplementation {
    pub const FALLBACK: Self = Self::Mpich;

    /// Launcher binary used for multi-process runs.
    pub fn launcher(self) -> &'static str {
        match self {
            Self::OpenMpi => "mpirun",
            Self::Mpich => "mpiexec",
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::OpenMpi => "openmpi",
            Self::Mpich => "mpich",
        }
    }
}

impl fmt::Display for MpiImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Outcome of probing `<launcher> --version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Detection {
    Detected {
        implementation: MpiImplementation,
        banner: String,
    },
    Unknown {
        reason: String,
    },
}

impl Detection {
    pub fn from_banner(banner: impl Into<String>) -> Self {
        let banner = banner.into();
        Self::Detected {
            implementation: classify(&banner),
            banner,
        }
    }

    pub fn implementation(&self) -> MpiImplementation {
        match self {
            Self::Detected { implementation, .. } => *implementation,
            Self::Unknown { .. } => MpiImplementation::FALLBACK,
        }
    }

    /// First line of the banner, or `unknown` when the probe failed.
    pub fn banner_line(&self) -> &str {
        match self {
            Self::Detected { banner, .. } => banner.lines().next().unwrap_or("unknown"),
            Self::Unknown { .. } => "unknown",
        }
    }
}

pub fn classify(banner: &str) -> MpiImplementation {
    let lower = banner.to_lowercase();
    if lower.contains("open mpi") || lower.contains("open-mpi") {
        MpiImplementation::OpenMpi
    } else {
        MpiImplementation::FALLBACK
    }
}

/// Runs `<program> --version` under `env`. Never fails: any error becomes `Unknown`.
pub async fn probe(
    program: &str,
    env: &ChildEnv,
    limit: Duration,
) -> Detection {
    let mut cmd = Command::new(program);
    cmd.arg("--version")
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            debug!(program, error = %e, "MPI probe could not start");
            return Detection::Unknown {
                reason: format!("failed to start {}: {}", program, e),
            };
        }
    };

    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(out)) => {
            let mut banner = String::from_utf8_lossy(&out.stdout).into_owned();
            banner.push_str(&String::from_utf8_lossy(&out.stderr));
            let detection = Detection::from_banner(banner);
            debug!(implementation = %detection.implementation(), "MPI probe finished");
            detection
        }
        Ok(Err(e)) => Detection::Unknown {
            reason: format!("{} --version failed: {}", program, e),
        },
        Err(_) => {
            warn!(program, ?limit, "MPI probe timed out");
            Detection::Unknown {
                reason: format!("{} --version timed out after {:?}", program, limit),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_env() -> ChildEnv {
        std::env::vars_os().collect()
    }

    #[test]
    fn classify_open_mpi_variants() {
        assert_eq!(classify("mpirun (Open MPI) 4.1.5"), MpiImplementation::OpenMpi);
        assert_eq!(classify("Report bugs to http://www.open-mpi.org/"), MpiImplementation::OpenMpi);
        assert_eq!(classify("OPEN MPI"), MpiImplementation::OpenMpi);
    }

    #[test]
    fn classify_falls_back_to_mpich() {
        assert_eq!(classify("HYDRA build details:\n    Version: 4.1.2"), MpiImplementation::Mpich);
        assert_eq!(classify(""), MpiImplementation::Mpich);
    }

    #[test]
    fn detected_fallback_is_distinguishable_from_unknown() {
        let by_banner = Detection::from_banner("HYDRA build details:");
        let by_failure = Detection::Unknown { reason: "missing".into() };
        assert_eq!(by_banner.implementation(), by_failure.implementation());
        assert_ne!(by_banner, by_failure);
        assert!(matches!(by_banner, Detection::Detected { .. }));
    }

    #[test]
    fn banner_line_is_first_line() {
        let d = Detection::from_banner("mpirun (Open MPI) 4.1.5\n\nReport bugs");
        assert_eq!(d.banner_line(), "mpirun (Open MPI) 4.1.5");
        assert_eq!(Detection::from_banner("").banner_line(), "unknown");
        assert_eq!(Detection::Unknown { reason: "x".into() }.banner_line(), "unknown");
    }

    #[test]
    fn launchers() {
        assert_eq!(MpiImplementation::OpenMpi.launcher(), "mpirun");
        assert_eq!(MpiImplementation::Mpich.launcher(), "mpiexec");
    }

    #[tokio::test]
    async fn missing_probe_binary_is_unknown() {
        let env = ChildEnv::new();
        let d = probe("fenicsx-no-such-mpiexec", &env, Duration::from_secs(2)).await;
        assert!(matches!(d, Detection::Unknown { .. }));
        assert_eq!(d.implementation(), MpiImplementation::Mpich);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_reads_banner_from_fake_launcher() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("mpiexec");
        std::fs::write(&fake, "#!/bin/sh\necho 'mpiexec (OpenRTE) 4.1.5'\necho 'Open MPI' >&2\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let d = probe(fake.to_str().unwrap(), &host_env(), Duration::from_secs(5)).await;
        assert_eq!(d.implementation(), MpiImplementation::OpenMpi);
        assert_eq!(d.banner_line(), "mpiexec (OpenRTE) 4.1.5");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_probe_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("mpiexec");
        std::fs::write(&fake, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let d = probe(fake.to_str().unwrap(), &host_env(), Duration::from_millis(100)).await;
        assert!(matches!(d, Detection::Unknown { .. }));
    }
}
