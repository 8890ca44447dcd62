//! Front-end for the FEniCSx provisioning script.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::info;

/// Run `bash <script> <opts...>` from `cwd`, inheriting stdio.
/// Flags such as `--clean`, `--complex` or `--real` are passed through untouched.
pub async fn install(script: &Path, opts: &[String], cwd: &Path) -> Result<()> {
    let resolved = if script.is_absolute() {
        script.to_path_buf()
    } else {
        cwd.join(script)
    };
    if !resolved.is_file() {
        bail!("install_fenicsx.sh not found: {}", resolved.display());
    }

    let shown = std::iter::once("bash".to_string())
        .chain(std::iter::once(resolved.display().to_string()))
        .chain(opts.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    println!("$ {}", shown);
    info!(script = %resolved.display(), ?opts, "running installer");

    let status = Command::new("bash")
        .arg(&resolved)
        .args(opts)
        .current_dir(cwd)
        .status()
        .await
        .context("failed to spawn bash")?;

    if !status.success() {
        bail!(
            "installer exited with {}",
            status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into())
        );
    }
    Ok(())
}
