//! Cell dispatch: directive → script → temp file → runner → relayed output.

use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
    config::DispatcherConfig,
    directive::{Directive, ExecutionRequest, Mode},
    mpi::{self, Detection, MpiImplementation},
    printer::{Summary, TextPrinter},
    process::{self, LaunchPlan},
    template::Script,
};

/// Everything observed during one dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub script: &'static str,
    pub plan: LaunchPlan,
    pub implementation: MpiImplementation,
    pub mpi_version: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub detection: Detection,
}

impl RunOutcome {
    /// The child exited with status 0. A failed child is never an `Err`.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    cfg: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(cfg: DispatcherConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    /// Parse a directive line against this dispatcher's default process count.
    pub fn prepare(&self, line: &str, source: &str) -> Result<ExecutionRequest> {
        let directive = Directive::parse(line, self.cfg.default_process_count)?;
        Ok(ExecutionRequest::new(directive, source))
    }

    pub async fn dispatch(&self, request: &ExecutionRequest) -> Result<RunOutcome> {
        let script = match request.mode {
            Mode::Info => Script::Info,
            Mode::Timed => Script::Timed(request.source_text.clone()),
            Mode::Normal => Script::Plain(request.source_text.clone()),
        };
        self.run_script(&script, request).await
    }

    /// Render `script`, run it as `request` describes, and always remove the temp file.
    pub async fn run_script(&self, script: &Script, request: &ExecutionRequest) -> Result<RunOutcome> {
        let env = process::child_environment(&self.cfg, &request.environment_overrides);
        let detection =
            mpi::probe(&self.cfg.probe_program, &env, self.cfg.probe_timeout).await;
        let implementation = detection.implementation();
        if let Detection::Unknown { reason } = &detection {
            info!(%reason, fallback = %implementation, "MPI implementation not detected");
        }

        let file = write_script(&script.render())?;
        let plan = LaunchPlan::new(&self.cfg, implementation, request.process_count, file.path());
        info!(
            script = script.kind(),
            np = request.process_count,
            multi = plan.is_multi_process(),
            mpi = %implementation,
            argv = ?plan.argv(),
            "dispatching cell"
        );

        let captured = process::execute(&plan, &env).await;
        let path = file.path().to_path_buf();
        if let Err(e) = file.close() {
            warn!(path = %path.display(), error = %e, "failed to remove temp script");
        } else {
            debug!(path = %path.display(), "temp script removed");
        }
        let captured = captured?;

        if !captured.success() {
            info!(code = ?captured.code, "cell exited with failure");
        }

        Ok(RunOutcome {
            script: script.kind(),
            plan,
            implementation,
            mpi_version: detection.banner_line().to_string(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code: captured.code,
            detection,
        })
    }

    /// Print the relayed output and, in info mode, the runtime summary.
    pub fn report<W: Write>(
        &self,
        w: &mut W,
        printer: &TextPrinter,
        request: &ExecutionRequest,
        outcome: &RunOutcome,
    ) -> io::Result<()> {
        printer.relay(w, &outcome.stdout, &outcome.stderr)?;
        if request.mode == Mode::Info {
            let runner = self.cfg.runner_path.to_string_lossy();
            printer.summary(
                w,
                &Summary {
                    environment: &self.cfg.environment_name,
                    runner: &runner,
                    implementation: outcome.implementation.id(),
                    version: &outcome.mpi_version,
                    process_count: request.process_count,
                },
            )?;
        }
        Ok(())
    }
}

fn write_script(text: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("fenicsx-")
        .suffix(".py")
        .tempfile()
        .context("creating temp script")?;
    file.write_all(text.as_bytes())
        .context("writing temp script")?;
    file.flush().context("writing temp script")?;
    debug!(path = %file.path().display(), bytes = text.len(), "temp script written");
    Ok(file)
}
