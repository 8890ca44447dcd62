mod cli;
mod config;
mod directive;
mod execution;
mod installer;
mod mpi;
mod printer;
mod process;
mod template;
mod utils;

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Result};
use config::{Config, DispatcherConfig};
use directive::{Directive, ExecutionRequest, Mode};
use execution::{Dispatcher, RunOutcome};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use printer::TextPrinter;
use template::Script;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr so relayed stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli::Cli::parse()).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Returns the exit code to use: the child's own code, or 0.
async fn run(args: cli::Cli) -> Result<i32> {
    let cfg = Config::load();
    debug!(path = %cfg.config_path.display(), "configuration loaded");

    if let cli::Command::Install { script, opts } = &args.command {
        let script = script
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| cfg.install_script());
        println!("\u{1f527} Installing FEniCSx environment...");
        installer::install(&script, opts, &std::env::current_dir()?).await?;
        println!("\u{2705} FEniCSx environment ready");
        return Ok(0);
    }

    let mut dc = DispatcherConfig::from_config(&cfg)?;
    if let Some(runner) = &args.runner {
        dc.runner_path = PathBuf::from(runner);
    }
    if let Some(name) = &args.env_name {
        dc.environment_name = name.clone();
    }
    let dispatcher = Dispatcher::new(dc);

    let (request, outcome) = match &args.command {
        cli::Command::Run(run) => {
            let source = match run.file.as_deref() {
                Some(path) => utils::read_cell(path)?,
                None => read_stdin()?,
            };
            let mut request = dispatcher.prepare(&run.line, &source)?;
            for pair in &run.env {
                let Some((key, value)) = pair.split_once('=') else {
                    bail!("--env expects KEY=VALUE, got '{}'", pair);
                };
                request = request.with_override(key, value);
            }
            let outcome = dispatcher.dispatch(&request).await?;
            (request, outcome)
        }
        cli::Command::Info(ranks) => {
            let request = ranks_request(&dispatcher, ranks.np, Mode::Info)?;
            let outcome = dispatcher.dispatch(&request).await?;
            (request, outcome)
        }
        cli::Command::Check(ranks) => {
            let request = ranks_request(&dispatcher, ranks.np, Mode::Normal)?;
            println!("\u{1f9ea} Running FEniCSx smoke test...");
            let outcome = dispatcher.run_script(&Script::Check, &request).await?;
            (request, outcome)
        }
        cli::Command::Install { .. } => unreachable!("handled above"),
    };

    emit(&dispatcher, &request, &outcome, args.json)?;
    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    if outcome.success() {
        return 0;
    }
    outcome.exit_code.unwrap_or(1)
}

fn text_printer() -> TextPrinter {
    TextPrinter {
        color: io::stdout().is_terminal(),
    }
}

fn ranks_request(dispatcher: &Dispatcher, np: Option<usize>, mode: Mode) -> Result<ExecutionRequest> {
    let process_count = np.unwrap_or(dispatcher.config().default_process_count);
    if process_count == 0 {
        bail!(directive::DirectiveError::ZeroProcessCount);
    }
    Ok(ExecutionRequest::new(Directive { process_count, mode }, ""))
}

fn read_stdin() -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        bail!("Provide a code FILE or pipe the cell on stdin");
    }
    let mut buf = String::new();
    stdin.lock().read_to_string(&mut buf)?;
    Ok(buf)
}

fn emit(dispatcher: &Dispatcher, request: &ExecutionRequest, outcome: &RunOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    let mut out = io::stdout().lock();
    dispatcher.report(&mut out, &text_printer(), request, outcome)?;
    Ok(())
}
