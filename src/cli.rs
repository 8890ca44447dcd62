use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "fenicsx", about = "Run FEniCSx code cells under micromamba and MPI", version)]
pub struct Cli {
    /// Package-environment runner (overrides FENICSX_RUNNER).
    #[arg(long, global = true)]
    pub runner: Option<String>,

    /// Name of the micromamba environment (overrides FENICSX_ENV_NAME).
    #[arg(long = "env-name", global = true)]
    pub env_name: Option<String>,

    /// Print the run outcome as JSON instead of relaying output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a code cell read from FILE or stdin.
    Run(RunArgs),

    /// Show Python, dolfinx, platform and MPI diagnostics.
    Info(RanksArgs),

    /// Run the bundled dolfinx smoke test.
    Check(RanksArgs),

    /// Provision the environment with the installer script.
    Install {
        /// Installer script (overrides FENICSX_INSTALL_SCRIPT).
        #[arg(long)]
        script: Option<String>,

        /// Flags passed through to the installer (e.g. --clean, --complex, --real).
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        opts: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directive line, e.g. "-np 4 --time".
    #[arg(short = 'l', long, default_value = "", allow_hyphen_values = true)]
    pub line: String,

    /// Extra variable for the child environment (KEY=VALUE, repeatable).
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    /// Code file; stdin when omitted.
    #[arg(value_name = "FILE")]
    pub file: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RanksArgs {
    /// Number of MPI ranks.
    #[arg(short = 'n', long = "np")]
    pub np: Option<usize>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
