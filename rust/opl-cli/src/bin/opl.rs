//! `opl`: compile, inspect and run OPL programs.

use clap::Parser;
use opl_cli::commands::{execute, Cli, Settings};
use opl_cli::config::OplConfig;
use opl_cli::error_chain::ErrorChain;

fn run() -> Result<(), ErrorChain> {
    let cli = Cli::parse();
    opl_cli::init_logging(cli.global.verbose);

    let (path, config) = OplConfig::discover()?;
    if let Some(path) = &path {
        tracing::info!(config = %path.display(), "using config");
    }
    let settings = Settings::resolve(&config, &cli.global);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli, &settings, &mut out)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err.render());
        std::process::exit(1);
    }
}
