//! CLI entrypoint for `boundary-provision`.

use boundary_provision_cli::cli::Args;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    boundary_provision_cli::run(&args)?;
    Ok(())
}
