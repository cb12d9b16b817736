use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    property_index_cli::init_tracing()?;
    let cli = property_index_cli::Cli::parse();
    property_index_cli::run_cli(cli)
}
