use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = fleet_leads_cli::Cli::parse();
    fleet_leads_cli::run_cli(cli)
}
