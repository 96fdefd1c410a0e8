//! Orphan sweeper for Gauntlet instances.
//!
//! This binary discovers instances carrying the session tag and destroys
//! them, for cleaning up after interrupted or crashed runs. `--dry-run`
//! lists what would be destroyed without touching anything.

use clap::Parser;
use gauntlet::{DigitalOceanProvider, ResourceController};
use std::io::Write as _;

#[derive(Debug, Parser)]
#[command(
    name = "gauntlet-janitor",
    about = "Delete orphaned instances carrying the Gauntlet session tag"
)]
struct Cli {
    /// DigitalOcean API token.
    #[arg(long, env = "DIGITALOCEAN_TOKEN", hide_env_values = true)]
    token: String,
    /// Tag identifying harness-owned instances.
    #[arg(long, default_value = "gauntlet-test")]
    tag: String,
    /// List matching instances without destroying them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    let provider = DigitalOceanProvider::new(cli.token).map_err(|err| err.to_string())?;
    let mut controller = ResourceController::new(provider);
    let mut stdout = std::io::stdout();

    if cli.dry_run {
        let records = controller
            .list_by_tag(&cli.tag)
            .await
            .map_err(|err| err.to_string())?;
        if records.is_empty() {
            writeln!(stdout, "no orphaned instances found").map_err(|err| err.to_string())?;
            return Ok(());
        }
        for record in records {
            writeln!(
                stdout,
                "{}\t{}\t{}",
                record.name,
                record.id,
                record.status.as_str()
            )
            .map_err(|err| err.to_string())?;
        }
        return Ok(());
    }

    let count = controller
        .destroy_all(&cli.tag)
        .await
        .map_err(|err| err.to_string())?;
    writeln!(stdout, "janitor sweep complete: destroyed={count}")
        .map_err(|err| err.to_string())?;
    Ok(())
}
