//! Scheduled backup job, meant to be run from cron
//!
//! Builds an archive when the configured interval has elapsed, records the
//! checkpoint and prunes old archives. Prints one JSON line on success.

use anyhow::Context;

fn main() {
    tribefinder_cli::init_logging();

    if let Err(e) = run() {
        eprintln!("auto-backup failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = tribefinder_cli::load_config().context("invalid configuration")?;
    let outcome = tribefinder_cli::run_auto(&config).context("scheduled backup failed")?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}
