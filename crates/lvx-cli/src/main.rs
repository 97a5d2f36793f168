//! 🚀 lvx-cli — the front door, the bouncer, the maitre d' of logvex.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, and then lets the real code do the heavy lifting.
//! Like a manager. 🦆
//!
//! Three personalities, one binary:
//! - no flags         → pipe mode: read records from stdin, ship them
//! - `--cleanup`      → janitor mode: delete expired day indices
//! - `--reindex DATE` → archivist mode: copy one day into its own index

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lvx::lifecycle::IndexLifecycleManager;
use lvx::transport::EsTransport;

/// 🚚 Ship newline-delimited log records from stdin to files, consoles,
/// and a bulk-indexing backend. Also sweeps up after itself.
#[derive(Debug, Parser)]
#[command(name = "lvx", version, about)]
struct Cli {
    /// Path to the TOML config file. Missing file = env vars only, no drama.
    #[arg(default_value = "lvx.toml")]
    config: PathBuf,

    /// Find and delete day indices older than the retention window, then exit.
    #[arg(long, conflicts_with = "reindex")]
    cleanup: bool,

    /// Copy one day (YYYY-MM-DD) from the base index into its day index, then exit.
    #[arg(long, value_name = "DATE")]
    reindex: Option<NaiveDate>,
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
/// The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args (clap does the yelling for us now)
/// 3. Load config (the moment of truth)
/// 4. Run the chosen mode (send it and pray 🙏)
/// 5. Handle errors (cry, but with structure)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = match cli.config.try_exists().context(format!(
        "💀 Configuration file may not exist, couldn't find it. Double check that it exists, \
         or maybe, it's an issue with pwd/cwd and relative paths. In that case, use an \
         absolute path, to be absolutely certain, you are not messing this up. \
         Was checking here: '{}'",
        cli.config.display()
    ))? {
        true => Some(cli.config.as_path()),  // ✅ Found it! Better than finding my car keys
        false => None,                       // 💤 Not there. Like my motivation on Mondays.
    };

    // 🔧 Load the config — this is the moment where we find out if the TOML is valid
    // or if someone put a tab where a space should be (looking at you, Kevin)
    let app_config = lvx::app_config::load_config(config_file).context(
        "💀 In lvx-cli, main, we couldn't load the config file, take a look at the file, \
         make sure it's correct. Make sure you didn't forget something obvious, dumas",
    )?;

    // 🚀 SEND IT. No take-backs. This is not a drill.
    let result = if cli.cleanup {
        run_cleanup(app_config).await
    } else if let Some(day) = cli.reindex {
        run_reindex(app_config, day).await
    } else {
        lvx::run(app_config).await
    };

    // 💀 Error handling: the part where we find out what went wrong
    // and print it in a way that's helpful at 3am
    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            // -- 🕵️ sniff the cause like a truffle pig hunting for connection problems
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        // -- 📡 if it smells like a connection problem, it's probably a connection problem
        // -- like when your wifi icon has full bars but nothing loads
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like a service isn't reachable. \
                Double-check that the backing service (Elasticsearch, database, etc.) \
                is actually running. If you're using Docker, try: \
                `docker ps` to see what's up, or `docker compose up -d` to resurrect it. \
                Even servers need a nudge sometimes. ☕"
            );
        }

        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }

    // ✅ If we got here, everything worked. Pop the champagne. 🍾
    Ok(())
}

/// 🧰 Both maintenance modes need the same rig: a transport aimed at the
/// configured backend and a lifecycle manager for its index family.
fn lifecycle_rig(
    app_config: &lvx::app_config::AppConfig,
) -> Result<(IndexLifecycleManager, std::time::Duration)> {
    let backend = app_config.backend.as_ref().context(
        "💀 Maintenance modes need a [backend] block in the config — there is no \
         index lifecycle to manage without an indexing backend. That's just philosophy.",
    )?;
    let transport = EsTransport::for_host(&backend.host, backend.port)
        .context("💀 The backend host/port does not assemble into a URL")?;
    let manager = IndexLifecycleManager::new(Box::new(transport), backend.index_base_name.clone());
    Ok((manager, backend.retention_window))
}

/// 🗑️ Janitor mode: discover what's past retention, delete it, report the score.
async fn run_cleanup(app_config: lvx::app_config::AppConfig) -> Result<()> {
    let (manager, retention) = lifecycle_rig(&app_config)?;
    let today = chrono::Utc::now().date_naive();

    let expired = manager.discover_expired(retention, today).await?;
    if expired.is_empty() {
        info!("✅ nothing past retention today. The janitor leans on the broom.");
        return Ok(());
    }

    let report = manager.delete_indices(&expired).await?;
    info!(
        "🗑️ cleanup done: {} deleted, {} failed",
        report.acknowledged_count,
        report.failed.len()
    );
    if !report.failed.is_empty() {
        anyhow::bail!(
            "💀 these indices survived deletion and will be retried next run: {:?}",
            report.failed
        );
    }
    Ok(())
}

/// 🔄 Archivist mode: copy one day out of the base index, with receipts.
async fn run_reindex(app_config: lvx::app_config::AppConfig, day: NaiveDate) -> Result<()> {
    let (manager, _retention) = lifecycle_rig(&app_config)?;
    let report = manager.reindex_day(day).await?;
    info!(
        "✅ reindexed {} into '{}': {} docs before, {} after, books balanced",
        report.day, report.dest, report.before, report.after
    );
    Ok(())
}
