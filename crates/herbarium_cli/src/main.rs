//! Herbarium CLI - cache iNaturalist herbarium records and reconcile a
//! project's membership against them.

mod commands;
mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "herbarium")]
#[command(version)]
#[command(about = "Cache iNaturalist herbarium records and reconcile project membership")]
#[command(
    long_about = "Herbarium fetches every iNaturalist observation carrying a catalog-number \
observation field into a local JSON cache, searches that cache, and keeps a project's \
membership in line with the field's value: observations whose catalog number contains the \
include pattern are added, those containing the exclude pattern are removed."
)]
#[command(after_long_help = r#"EXAMPLES
    Fetch (or refresh) the local cache:
        $ herbarium fetch

    List cached observations with a UWAL-M catalog number:
        $ herbarium search UWAL-M

    See what would change without touching the project:
        $ herbarium reconcile --dry-run

CONFIGURATION
    Herbarium reads configuration from:
      1. ~/.config/herbarium/config.toml (or $XDG_CONFIG_HOME/herbarium/config.toml)
      2. ./herbarium.toml
      3. Environment variables (HERBARIUM_* prefix, `__` between sections,
         e.g., HERBARIUM_PROJECT__ID)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    INAT_API_TOKEN                    iNaturalist API token (required to add or remove)
    HERBARIUM_API__BASE_URL           API root (default: https://api.inaturalist.org/v1)
    HERBARIUM_CACHE__PATH             Cache file (default: inaturalist_observations.json)
    HERBARIUM_PROJECT__ID             Project to reconcile (default: 263745)
    HERBARIUM_PROJECT__FIELD_NAME     Observation field (default: Herbarium Catalog Number)
    RUST_LOG                          Log filter when output is not a terminal
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all field-tagged observations, overwriting the cache
    Fetch,
    /// Search cached observations by field value (fetches if no valid cache)
    Search {
        /// Substring to look for (default: the configured include pattern)
        substring: Option<String>,
    },
    /// Add and remove project members to match cached field values
    Reconcile {
        /// Dry run - show what would be done without making changes
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Structured logging only when not attached to a terminal
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("herbarium=info,herbarium_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    let config = config::Config::load().context("invalid configuration")?;

    match cli.command {
        Commands::Fetch => commands::fetch::handle_fetch(&config).await?,
        Commands::Search { substring } => {
            commands::search::handle_search(&config, substring).await?;
        }
        Commands::Reconcile { dry_run } => {
            commands::reconcile::handle_reconcile(&config, dry_run).await?;
        }
    }

    Ok(())
}
