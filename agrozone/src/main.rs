//! Point d'entrée CLI pour agrozone

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use agrozone::config::Settings;

// Charger .env au démarrage
fn load_env() {
    // Chercher .env dans le répertoire courant ou parent
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::Commands;

/// Ingérer des relevés parcellaires dans PostGIS et servir des tuiles vectorielles
#[derive(Parser)]
#[command(name = "agrozone")]
#[command(author, version)]
#[command(about = "Ingest irrigation zones and farm parcels into PostGIS, render vector tiles")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let settings = Settings::from_env();

    match cli.command {
        Commands::Ingest(args) => {
            info!(path = %args.path.display(), dry_run = args.dry_run, "Ingest");
            cli::cmd_ingest(args, settings).await?;
        }
        Commands::Tile {
            layer,
            z,
            x,
            y,
            output,
            db,
        } => {
            info!(%layer, z, x, y, "Render tile");
            cli::cmd_tile(&layer, z, x, y, &output, db, settings).await?;
        }
        Commands::InitSchema { drop, db } => {
            info!(drop, "Init schema");
            cli::cmd_init_schema(drop, db, settings).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
