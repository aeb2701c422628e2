use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wa_gateway::Config;
use wa_gateway::db::{Database, DeviceRepository, SqliteDeviceRepository};

#[derive(Parser)]
#[command(name = "wa-gateway")]
#[command(version, about = "Multi-device WhatsApp gateway", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to ~/.wa-gateway/config.toml)
    #[arg(short, long, global = true, env = "WA_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Offline maintenance commands. Serving needs a protocol client and goes
/// through `wa_gateway::app::run` from the program that provides one.
#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the device database
    Migrate,
    /// List persisted devices
    Devices,
    /// Print the effective configuration as TOML
    Config,
}

async fn open_database(config: &Config) -> Result<Database> {
    let db = Database::connect(&config.database.path).await?;
    db.run_migrations().await?;
    Ok(db)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let _guard = wa_gateway::logging::init(&config.logging)?;

    match cli.command {
        Commands::Migrate => {
            let db = open_database(&config).await?;
            println!("Database ready at {}", config.database.path.display());
            db.close().await?;
        }
        Commands::Devices => {
            let db = open_database(&config).await?;
            let devices = SqliteDeviceRepository::new(db.pool().clone())
                .find_all()
                .await?;
            if devices.is_empty() {
                println!("No devices registered");
            }
            for device in &devices {
                println!(
                    "{}  {:<24} session={} phone={} active={}",
                    device.id,
                    device.name,
                    device.session_id,
                    device.phone_number.as_deref().unwrap_or("-"),
                    device.is_active
                );
            }
            db.close().await?;
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}
