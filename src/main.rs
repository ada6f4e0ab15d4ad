use std::{path::PathBuf, process};

use clap::{Parser, Subcommand};
use discord_flow::{
    config::{ConfigManager, EnvConfigManager, Settings},
    logger::init_tracing,
    schema::write_schema,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "discord_flow", about = "Discord nodes for flows", version)]
struct Cli {
    /// `.env` file merged into the process environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resolved settings as JSON
    Settings,

    /// Emit JSON-Schema for settings, messages and node configs
    Schema {
        #[arg(long, default_value = "schemas")]
        out: PathBuf,
    },

    /// Log in with DISCORD_TOKEN, report the bot user and disconnect
    Check,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfigManager(EnvConfigManager::new(cli.env_file));
    let settings = Settings::load(&config).await?;

    match cli.command {
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Schema { out } => {
            let written = write_schema(out.clone())?;
            println!("{} schemas written to {}", written.len(), out.display());
            Ok(())
        }
        Commands::Check => {
            let _guard = init_tracing(&settings.log)?;
            info!(source = ?config, "settings loaded");
            let Some(token) = config.get(discord_flow::config::TOKEN_KEY).await else {
                error!("DISCORD_TOKEN is not set");
                process::exit(2);
            };
            check(token, &settings).await
        }
    }
}

#[cfg(feature = "serenity")]
async fn check(token: String, settings: &Settings) -> anyhow::Result<()> {
    use std::sync::Arc;

    use discord_core::{ChatClient, Credential, TokioTimers, client::serenity_client::SerenityConnector};
    use discord_flow::services::Services;

    let services = Services::new(SerenityConnector, Arc::new(TokioTimers::current()), settings);
    let handle = services.registry.acquire(&Credential::new(token)).await?;
    info!(user = %handle.user_tag(), "logged in");
    println!("✅ logged in as {}", handle.user_tag());
    services.registry.release(handle);
    services.shutdown().await;
    Ok(())
}

#[cfg(not(feature = "serenity"))]
async fn check(_token: String, _settings: &Settings) -> anyhow::Result<()> {
    info!("check requested without a Discord backend");
    anyhow::bail!("this build has no Discord backend; rebuild with `--features serenity`")
}
