use std::fs;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use skiff::config::{ServerConfig, ServerConfigOverrides};
use skiff::content::ContentStore;
use skiff::server::{AppState, create_router};
use skiff::store::SqliteStore;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "A centralized change-based version control server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Host to bind to (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides PORT)
        #[arg(long, short)]
        port: Option<u16>,

        /// Directory for the content store
        #[arg(long)]
        data_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("skiff=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let config = ServerConfig::load(ServerConfigOverrides {
                host,
                port,
                data_dir: data_dir.map(Into::into),
            })?;

            fs::create_dir_all(&config.data_dir)?;

            let store = SqliteStore::new(&config.database_url)?;
            let content = ContentStore::new(&config.data_dir);

            let state = Arc::new(AppState { store, content });
            let app = create_router(state);
            let addr = config.socket_addr()?;

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
