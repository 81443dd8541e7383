use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const DEFAULT_PORT: u16 = 8080;

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Server configuration. `DATABASE_URL` names the SQLite database file and
/// is required; `HOST`/`PORT` override the listen defaults; CLI flags
/// override everything.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub data_dir: PathBuf,
}

/// CLI overrides applied on top of environment values.
#[derive(Debug, Default)]
pub struct ServerConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Priority: CLI args > environment > defaults.
    pub fn load(overrides: ServerConfigOverrides) -> anyhow::Result<Self> {
        let Ok(database_url) = env::var("DATABASE_URL") else {
            bail!("DATABASE_URL not set");
        };

        let host = overrides
            .host
            .or_else(|| env::var("HOST").ok())
            .unwrap_or_else(default_host);

        let port = match overrides.port {
            Some(port) => port,
            None => match env::var("PORT") {
                Ok(raw) => raw.parse().context("parse PORT")?,
                Err(_) => DEFAULT_PORT,
            },
        };

        let data_dir = overrides.data_dir.unwrap_or_else(default_data_dir);

        Ok(Self {
            host,
            port,
            database_url,
            data_dir,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}
