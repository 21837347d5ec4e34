use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser};
use tracing::info;

/// Process settings. Every option can also come from the environment, which
/// is how the service is configured when deployed.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// SQLite store location.
    #[arg(long, env = "DB_PATH")]
    pub db_path: PathBuf,

    /// Gzip-compressed JSON-lines feed, required with --migration-only.
    #[arg(long, env = "SOURCE_PATH")]
    pub source_path: Option<PathBuf>,

    /// Load the feed into the store and exit instead of serving.
    #[arg(
        long,
        env = "MIGRATION_ONLY",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub migration_only: bool,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Directory served for every path other than /search.
    #[arg(long, env = "STATIC_DIR", default_value = "./static")]
    pub static_dir: PathBuf,
}

impl Config {
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    pub fn require_source_path(&self) -> Result<&Path> {
        self.source_path
            .as_deref()
            .context("SOURCE_PATH must be set when MIGRATION_ONLY is enabled")
    }
}

/// Exports `KEY=VALUE` pairs from an env file into the process environment.
/// Variables that are already set are left alone. A missing file is fine.
pub fn load_env_file(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let pairs = read_env_file(path)?;
    let mut exported = 0;
    for (key, value) in pairs {
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            exported += 1;
        }
    }

    info!("Loaded {} variable(s) from {:?}", exported, path);
    Ok(exported)
}

fn read_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut pairs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                pairs.push((key.to_string(), value.trim().to_string()));
            }
        }
    }
    Ok(pairs)
}
