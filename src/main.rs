use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use obsidian_vault_mcp::config::{Config, ServerMode};
use obsidian_vault_mcp::http::serve_http;
use obsidian_vault_mcp::mcp::run_stdio;
use obsidian_vault_mcp::tools::VaultTools;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // stdout 留给 JSON-RPC，日志输出到 stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config().context("failed to load configuration")?;
    info!(
        "vault root {} (mode {:?})",
        config.vault.root.display(),
        config.server.mode
    );

    let tools = Arc::new(VaultTools::from_config(&config).context("failed to open vault")?);

    match config.server.mode {
        ServerMode::Stdio => run_stdio(tools).await?,
        ServerMode::Http => serve_http(tools, config.http_bind_addr()).await?,
        ServerMode::Both => {
            tokio::try_join!(
                serve_http(tools.clone(), config.http_bind_addr()),
                run_stdio(tools)
            )?;
        }
    }

    Ok(())
}

fn load_config() -> obsidian_vault_mcp::error::Result<Config> {
    let mut config = match env::args().nth(1) {
        Some(path) => Config::load_from_path(Path::new(&path))?,
        None => Config::default(),
    };
    config.apply_env(|k| env::var(k))?;
    config.validate()?;
    Ok(config)
}
