//! Inicialização do `tracing` para o binário.
//!
//! Os eventos vão para stderr; stdout fica reservado para as contagens.
//! `RUST_LOG` é respeitado, e `--verbose` acrescenta o nível debug.

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|err| anyhow!("Failed to initialize logging: {err}"))
}
