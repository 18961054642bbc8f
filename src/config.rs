//! Configuração do statusflow carregada a partir de `statusflow.toml`.
//!
//! A struct [`StatusflowConfig`] contém os parâmetros configuráveis.
//! Valores ausentes no arquivo usam defaults sensíveis. A variável de
//! ambiente `STATUSFLOW_STALL_TIMEOUT_MS` tem precedência sobre o arquivo,
//! e as flags da CLI têm precedência sobre ambos.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use statusflow::ui::OutputFormat;

/// Nome do arquivo procurado no diretório atual.
pub const DEFAULT_PATH: &str = "statusflow.toml";

/// Variável de ambiente que sobrepõe `stall_timeout_ms`.
pub const STALL_TIMEOUT_ENV: &str = "STATUSFLOW_STALL_TIMEOUT_MS";

/// Configuração de nível superior carregada de `statusflow.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusflowConfig {
    /// Tempo máximo sem conclusão antes de declarar a execução travada.
    /// Sem valor, espera indefinidamente.
    #[serde(default)]
    pub stall_timeout_ms: Option<u64>,

    /// Formato padrão da saída quando não especificado via CLI.
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Exibe o spinner de progresso em stderr.
    #[serde(default = "default_progress")]
    pub progress: bool,
}

// Valor padrão para o spinner: ligado.
fn default_progress() -> bool {
    true
}

impl Default for StatusflowConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: None,
            output_format: OutputFormat::default(),
            progress: default_progress(),
        }
    }
}

impl StatusflowConfig {
    /// Carrega a configuração de `path`, ou de `statusflow.toml` no diretório
    /// atual. Um caminho explícito que não existe é erro; o arquivo padrão
    /// ausente resulta nos valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_PATH);
                if path.exists() { Self::from_file(path)? } else { Self::default() }
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Aplica as variáveis de ambiente obtidas por `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(STALL_TIMEOUT_ENV) {
            let raw = raw.trim();
            if !raw.is_empty() {
                let ms: u64 = raw
                    .parse()
                    .with_context(|| format!("{STALL_TIMEOUT_ENV} must be a number of milliseconds, got {raw:?}"))?;
                if ms == 0 {
                    bail!("{STALL_TIMEOUT_ENV} must be greater than zero");
                }
                self.stall_timeout_ms = Some(ms);
            }
        }
        Ok(())
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }
}
