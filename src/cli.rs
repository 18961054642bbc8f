//! Interface de linha de comando do statusflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (count, demo)
//! e flags globais (--config, --format, --stall-timeout-ms, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use statusflow::ui::OutputFormat;

/// statusflow: contagem de palavras coordenada por transições de status.
#[derive(Debug, Parser)]
#[command(name = "statusflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./statusflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Formato da saída das contagens.
    #[arg(long, global = true, value_enum)]
    pub format: Option<OutputFormat>,

    /// Declara a execução travada após este tempo sem conclusão.
    #[arg(long, global = true)]
    pub stall_timeout_ms: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Conta as palavras dos arquivos fornecidos, um mapper por arquivo.
    Count {
        /// Arquivos de entrada.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Executa a demonstração embutida com fontes em memória.
    Demo,
}
