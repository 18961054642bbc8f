mod cli;
mod config;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::runtime::Handle;
use tracing::debug;

use cli::{Cli, Command};
use config::StatusflowConfig;
use statusflow::error::EngineError;
use statusflow::ui::RunProgress;
use statusflow::wordcount::{Director, FsReader, MemoryReader, SourceReader, WordCountEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let mut config = StatusflowConfig::load(cli.config.as_deref())?;
    if let Some(ms) = cli.stall_timeout_ms {
        if ms == 0 {
            bail!("--stall-timeout-ms must be greater than zero");
        }
        config.stall_timeout_ms = Some(ms);
    }
    let format = cli.format.unwrap_or(config.output_format);
    debug!(?config, ?format, "Configuration resolved");

    let (files, reader) = match cli.command {
        Command::Count { files } => {
            let files: Vec<String> = files.iter().map(|path| path.to_string_lossy().into_owned()).collect();
            (files, Arc::new(FsReader) as Arc<dyn SourceReader>)
        }
        Command::Demo => {
            let reader = demo_sources();
            (reader.paths(), Arc::new(reader) as Arc<dyn SourceReader>)
        }
    };

    let engine = WordCountEngine::new();
    let progress = RunProgress::attach(&engine, config.progress && console::user_attended_stderr());
    let director = Director::builder()
        .engine(engine)
        .files(files)
        .reader(reader)
        .format(format)
        .build(Handle::current())?;

    let runner = director.clone();
    let stall_timeout = config.stall_timeout();
    let result = tokio::task::spawn_blocking(move || runner.run_to_completion(stall_timeout))
        .await
        .context("Word count task panicked")?;

    progress.finish(&result);
    if let Err(EngineError::Stalled { .. }) = &result {
        progress.report_outstanding(&director.outstanding());
    }
    result.context("Word count failed")
}

fn demo_sources() -> MemoryReader {
    MemoryReader::new()
        .with_file("demo/foo.txt", "the quick brown fox jumps over the lazy dog")
        .with_file("demo/bar.txt", "The dog barks; the fox runs.")
        .with_file("demo/test.txt", "quick, quick -- lazy?\n\tbrown   dog")
}
