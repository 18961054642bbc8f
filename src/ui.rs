//! Saída de terminal do statusflow: formatação das contagens e spinner.
//!
//! Usa `indicatif` para o spinner de progresso e `console` para estilização
//! com cores. O [`RunProgress`] acompanha as transições do motor em stderr,
//! deixando stdout livre para o resultado.

use std::fmt::Write as _;
use std::time::Duration;

use clap::ValueEnum;
use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, PipelineError};
use crate::state_machine::{Condition, Engine, Message};
use crate::wordcount::Counts;

/// Formato de saída das contagens finais.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Uma linha `palavra: contagem` por palavra.
    #[default]
    Text,
    /// Um objeto JSON `{ "palavra": contagem }`.
    Json,
}

/// Formata as contagens, em ordem alfabética de palavra.
pub fn render(counts: &Counts, format: OutputFormat) -> Result<String, PipelineError> {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            for (word, count) in counts {
                // Escrever em String não falha.
                let _ = writeln!(out, "{word}: {count}");
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(counts)?;
            out.push('\n');
            Ok(out)
        }
    }
}

/// Indicador visual de progresso de uma execução.
///
/// Exibe um spinner com a última transição confirmada e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e travamento (amarelo).
pub struct RunProgress {
    // Spinner do indicatif, desenhado em stderr.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner e o registra como observador do motor.
    ///
    /// Com `visible = false` nada é desenhado, mas a API continua igual.
    pub fn attach<M: Message>(engine: &Engine<M>, visible: bool) -> Self {
        let pb = ProgressBar::new_spinner();
        if visible {
            pb.set_draw_target(ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_message(format!("run {}", engine.run_id()));

        let observer = pb.clone();
        engine.observe(move |change| {
            observer.set_message(format!("{}: {} -> {}", change.actor, change.from, change.to));
        });

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Mensagem atual do spinner (a última transição vista).
    pub fn message(&self) -> String {
        self.pb.message()
    }

    /// Finaliza o spinner e exibe o resultado da execução em stderr.
    pub fn finish(&self, result: &Result<(), EngineError>) {
        self.pb.finish_and_clear();
        match result {
            Ok(()) => eprintln!("  {} Run completed", self.green.apply_to("✓")),
            Err(EngineError::Stalled { actor, status, waited }) => eprintln!(
                "  {} {actor} stalled in {status} after {waited:?}",
                self.yellow.apply_to("⏸")
            ),
            Err(err) => eprintln!("  {} Run failed: {err}", self.red.apply_to("✗")),
        }
    }

    /// Lista as dependências que ainda bloqueiam uma transição.
    pub fn report_outstanding(&self, outstanding: &[Condition]) {
        for condition in outstanding {
            eprintln!(
                "    {} waiting on {} to reach {}",
                self.yellow.apply_to("•"),
                condition.source,
                condition.required
            );
        }
    }
}
