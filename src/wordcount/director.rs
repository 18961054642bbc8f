use std::any::Any;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::mapper::{self, Mapper};
use super::source::{FsReader, SourceReader};
use super::tokenizer::{Counts, merge_counts};
use super::{WordCountEngine, WordCountMessage};
use crate::error::{BoxError, EngineError, PipelineError};
use crate::state_machine::{Action, ActorKey, Condition, HasKey, Status, bind};
use crate::ui::{OutputFormat, render};

pub const ACTOR_KIND: &str = "Director";
pub const ACTOR_ID: &str = "Main";

pub const INIT: Status = Status::from_static("Init");
pub const MAP_REDUCE: Status = Status::from_static("MapReduce");
pub const COMBINE: Status = Status::from_static("Combine");
pub const PRINT: Status = Status::from_static("Print");
pub const DONE: Status = Status::from_static("Done");

/// Root actor of a word-count run: `Init -> MapReduce -> Combine -> Print -> Done`.
///
/// `MapReduce` starts one [`Mapper`] per source on the blocking pool and
/// gates `Combine` on every mapper reaching `Reduce`. Mappers deliver their
/// counts as `PartialCounts` messages, keyed by mapper, before they commit
/// `Reduce`.
pub struct Director {
    key: ActorKey,
    engine: WordCountEngine,
    files: Vec<String>,
    reader: Arc<dyn SourceReader>,
    runtime: Handle,
    format: OutputFormat,
    output: Mutex<Box<dyn Write + Send>>,
    mappers: Mutex<Vec<Arc<Mapper>>>,
    partials: Mutex<BTreeMap<ActorKey, Counts>>,
    totals: Mutex<Counts>,
}

impl HasKey for Director {
    fn key(&self) -> &ActorKey {
        &self.key
    }
}

/// Options for a [`Director`]. Anything left unset falls back to a fresh
/// engine, the filesystem reader, stdout and text output.
#[derive(Default)]
pub struct DirectorBuilder {
    engine: Option<WordCountEngine>,
    files: Vec<String>,
    reader: Option<Arc<dyn SourceReader>>,
    output: Option<Box<dyn Write + Send>>,
    format: OutputFormat,
}

impl DirectorBuilder {
    pub fn engine(mut self, engine: WordCountEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn files<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Register the director and its transitions. Mappers are spawned on
    /// `runtime`'s blocking pool.
    pub fn build(self, runtime: Handle) -> Result<Arc<Director>, EngineError> {
        let director = Arc::new(Director {
            key: ActorKey::new(ACTOR_KIND, ACTOR_ID),
            engine: self.engine.unwrap_or_default(),
            files: self.files,
            reader: self.reader.unwrap_or_else(|| Arc::new(FsReader) as Arc<dyn SourceReader>),
            runtime,
            format: self.format,
            output: Mutex::new(self.output.unwrap_or_else(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>)),
            mappers: Mutex::new(Vec::new()),
            partials: Mutex::new(BTreeMap::new()),
            totals: Mutex::new(Counts::new()),
        });

        let engine = &director.engine;
        engine.register(&director, INIT, DONE)?;
        let actions: [(Status, Status, Action); 4] = [
            (INIT, MAP_REDUCE, Arc::new(bind(&director, Director::map_reduce))),
            (MAP_REDUCE, COMBINE, Arc::new(bind(&director, Director::combine))),
            (COMBINE, PRINT, Arc::new(bind(&director, Director::print))),
            (PRINT, DONE, Arc::new(bind(&director, Director::done))),
        ];
        engine.add_transition_actions(&director, actions)?;

        let weak = Arc::downgrade(&director);
        let key = director.key.clone();
        engine.register_handler(
            &director,
            WordCountMessage::PARTIAL_COUNTS,
            move |from: &ActorKey, message: WordCountMessage| match weak.upgrade() {
                Some(director) => director.on_partial_counts(from, message),
                None => Err(EngineError::ActorDropped(key.clone()).into()),
            },
        )?;

        debug!(actor = %director.key, sources = director.files.len(), "Director ready");
        Ok(director)
    }
}

impl Director {
    pub fn builder() -> DirectorBuilder {
        DirectorBuilder::default()
    }

    pub fn engine(&self) -> &WordCountEngine {
        &self.engine
    }

    /// Merged counts; empty until `Combine` has committed.
    pub fn totals(&self) -> Counts {
        self.totals.lock().clone()
    }

    /// Mapper conditions still holding `Combine` back.
    pub fn outstanding(&self) -> Vec<Condition> {
        self.engine.outstanding_dependencies(self, COMBINE)
    }

    /// Start the run and block until it finishes, fails, or stalls for
    /// longer than `stall_timeout`.
    pub fn run_to_completion(&self, stall_timeout: Option<Duration>) -> Result<(), EngineError> {
        info!(run_id = %self.engine.run_id(), sources = self.files.len(), "Starting word count");
        if let Err(err) = self.engine.run(self, MAP_REDUCE) {
            let Some(actor) = err.failed_actor().cloned() else {
                return Err(err);
            };
            self.engine.abort(&actor, err);
        }
        match stall_timeout {
            Some(timeout) => self.engine.wait_timeout(timeout),
            None => self.engine.wait(),
        }
    }

    fn map_reduce(&self) -> Result<(), BoxError> {
        let mut mappers = Vec::with_capacity(self.files.len());
        for path in &self.files {
            let worker = Mapper::new(&self.engine, path.clone(), self.reader.clone(), self.key.clone())?;
            self.engine.add_dependency(self, COMBINE, &worker, mapper::REDUCE)?;
            mappers.push(worker);
        }

        info!(actor = %self.key, workers = mappers.len(), "Spawning mappers");
        for worker in &mappers {
            let task = {
                let worker = worker.clone();
                let engine = self.engine.clone();
                self.runtime.spawn_blocking(move || {
                    if let Err(err) = worker.start() {
                        // The last mapper to reduce also runs the deferred Combine chain.
                        let blamed = err.failed_actor().cloned().unwrap_or_else(|| worker.key().clone());
                        error!(actor = %blamed, mapper = %worker.key(), error = %err, "Word count step failed");
                        engine.abort(&blamed, err);
                    }
                })
            };
            let worker = worker.clone();
            let engine = self.engine.clone();
            self.runtime.spawn(async move {
                if let Err(join) = task.await {
                    if join.is_panic() {
                        let message = panic_message(join.into_panic());
                        error!(actor = %worker.key(), path = worker.path(), %message, "Mapper panicked");
                        let actor = worker.key().clone();
                        engine.abort(&worker, EngineError::Panicked { actor, message });
                    }
                }
            });
        }
        *self.mappers.lock() = mappers;

        self.engine.update_status(self, COMBINE)?;
        Ok(())
    }

    fn on_partial_counts(&self, from: &ActorKey, message: WordCountMessage) -> Result<(), BoxError> {
        let WordCountMessage::PartialCounts { counts } = message;
        debug!(actor = %self.key, worker = %from, distinct = counts.len(), "Partial counts received");
        if self.partials.lock().insert(from.clone(), counts).is_some() {
            warn!(actor = %self.key, worker = %from, "Replacing partial counts already received");
        }
        Ok(())
    }

    fn combine(&self) -> Result<(), BoxError> {
        let mut totals = Counts::new();
        {
            let mappers = self.mappers.lock();
            let partials = self.partials.lock();
            let missing: Vec<String> = mappers
                .iter()
                .map(|worker| worker.key())
                .filter(|key| !partials.contains_key(*key))
                .map(ToString::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(PipelineError::IncompleteCounts {
                    expected: mappers.len(),
                    missing,
                }
                .into());
            }
            for counts in partials.values() {
                merge_counts(&mut totals, counts);
            }
        }
        info!(actor = %self.key, distinct = totals.len(), "Counts combined");
        *self.totals.lock() = totals;

        self.engine.update_status(self, PRINT)?;
        Ok(())
    }

    fn print(&self) -> Result<(), BoxError> {
        let rendered = render(&self.totals.lock(), self.format)?;
        {
            let mut output = self.output.lock();
            output.write_all(rendered.as_bytes()).map_err(PipelineError::from)?;
            output.flush().map_err(PipelineError::from)?;
        }
        self.engine.update_status(self, DONE)?;
        Ok(())
    }

    fn done(&self) -> Result<(), BoxError> {
        info!(actor = %self.key, run_id = %self.engine.run_id(), "Word count finished");
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast_ref::<&str>() {
            Some(message) => (*message).to_string(),
            None => "unknown panic".to_string(),
        },
    }
}
