use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::source::SourceReader;
use super::tokenizer::{Counts, reduce_pairs, tokenize};
use super::{WordCountEngine, WordCountMessage};
use crate::error::{BoxError, EngineError};
use crate::state_machine::{Action, ActorKey, HasKey, Outcome, Status, bind};

pub const ACTOR_KIND: &str = "MapReduce";

pub const INIT: Status = Status::from_static("Init");
pub const READ: Status = Status::from_static("Read");
pub const MAP: Status = Status::from_static("Map");
pub const REDUCE: Status = Status::from_static("Reduce");

/// Counts the words of one source: `Init -> Read -> Map -> Reduce`.
///
/// Each stage requests the next from inside its own action, so a single
/// [`Mapper::start`] call drives the worker to `Reduce` on the calling
/// thread. The `Reduce` action hands the counts to the director.
pub struct Mapper {
    key: ActorKey,
    path: String,
    director: ActorKey,
    engine: WordCountEngine,
    reader: Arc<dyn SourceReader>,
    content: Mutex<String>,
    pairs: Mutex<Vec<(String, u64)>>,
    counts: Mutex<Counts>,
}

impl HasKey for Mapper {
    fn key(&self) -> &ActorKey {
        &self.key
    }
}

impl Mapper {
    /// Register a worker for `path` that reports to `director`.
    pub fn new(
        engine: &WordCountEngine,
        path: impl Into<String>,
        reader: Arc<dyn SourceReader>,
        director: ActorKey,
    ) -> Result<Arc<Self>, EngineError> {
        let path = path.into();
        let mapper = Arc::new(Self {
            key: ActorKey::new(ACTOR_KIND, path.clone()),
            path,
            director,
            engine: engine.clone(),
            reader,
            content: Mutex::new(String::new()),
            pairs: Mutex::new(Vec::new()),
            counts: Mutex::new(Counts::new()),
        });

        engine.register(&mapper, INIT, REDUCE)?;
        let actions: [(Status, Status, Action); 3] = [
            (INIT, READ, Arc::new(bind(&mapper, Mapper::read))),
            (READ, MAP, Arc::new(bind(&mapper, Mapper::map))),
            (MAP, REDUCE, Arc::new(bind(&mapper, Mapper::reduce))),
        ];
        engine.add_transition_actions(&mapper, actions)?;
        Ok(mapper)
    }

    pub fn start(&self) -> Result<Outcome, EngineError> {
        self.engine.update_status(self, READ)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn counts(&self) -> Counts {
        self.counts.lock().clone()
    }

    fn read(&self) -> Result<(), BoxError> {
        let content = self.reader.read(&self.path)?;
        debug!(actor = %self.key, bytes = content.len(), "Source loaded");
        *self.content.lock() = content;
        self.engine.update_status(self, MAP)?;
        Ok(())
    }

    fn map(&self) -> Result<(), BoxError> {
        let content = std::mem::take(&mut *self.content.lock());
        let pairs: Vec<(String, u64)> = tokenize(&content).map(|word| (word, 1)).collect();
        debug!(actor = %self.key, words = pairs.len(), "Source tokenized");
        *self.pairs.lock() = pairs;
        self.engine.update_status(self, REDUCE)?;
        Ok(())
    }

    fn reduce(&self) -> Result<(), BoxError> {
        let pairs = std::mem::take(&mut *self.pairs.lock());
        let counts = reduce_pairs(pairs);
        debug!(actor = %self.key, distinct = counts.len(), "Partial counts ready");
        *self.counts.lock() = counts.clone();
        self.engine
            .send(self, &self.director, WordCountMessage::PartialCounts { counts })?;
        Ok(())
    }
}
