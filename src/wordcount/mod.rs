//! Word counting on top of the coordination engine.
//!
//! A [`Director`] starts one [`Mapper`] per source, waits (through the
//! dependency gate) for every mapper to reach `Reduce`, merges the partial
//! counts the mappers sent it and writes the result.

mod director;
mod mapper;
mod source;
mod tokenizer;

pub use director::{Director, DirectorBuilder};
pub use mapper::Mapper;
pub use source::{FsReader, MemoryReader, SourceReader};
pub use tokenizer::{Counts, merge_counts, reduce_pairs, tokenize};

use crate::state_machine::{Engine, Message};

/// Messages exchanged by word-count actors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordCountMessage {
    /// A mapper's finished counts, sent from its `Reduce` action.
    PartialCounts { counts: Counts },
}

impl WordCountMessage {
    pub const PARTIAL_COUNTS: &'static str = "PartialCounts";
}

impl Message for WordCountMessage {
    fn kind(&self) -> &'static str {
        match self {
            WordCountMessage::PartialCounts { .. } => Self::PARTIAL_COUNTS,
        }
    }
}

pub type WordCountEngine = Engine<WordCountMessage>;
