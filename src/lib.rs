//! Status-transition coordination for fan-out/fan-in actor pipelines, with
//! a word-count pipeline built on top.

pub mod error;
pub mod state_machine;
pub mod ui;
pub mod wordcount;
