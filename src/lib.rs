//! Rove: one continuously refreshed context document per work item, built
//! by walking references across ticket, chat and code review sources.

pub mod assemble;
pub mod config;
pub mod credentials;
pub mod cursor;
pub mod error;
pub mod explore;
pub mod llm;
pub mod merge;
pub mod pipeline;
pub mod ratelimit;
pub mod retry;
pub mod schedule;
pub mod sources;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
