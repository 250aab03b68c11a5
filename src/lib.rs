//! postloop: feedback-driven post regeneration with a tone memory.

pub mod classifier;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod regen;
pub mod retry;
pub mod status;
pub mod store;
