//! Core worker machinery: data model, configuration, queue, resolver,
//! retry-compile engine, and the application lifecycle.

pub mod encoding;
pub mod engine;
pub mod queue;
pub mod resolver;
pub mod settings;
pub mod types;
pub mod worker;
