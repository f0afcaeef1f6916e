//! Crucible — out-of-process compile worker.
//!
//! Length-framed JSON messages over stdin/stdout, a single-threaded compile
//! loop, tiered reference resolution, and a retry engine that excludes
//! failing source units and recompiles the remainder.

pub mod backend;
pub mod cli;
pub mod core;
pub mod joblog;
pub mod transport;
