//! Flowgraph Core Library
//!
//! Shared primitives used by the Flowgraph dataflow engine:
//! - `RunId`, a ULID-backed identifier stamped onto each pipeline run
//! - the ambient `Error`/`Result` taxonomy
//! - `EngineConfig`, layered environment configuration
//! - time helpers shared across the engine

pub mod config;
pub mod error;
pub mod id;
pub mod time;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use id::RunId;
