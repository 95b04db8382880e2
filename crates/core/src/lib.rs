//! Shared types and pure logic used by both the engine and the CLI:
//! configuration schema, error taxonomy, fingerprint labels, indexer
//! documents, and the pluggable indexer sinks.

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

pub mod config;
pub mod document;
pub mod error;
pub mod indexer;
pub mod labels;

pub use config::RunConfig;
pub use error::{Error, ExitCode};
