//! Shared domain types for the Prizm workspace server.
//!
//! Everything here is plain data: the error taxonomy, the configuration
//! tree, the session/message model, streaming chunk types, and checkpoint
//! records. No I/O, no runtime state.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod session;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
