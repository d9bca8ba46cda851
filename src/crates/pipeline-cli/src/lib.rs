//! # pipeline-cli
//!
//! Wiring between declarative pipeline files and the concrete HTTP providers
//! in the `llm` crate. The `pipeline` binary is a thin clap front-end over
//! this library.

pub mod providers;

pub use providers::{build_capabilities, parse_key_value};
