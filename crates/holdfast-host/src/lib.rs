#![forbid(unsafe_code)]

//! Host integration driven by configured shell commands.
//!
//! `command` isolates process execution and output classification; `system`
//! turns the configured commands into the registry and lookup services the
//! controller consumes.

mod command;
mod system;

pub use system::{CommandHost, COMMAND_HOST_MODULE};
