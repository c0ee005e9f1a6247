//! The `fleet` binary: configuration, logging, the HTTP page engine and the
//! `worker` / `serve` commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod engines;
pub mod logging;
