//! Core domain + application logic for the photo enhancement bot.
//!
//! This crate is framework-agnostic. Telegram and the enhancement backends
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod enhance;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod orchestrator;
pub mod scratch;
pub mod security;

pub use errors::{Error, Result};
