//! gifforge - Token-gated video to GIF conversion service
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cache;
pub mod config;
pub mod conversion;
pub mod scratch;
pub mod server;
pub mod tokens;
