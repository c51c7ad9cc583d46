//! Core types for roomcast
//!
//! This crate provides the bus abstraction and its correlated request layer,
//! the wire payloads exchanged between producers and the dispatcher, and the
//! configuration, error and logging plumbing shared by the other crates.

pub mod bus;
pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};

/// Envelopes buffered per subscriber before new ones are dropped
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
