//! Request client for roomcast producers
//!
//! Wraps the correlated requester from `roomcast-core` in typed send
//! operations that resolve to an event id.

pub mod client;

pub use client::{text_content, RequestClient, StateEventParams, ROOM_MESSAGE};
