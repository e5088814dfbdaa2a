//! Discord relay: a versioned message store with an asynchronous publish
//! scheduler.
//!
//! Callers create messages and append new versions with idempotency tokens.
//! Writes return as soon as they are durable; a single background consumer
//! then propagates the latest version of each message to a Discord channel.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod content;
pub mod credentials;
pub mod health;
pub mod logging;
pub mod publisher;
pub mod relay;
pub mod scheduler;
pub mod store;
