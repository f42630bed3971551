//! `flightdelay` - How late does a flight usually arrive?
//!
//! This library provides a lookup service that turns a flight number into
//! recent arrival-delay statistics. Callers register an identity, spend a
//! daily quota on uncached lookups, and share a cache of computed results
//! that is filled from an upstream flight history API.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fanout;
pub mod flight;
pub mod identity;
pub mod logging;
pub mod lookup;
pub mod server;
pub mod stats;
pub mod storage;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use lookup::{Lookup, LookupError, LookupRequest, LookupResponse};
pub use stats::{compute, StatResult};
pub use storage::{Storage, StorageStats};
