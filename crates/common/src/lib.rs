//! Shared helpers used across the toolmesh crates.

pub mod error;
pub mod time;

pub use {error::FromMessage, time::unix_now};
