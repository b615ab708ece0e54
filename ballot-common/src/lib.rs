//! Shared identifiers, cluster configuration and the error type used across
//! the ballot crates.
pub mod config;
pub mod error;
pub mod types;
