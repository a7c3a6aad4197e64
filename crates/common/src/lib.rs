//! Common utilities and types shared across the classroom engine crates.

#![warn(clippy::pedantic)]

/// Module for common data types (identities, track identifiers)
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
