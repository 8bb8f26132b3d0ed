//! Shared types, errors, and configuration for the roost resource manager.

pub mod config;
pub mod error;
pub mod stop;
pub mod types;

pub use error::{RoostError, RoostResult};
