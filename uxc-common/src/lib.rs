//! # UXC Common Library
//!
//! Shared code for the UX critique services:
//! - Error type shared across crates
//! - Configuration file resolution and TOML loading
//! - Analysis event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
