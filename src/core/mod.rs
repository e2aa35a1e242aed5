// src/core/mod.rs

//! The central module containing the error taxonomy and metrics registry.

pub mod errors;
pub mod metrics;

pub use errors::TidemailError;
