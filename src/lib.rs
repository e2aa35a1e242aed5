// src/lib.rs

pub mod config;
pub mod core;
pub mod imap;
pub mod pool;
pub mod server;

// Re-export
pub use crate::core::TidemailError;
