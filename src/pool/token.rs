// src/pool/token.rs

//! Opaque session token generation.

use crate::core::TidemailError;

/// Random bytes per token; the hex encoding doubles this on the wire.
/// 256 bits keeps the collision probability negligible for the lifetime of
/// the process and the value unguessable to a client holding prior tokens.
pub const TOKEN_BYTES: usize = 32;

/// Generates a fixed-length opaque token from the OS CSPRNG.
pub fn new_token() -> Result<String, TidemailError> {
    let mut raw = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut raw).map_err(|e| TidemailError::Internal(e.to_string()))?;
    Ok(hex::encode(raw))
}
