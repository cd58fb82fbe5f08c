//! Secure random tokens for the anti-forgery state parameter.

use crate::error::{OAuth2Error, OAuth2Result};
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes behind one state value (32 hex characters).
pub const STATE_BYTES: usize = 16;

/// Fill `size` bytes from the operating system CSPRNG.
pub fn generate_random_bytes(size: usize) -> OAuth2Result<Vec<u8>> {
    if size == 0 {
        return Err(OAuth2Error::ConfigError(
            "random byte count must be positive".to_string(),
        ));
    }

    let mut bytes = vec![0u8; size];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

pub fn generate_state_value() -> OAuth2Result<String> {
    Ok(hex::encode(generate_random_bytes(STATE_BYTES)?))
}
