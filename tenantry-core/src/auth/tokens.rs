/// Random material for token-gated transitions
///
/// Verification, invitation and reset tokens are 32 bytes from the OS RNG,
/// hex-encoded. Temporary passwords given to invitees are 8 bytes, hex-encoded.

use rand::{rngs::OsRng, RngCore};

/// Bytes of entropy in a transition token
pub const TOKEN_BYTES: usize = 32;

/// Bytes of entropy in a temporary password
pub const TEMPORARY_PASSWORD_BYTES: usize = 8;

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generates a 64-character hex transition token
pub fn generate_token() -> String {
    random_hex(TOKEN_BYTES)
}

/// Generates a 16-character hex temporary password
pub fn generate_temporary_password() -> String {
    random_hex(TEMPORARY_PASSWORD_BYTES)
}
