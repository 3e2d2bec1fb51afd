use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::codec::KEY_SIZE;
use crate::error::{Result, SplitterError};

/// Fixed, non-secret HKDF salt. Kept for on-disk compatibility: the same
/// passphrase must always derive the same key.
const SALT_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000001";

/// Derives the 32-byte symmetric key from a user passphrase.
///
/// The passphrase bytes take a hex encode/decode round trip before entering
/// HKDF-SHA256 (`info` empty, fixed salt). Deterministic by design; this is
/// not a password hash and offers no work factor against offline guessing.
pub fn derive_key(passphrase: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let encoded = hex::encode(passphrase.as_bytes());
    let master = hex::decode(&encoded)
        .map_err(|e| SplitterError::Format(format!("invalid passphrase material: {e}")))?;
    let salt = hex::decode(SALT_HEX)
        .map_err(|e| SplitterError::Format(format!("invalid key derivation salt: {e}")))?;

    let kdf = Hkdf::<Sha256>::new(Some(&salt), &master);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    kdf.expand(&[], &mut key[..])
        .map_err(|e| SplitterError::Format(format!("key derivation failed: {e}")))?;
    Ok(key)
}
