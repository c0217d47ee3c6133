//! Credential vault
//!
//! Turns a password into a symmetric key with Argon2id and uses that key to
//! seal one opaque blob with AES-GCM. The derived key never leaves the
//! operation that needed it; only the self-describing parameter string is
//! stored next to the ciphertext.
//!
//! Decryption has a single failure signal. A wrong password and a tampered
//! blob both surface as [`VaultError::DecryptionFailed`].

mod cipher;
mod kdf;

use thiserror::Error;
use zeroize::Zeroizing;

pub use cipher::{NONCE_SIZE, decrypt, encrypt};
pub use kdf::{ALGORITHM, ARGON2_VERSION, EncodedParams, KdfParams, create_key, derive_key};

/// Derived key bytes, wiped on drop
pub type Key = Zeroizing<Vec<u8>>;

/// Key lengths accepted by [`encrypt`] and [`decrypt`] (AES-128/192/256)
pub const SUPPORTED_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Vault errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("key length {0} is not 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short")]
    CiphertextTooShort,
    /// Wrong key or corrupted ciphertext
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("invalid key derivation parameters: {0}")]
    InvalidParams(String),
    #[error("key derivation failed: {0}")]
    Kdf(String),
}
