//! Argon2id key derivation
//!
//! The cost parameters and salt travel in a `$`-delimited string:
//!
//! ```text
//! $argon2id$v=19$m=65536,t=1,p=8$<base64 salt, no padding>
//! ```
//!
//! This is a PHC hash string with the hash field removed, so it is safe to
//! store in the clear.

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::RngExt;
use zeroize::Zeroizing;

use super::{Key, VaultError};
use crate::constants::{
    DEFAULT_KDF_ITERATIONS, DEFAULT_KDF_MEMORY_KIB, DEFAULT_KDF_SALT_LENGTH,
};

/// Variant name in the encoded string
pub const ALGORITHM: &str = "argon2id";

/// Argon2 version this build derives with (0x13)
pub const ARGON2_VERSION: u32 = 19;

/// Cost parameters used when creating a new key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    /// Lanes
    pub parallelism: u8,
    /// Random salt length in bytes
    pub salt_length: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_KDF_MEMORY_KIB,
            iterations: DEFAULT_KDF_ITERATIONS,
            parallelism: default_parallelism(),
            salt_length: DEFAULT_KDF_SALT_LENGTH,
        }
    }
}

/// One lane per available CPU, capped at what the encoding can carry
fn default_parallelism() -> u8 {
    std::thread::available_parallelism()
        .map(|n| u8::try_from(n.get()).unwrap_or(u8::MAX))
        .unwrap_or(1)
}

/// Decoded form of the parameter string: costs plus salt, never the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u8,
    pub salt: Vec<u8>,
}

impl EncodedParams {
    /// Parse a `$argon2id$v=..$m=..,t=..,p=..$salt` string
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidParams` unless the string has exactly five
    /// `$`-separated fields, names `argon2id`, and carries version 19.
    pub fn parse(encoded: &str) -> Result<Self, VaultError> {
        let fields: Vec<&str> = encoded.split('$').collect();
        let [leading, algorithm, version, costs, salt] = fields.as_slice() else {
            return Err(invalid(format!(
                "expected 5 '$'-separated fields, found {}",
                fields.len()
            )));
        };

        if !leading.is_empty() {
            return Err(invalid("must start with '$'"));
        }
        if *algorithm != ALGORITHM {
            return Err(invalid(format!("unsupported variant {:?}", algorithm)));
        }

        let version: u32 = version
            .strip_prefix("v=")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| invalid(format!("malformed version {:?}", version)))?;
        if version != ARGON2_VERSION {
            return Err(invalid(format!("incompatible version {}", version)));
        }

        let (memory_kib, iterations, parallelism) = parse_costs(costs)?;

        let salt = STANDARD_NO_PAD
            .decode(salt)
            .map_err(|e| invalid(format!("salt is not base64: {}", e)))?;
        if salt.is_empty() {
            return Err(invalid("empty salt"));
        }

        Ok(Self {
            memory_kib,
            iterations,
            parallelism,
            salt,
        })
    }

    /// Run Argon2id with these parameters
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Kdf` if the argon2 crate rejects the parameters
    /// (memory below 8 KiB per lane, salt shorter than 8 bytes, key shorter
    /// than 4 bytes).
    pub fn derive(&self, password: &str, key_length: usize) -> Result<Key, VaultError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            u32::from(self.parallelism),
            Some(key_length),
        )
        .map_err(|e| VaultError::Kdf(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new(vec![0u8; key_length]);
        argon2
            .hash_password_into(password.as_bytes(), &self.salt, key.as_mut_slice())
            .map_err(|e| VaultError::Kdf(e.to_string()))?;
        Ok(key)
    }
}

fn parse_costs(costs: &str) -> Result<(u32, u32, u8), VaultError> {
    let parts: Vec<&str> = costs.split(',').collect();
    let [m, t, p] = parts.as_slice() else {
        return Err(invalid(format!("malformed costs {:?}", costs)));
    };

    fn field<T: FromStr>(part: &str, name: &str) -> Result<T, VaultError> {
        part.strip_prefix(name)
            .and_then(|v| v.strip_prefix('='))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| invalid(format!("malformed cost field {:?}", part)))
    }

    Ok((field(m, "m")?, field(t, "t")?, field(p, "p")?))
}

fn invalid(message: impl Into<String>) -> VaultError {
    VaultError::InvalidParams(message.into())
}

impl fmt::Display for EncodedParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${}$v={}$m={},t={},p={}${}",
            ALGORITHM,
            ARGON2_VERSION,
            self.memory_kib,
            self.iterations,
            self.parallelism,
            STANDARD_NO_PAD.encode(&self.salt)
        )
    }
}

impl FromStr for EncodedParams {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Derive a fresh key under a new random salt
///
/// Returns the key and the parameter string needed to derive it again.
///
/// # Errors
///
/// Returns `VaultError::InvalidParams` for a zero salt length and
/// `VaultError::Kdf` if Argon2 rejects the cost parameters.
pub fn create_key(
    password: &str,
    params: &KdfParams,
    key_length: usize,
) -> Result<(Key, EncodedParams), VaultError> {
    if params.salt_length == 0 {
        return Err(invalid("salt length must be positive"));
    }

    let mut rng = rand::rng();
    let salt: Vec<u8> = (0..params.salt_length).map(|_| rng.random()).collect();

    let encoded = EncodedParams {
        memory_kib: params.memory_kib,
        iterations: params.iterations,
        parallelism: params.parallelism,
        salt,
    };
    let key = encoded.derive(password, key_length)?;
    Ok((key, encoded))
}

/// Re-derive the key described by a stored parameter string
///
/// # Errors
///
/// Returns `VaultError::InvalidParams` if `encoded` does not parse.
pub fn derive_key(password: &str, encoded: &str, key_length: usize) -> Result<Key, VaultError> {
    EncodedParams::parse(encoded)?.derive(password, key_length)
}
