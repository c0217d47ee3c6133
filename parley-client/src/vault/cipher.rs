//! AES-GCM sealing
//!
//! Output layout: `[nonce (12 bytes)][ciphertext + tag]`. No associated
//! data. The AES variant follows the key length.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use zeroize::Zeroizing;

use super::VaultError;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Nonce size shared by every AES-GCM variant used here (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Seal `plaintext` under `key` with a fresh random nonce
///
/// # Errors
///
/// Returns `VaultError::InvalidKeyLength` unless `key` is 16, 24 or 32 bytes.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    match key.len() {
        16 => seal::<Aes128Gcm>(key, plaintext),
        24 => seal::<Aes192Gcm>(key, plaintext),
        32 => seal::<Aes256Gcm>(key, plaintext),
        n => Err(VaultError::InvalidKeyLength(n)),
    }
}

/// Open a blob produced by [`encrypt`]
///
/// # Errors
///
/// - `VaultError::InvalidKeyLength` for an unsupported key size
/// - `VaultError::CiphertextTooShort` if the blob cannot hold a nonce
/// - `VaultError::DecryptionFailed` if authentication fails
pub fn decrypt(key: &[u8], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    match key.len() {
        16 => open::<Aes128Gcm>(key, blob),
        24 => open::<Aes192Gcm>(key, blob),
        32 => open::<Aes256Gcm>(key, blob),
        n => Err(VaultError::InvalidKeyLength(n)),
    }
}

fn seal<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, VaultError>
where
    C: Aead + AeadCore<NonceSize = U12> + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| VaultError::InvalidKeyLength(key.len()))?;
    let nonce = C::generate_nonce(&mut OsRng);

    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| VaultError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open<C>(key: &[u8], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError>
where
    C: Aead + AeadCore<NonceSize = U12> + KeyInit,
{
    if blob.len() < NONCE_SIZE {
        return Err(VaultError::CiphertextTooShort);
    }
    let (nonce, sealed) = blob.split_at(NONCE_SIZE);

    let cipher = C::new_from_slice(key).map_err(|_| VaultError::InvalidKeyLength(key.len()))?;
    let plaintext = cipher
        .decrypt(GenericArray::from_slice(nonce), sealed)
        .map_err(|_| VaultError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG_SIZE: usize = 16;

    fn key(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn test_roundtrip_all_key_sizes() {
        for len in [16, 24, 32] {
            let key = key(len, 7);
            let plaintext = b"Test plaintext data for encryption.";
            let blob = encrypt(&key, plaintext).unwrap();
            assert_eq!(blob.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
            assert_eq!(decrypt(&key, &blob).unwrap().as_slice(), plaintext);
        }
    }

    #[test]
    fn test_empty_plaintext() {
        let key = key(24, 1);
        let blob = encrypt(&key, b"").unwrap();
        assert!(decrypt(&key, &blob).unwrap().is_empty());
    }

    #[test]
    fn test_nonce_differs_per_call() {
        let key = key(32, 3);
        let a = encrypt(&key, b"same message").unwrap();
        let b = encrypt(&key, b"same message").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypts_externally_sealed_blob() {
        let key = b"thisisa16bytekey";
        let nonce = b"unique_nonce";
        let cipher = Aes128Gcm::new_from_slice(key).unwrap();
        let sealed = cipher
            .encrypt(GenericArray::from_slice(nonce), b"hello".as_slice())
            .unwrap();

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&sealed);
        assert_eq!(decrypt(key, &blob).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let key = key(16, 9);
        let blob = encrypt(&key, b"tamper me").unwrap();
        for byte in 0..blob.len() {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    decrypt(&key, &tampered),
                    Err(VaultError::DecryptionFailed),
                    "flip at byte {} bit {} went unnoticed",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = encrypt(&key(32, 1), b"secret").unwrap();
        assert_eq!(
            decrypt(&key(32, 2), &blob),
            Err(VaultError::DecryptionFailed)
        );
    }

    #[test]
    fn test_short_blob_fails() {
        let key = key(24, 5);
        for len in 0..NONCE_SIZE {
            assert_eq!(
                decrypt(&key, &vec![0u8; len]),
                Err(VaultError::CiphertextTooShort)
            );
        }
        // A bare nonce is long enough to split but has no tag
        assert_eq!(
            decrypt(&key, &[0u8; NONCE_SIZE]),
            Err(VaultError::DecryptionFailed)
        );
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            encrypt(&key(20, 0), b"x"),
            Err(VaultError::InvalidKeyLength(20))
        );
        assert_eq!(
            decrypt(&key(0, 0), &[0u8; 64]),
            Err(VaultError::InvalidKeyLength(0))
        );
    }
}
