//! Cryptographic primitives shared by sessions (AES-128-CBC over a DH-derived
//! key) and the persistence engine (AES-256-GCM over the operator's master
//! password).
pub mod dh;

use aes::cipher::{block_padding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;

use crate::error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES-128-CBC encrypt `plaintext` under `key`, PKCS#7-padded, with a fresh random IV.
/// Returns `(iv, ciphertext)`.
pub fn aes_cbc_encrypt(plaintext: &[u8], key: &[u8; 16]) -> (Vec<u8>, Vec<u8>) {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec_mut::<block_padding::Pkcs7>(plaintext);

    (iv.to_vec(), ciphertext)
}

/// AES-128-CBC decrypt `ciphertext` under `key` and `iv`, stripping PKCS#7 padding.
pub fn aes_cbc_decrypt(
    ciphertext: &[u8],
    iv: &[u8],
    key: &[u8; 16],
) -> Result<Vec<u8>, error::Error> {
    if ciphertext.len() < 16 || ciphertext.len() % 16 != 0 {
        return Err(error::Error::InvalidArgs(
            "SetSecret".to_owned(),
            "ciphertext must be a non-empty multiple of the AES block size".to_owned(),
        ));
    }
    if iv.len() != 16 {
        return Err(error::Error::InvalidArgs(
            "SetSecret".to_owned(),
            "IV must be 16 bytes".to_owned(),
        ));
    }

    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<block_padding::Pkcs7>(ciphertext)
        .map_err(|e| error::Error::InvalidArgs("SetSecret".to_owned(), e.to_string()))
}

/// AES-256-GCM encrypt `plaintext` under a 32-byte master key, returning
/// `base64url(nonce || ciphertext || tag)` (unpadded).
pub fn aes_gcm_256_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<String, error::Error> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| error::Error::Persistence(format!("AES-GCM encryption failed: {}", e)))?;

    let mut payload = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload))
}

/// Inverse of [`aes_gcm_256_encrypt`].
pub fn aes_gcm_256_decrypt(key: &[u8; 32], encoded: &str) -> Result<Vec<u8>, error::Error> {
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| error::Error::Persistence(format!("invalid base64 envelope: {}", e)))?;

    if payload.len() < 12 {
        return Err(error::Error::Persistence(
            "AES-GCM envelope shorter than the nonce".to_owned(),
        ));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(12);
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| error::Error::Persistence(format!("AES-GCM decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_round_trips() {
        let key = [9u8; 16];
        let (iv, ciphertext) = aes_cbc_encrypt(b"hello secret world", &key);
        let plaintext = aes_cbc_decrypt(&ciphertext, &iv, &key).unwrap();
        assert_eq!(plaintext, b"hello secret world");
    }

    #[test]
    fn cbc_ivs_are_not_reused() {
        let key = [1u8; 16];
        let (iv_a, _) = aes_cbc_encrypt(b"same plaintext", &key);
        let (iv_b, _) = aes_cbc_encrypt(b"same plaintext", &key);
        assert_ne!(iv_a, iv_b);
    }

    #[test]
    fn cbc_decrypt_rejects_short_ciphertext() {
        let key = [1u8; 16];
        let err = aes_cbc_decrypt(&[0u8; 8], &[0u8; 16], &key).unwrap_err();
        assert!(matches!(err, error::Error::InvalidArgs(_, _)));
    }

    #[test]
    fn gcm_round_trips() {
        let key = [3u8; 32];
        let encoded = aes_gcm_256_encrypt(&key, b"at rest secret").unwrap();
        let plaintext = aes_gcm_256_decrypt(&key, &encoded).unwrap();
        assert_eq!(plaintext, b"at rest secret");
    }

    #[test]
    fn gcm_decrypt_fails_under_wrong_key() {
        let key = [3u8; 32];
        let other = [4u8; 32];
        let encoded = aes_gcm_256_encrypt(&key, b"at rest secret").unwrap();
        assert!(aes_gcm_256_decrypt(&other, &encoded).is_err());
    }
}
