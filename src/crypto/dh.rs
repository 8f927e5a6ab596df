//! Diffie-Hellman key agreement over the IETF/RFC 2409 "Second Oakley Group"
//! (MODP, 1024-bit), as required by `dh-ietf1024-sha256-aes128-cbc-pkcs7`.
use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;

use crate::error;

/// Length in bytes of a MODP-1024 public key on the wire.
pub const PUBLIC_KEY_LEN: usize = 128;

/// RFC 2409, section 6.2: the 1024-bit MODP group generator.
const GENERATOR: u64 = 2;

/// RFC 2409, section 6.2: the 1024-bit MODP group prime, as a hex string.
const PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD",
    "129024E088A67CC74020BBEA63B139B22514A08798E3404",
    "DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C",
    "245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406",
    "B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE",
    "65381FFFFFFFFFFFFFFFF",
);

/// A generated scalar and its public counterpart, derived once per `OpenSession` call.
pub struct KeyPair {
    private: BigUint,
    pub public: [u8; PUBLIC_KEY_LEN],
}

fn prime() -> BigUint {
    BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16)
        .expect("hard-coded MODP-1024 prime must parse")
}

fn to_fixed_width(value: &BigUint) -> [u8; PUBLIC_KEY_LEN] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; PUBLIC_KEY_LEN];
    assert!(
        bytes.len() <= PUBLIC_KEY_LEN,
        "DH value exceeds 1024-bit group width"
    );
    out[PUBLIC_KEY_LEN - bytes.len()..].copy_from_slice(&bytes);
    out
}

impl KeyPair {
    /// Generate a fresh private scalar in `[2, p-2]` and compute the matching public key.
    pub fn generate() -> Self {
        let p = prime();
        let lower = BigUint::from(2u32);
        let upper = &p - BigUint::from(2u32);

        let mut rng = rand::rngs::OsRng;
        let private = rng.gen_biguint_range(&lower, &upper);
        let public = BigUint::from(GENERATOR).modpow(&private, &p);

        Self {
            private,
            public: to_fixed_width(&public),
        }
    }

    /// Compute the shared secret against a peer's 128-byte big-endian public key,
    /// returning it padded/truncated to exactly 128 bytes for HKDF input.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN], error::Error> {
        if peer_public.len() != PUBLIC_KEY_LEN {
            return Err(error::Error::InvalidArgs(
                "OpenSession".to_owned(),
                format!(
                    "DH public key must be {} bytes, got {}",
                    PUBLIC_KEY_LEN,
                    peer_public.len()
                ),
            ));
        }

        let p = prime();
        let peer = BigUint::from_bytes_be(peer_public);
        if peer.is_zero() || peer >= p {
            return Err(error::Error::InvalidArgs(
                "OpenSession".to_owned(),
                "DH public key out of range for the 1024-bit MODP group".to_owned(),
            ));
        }

        let shared = peer.modpow(&self.private, &p);
        Ok(to_fixed_width(&shared))
    }
}

/// Derive the 16-byte AES-128 session key via HKDF-SHA256, empty salt and info,
/// from the 128-byte shared secret, per the secret-service transfer-secrets spec.
pub fn derive_session_key(shared_secret: &[u8]) -> Result<[u8; 16], error::Error> {
    let (_, hk) = hkdf::Hkdf::<sha2::Sha256>::extract(None, shared_secret);
    let mut output = [0u8; 16];
    hk.expand(&[], &mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_keys_are_128_bytes() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public.len(), PUBLIC_KEY_LEN);
    }

    #[test]
    fn shared_secret_agrees_between_both_sides() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let alice_shared = alice.shared_secret(&bob.public).unwrap();
        let bob_shared = bob.shared_secret(&alice.public).unwrap();

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn shared_secret_rejects_wrong_length() {
        let alice = KeyPair::generate();
        let err = alice.shared_secret(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, error::Error::InvalidArgs(_, _)));
    }

    #[test]
    fn derived_keys_are_16_bytes_and_deterministic() {
        let shared = [7u8; PUBLIC_KEY_LEN];
        let a = derive_session_key(&shared).unwrap();
        let b = derive_session_key(&shared).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
