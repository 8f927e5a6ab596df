//! Implementation of `org.freedesktop.Secret.Session` D-Bus interface.
//!
//! The state tracked by the `Session` is used to encrypt and decrypt
//! secrets. So, although not part of the `org.freedesktop.Secret.Session`
//! D-Bus interface, we implement encryption and decryption methods here.
use crate::bus::DbusObject;
use crate::crypto;
use crate::error;

/// Supported encryption algorithms.
///
/// Based on: https://specifications.freedesktop.org/secret-service-spec/latest/transfer-secrets.html,
/// only two algorithms are supported: `Algorithm::Plain` or `Algorithm::Dh`
/// short for dh-ietf1024-sha256-aes128-cbc-pkcs7.
#[derive(Debug, PartialEq)]
pub enum Algorithm {
    Plain,
    Dh { aes_key: [u8; 16] },
}

impl Algorithm {
    pub fn encrypt(&self, plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
        match self {
            Algorithm::Dh { aes_key } => {
                let (iv, ciphertext) = crypto::aes_cbc_encrypt(plaintext, aes_key);
                (ciphertext, iv)
            }
            Algorithm::Plain => (plaintext.to_vec(), Vec::new()),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, error::Error> {
        match self {
            Algorithm::Dh { aes_key } => crypto::aes_cbc_decrypt(ciphertext, iv, aes_key),
            Algorithm::Plain => Ok(ciphertext.to_vec()),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Session {
    pub algorithm: Algorithm,
    closed: bool,
    pub object_path: zvariant::OwnedObjectPath,
}

/// Builder pattern implementation for `Session`.
///
/// This allows separating the encryption algorithm setup (when necessary).
pub struct SessionBuilder {
    object_path: zvariant::OwnedObjectPath,
}

impl SessionBuilder {
    pub fn plain(self) -> Session {
        Session {
            algorithm: Algorithm::Plain,
            closed: false,
            object_path: self.object_path,
        }
    }

    /// Negotiate `dh-ietf1024-sha256-aes128-cbc-pkcs7`: generate our own
    /// MODP-1024 key pair, derive the shared AES-128 key via HKDF-SHA256,
    /// and return the session alongside our 128-byte public key.
    pub fn dh(
        self,
        client_public_key: &[u8],
    ) -> Result<(Session, [u8; crypto::dh::PUBLIC_KEY_LEN]), error::Error> {
        let key_pair = crypto::dh::KeyPair::generate();
        let shared_secret = key_pair.shared_secret(client_public_key)?;
        let aes_key = crypto::dh::derive_session_key(&shared_secret)?;

        Ok((
            Session {
                algorithm: Algorithm::Dh { aes_key },
                closed: false,
                object_path: self.object_path,
            },
            key_pair.public,
        ))
    }
}

impl DbusObject for Session {
    fn get_object_path(&self) -> zvariant::OwnedObjectPath {
        self.object_path.clone()
    }
}

impl Session {
    pub fn new(id: &uuid::Uuid) -> SessionBuilder {
        let mut object_path = "/org/freedesktop/secrets/session/".to_owned();
        object_path.push_str(
            id.as_simple()
                .encode_lower(&mut uuid::Uuid::encode_buffer()),
        );
        let path = zvariant::OwnedObjectPath::try_from(object_path)
            .expect("uuid-derived path must be valid");

        SessionBuilder { object_path: path }
    }

    pub fn error_if_closed(&self) -> Result<(), error::Error> {
        if self.closed {
            Err(error::Error::SessionIsClosed)
        } else {
            Ok(())
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
        self.algorithm.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, error::Error> {
        self.algorithm.decrypt(ciphertext, iv)
    }

    pub fn is_encrypted(&self) -> bool {
        match self.algorithm {
            Algorithm::Dh { aes_key: _ } => true,
            Algorithm::Plain => false,
        }
    }
}

#[zbus::interface(name = "org.freedesktop.Secret.Session")]
impl Session {
    /// Close method
    async fn close(
        &mut self,
        #[zbus(object_server)] object_server: &zbus::ObjectServer,
    ) -> Result<(), error::Error> {
        self.error_if_closed()?;

        self.closed = true;
        self.remove(object_server).await?;

        log::info!("Closed session on '{}'", self.object_path.as_str());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_session_round_trips_without_transformation() {
        let session = Session::new(&uuid::Uuid::new_v4()).plain();
        let (ciphertext, iv) = session.encrypt(b"hunter2");
        assert!(iv.is_empty());
        let plaintext = session.decrypt(&ciphertext, &iv).unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn dh_session_round_trips_arbitrary_plaintext() {
        let server = Session::new(&uuid::Uuid::new_v4());
        let client_kp = crypto::dh::KeyPair::generate();

        let (server_session, server_public) = server.dh(&client_kp.public).unwrap();
        let client_shared = client_kp.shared_secret(&server_public).unwrap();
        let client_key = crypto::dh::derive_session_key(&client_shared).unwrap();

        let plaintext = vec![0x42u8; 1000];
        let (ciphertext, iv) = server_session.encrypt(&plaintext);

        let decrypted = crypto::aes_cbc_decrypt(&ciphertext, &iv, &client_key).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}
