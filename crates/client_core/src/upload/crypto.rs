use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305,
};
use sha2::{Digest, Sha256};
use shared::{domain::ContentUri, protocol::EncryptedFile};
use zeroize::Zeroize;

use crate::error::UploadError;

pub const ATTACHMENT_CIPHER: &str = "chacha20poly1305";
const ENVELOPE_VERSION: &str = "v2";

/// Key material for one attachment, minus the content reference which is
/// only known after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionEnvelope {
    pub alg: String,
    pub key: String,
    pub iv: String,
    pub sha256: String,
}

impl EncryptionEnvelope {
    pub fn into_file(self, url: ContentUri, mime_type: Option<String>) -> EncryptedFile {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), self.sha256);
        EncryptedFile {
            url,
            alg: self.alg,
            key: self.key,
            iv: self.iv,
            hashes,
            mimetype: mime_type,
            v: ENVELOPE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncryptedAttachment {
    pub ciphertext: Vec<u8>,
    pub envelope: EncryptionEnvelope,
}

#[async_trait]
pub trait AttachmentEncryptor: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedAttachment, UploadError>;
}

/// Fresh key and nonce per attachment; the hash covers the ciphertext.
pub struct ChaChaAttachmentEncryptor;

#[async_trait]
impl AttachmentEncryptor for ChaChaAttachmentEncryptor {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedAttachment, UploadError> {
        let mut key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let cipher = ChaCha20Poly1305::new(&key);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|err| UploadError::Encryption(err.to_string()));
        let encoded_key = URL_SAFE_NO_PAD.encode(key.as_slice());
        key.as_mut_slice().zeroize();
        let ciphertext = ciphertext?;

        let digest = Sha256::digest(&ciphertext);
        Ok(EncryptedAttachment {
            envelope: EncryptionEnvelope {
                alg: ATTACHMENT_CIPHER.to_string(),
                key: encoded_key,
                iv: STANDARD_NO_PAD.encode(nonce.as_slice()),
                sha256: STANDARD_NO_PAD.encode(digest),
            },
            ciphertext,
        })
    }
}
