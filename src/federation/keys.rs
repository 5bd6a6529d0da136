//! Local actor key pairs
//!
//! The key store is the only owner of private key material. Signing code
//! borrows a `KeyPair` and parses the private key for the duration of a
//! single signature; the parsed key is zeroed when it is dropped.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};
use crate::vocab::PublicKey;

/// Key size for generated actor keys
pub const DEFAULT_KEY_BITS: usize = 2048;

/// RSA key pair belonging to one local actor
pub struct KeyPair {
    pub actor_id: String,
    /// Key identifier advertised in the actor document
    pub key_id: String,
    pub public_key_pem: String,
    private_key_pem: Zeroizing<String>,
}

impl KeyPair {
    /// Generate a fresh key pair. CPU-bound; prefer `KeyStore::generate`
    /// from async code.
    pub fn generate(actor_id: &str, bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, bits).map_err(|e| AppError::Internal(e.into()))?;
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?;
        Self::assemble(actor_id, &private_key, private_key_pem)
    }

    /// Load an existing PKCS#8 or PKCS#1 private key.
    pub fn from_pem(actor_id: &str, private_key_pem: &str) -> Result<Self> {
        let private_key = parse_private_key(private_key_pem)?;
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?;
        Self::assemble(actor_id, &private_key, private_key_pem)
    }

    fn assemble(
        actor_id: &str,
        private_key: &RsaPrivateKey,
        private_key_pem: Zeroizing<String>,
    ) -> Result<Self> {
        let public_key_pem = RsaPublicKey::from(private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            actor_id: actor_id.to_string(),
            key_id: format!("{}#main-key", actor_id),
            public_key_pem,
            private_key_pem,
        })
    }

    /// Public half as advertised in the actor document
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            id: self.key_id.clone(),
            owner: self.actor_id.clone(),
            public_key_pem: self.public_key_pem.clone(),
        }
    }

    /// Parse the private key into a signer for one signing operation.
    pub(crate) fn signing_key(&self) -> Result<rsa::pkcs1v15::SigningKey<Sha256>> {
        let private_key = parse_private_key(&self.private_key_pem)?;
        Ok(rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("actor_id", &self.actor_id)
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"[redacted]")
            .finish()
    }
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    use rsa::pkcs1::DecodeRsaPrivateKey;

    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Validation(format!("Invalid private key: {}", e)))
}

async fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    let io_error = |e: std::io::Error| {
        AppError::Internal(anyhow::anyhow!(
            "failed to write key file {}: {}",
            path.display(),
            e
        ))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(io_error)?;
    tokio::io::AsyncWriteExt::write_all(&mut file, pem.as_bytes())
        .await
        .map_err(io_error)?;
    file.sync_all().await.map_err(io_error)
}

/// Key pairs of local actors, keyed by actor URI.
#[derive(Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<String, Arc<KeyPair>>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key pair, replacing any previous pair for the actor.
    pub async fn insert(&self, key_pair: KeyPair) -> Arc<KeyPair> {
        let key_pair = Arc::new(key_pair);
        self.keys
            .write()
            .await
            .insert(key_pair.actor_id.clone(), key_pair.clone());
        key_pair
    }

    /// Generate and register a key pair off the async executor.
    pub async fn generate(&self, actor_id: &str, bits: usize) -> Result<Arc<KeyPair>> {
        let owned_actor_id = actor_id.to_string();
        let key_pair = tokio::task::spawn_blocking(move || KeyPair::generate(&owned_actor_id, bits))
            .await
            .map_err(|e| AppError::Internal(e.into()))??;

        tracing::info!(actor = %actor_id, key_id = %key_pair.key_id, "Generated actor key pair");
        Ok(self.insert(key_pair).await)
    }

    /// Load the actor's key from a PKCS#8 PEM file, or generate one and
    /// write it there when the file does not exist yet.
    ///
    /// # Errors
    /// - `Validation` if the file holds no usable private key
    /// - `Internal` if the file cannot be read or written
    pub async fn load_or_generate(
        &self,
        actor_id: &str,
        path: &Path,
        bits: usize,
    ) -> Result<Arc<KeyPair>> {
        match tokio::fs::read_to_string(path).await {
            Ok(pem) => {
                let pem = Zeroizing::new(pem);
                let key_pair = KeyPair::from_pem(actor_id, &pem)?;
                tracing::info!(actor = %actor_id, path = %path.display(), "Loaded actor key pair");
                return Ok(self.insert(key_pair).await);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "failed to read key file {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        let key_pair = self.generate(actor_id, bits).await?;
        write_private_key(path, &key_pair.private_key_pem).await?;
        tracing::info!(actor = %actor_id, path = %path.display(), "Saved new actor key pair");
        Ok(key_pair)
    }

    /// Replace an actor's key pair with a freshly generated one.
    ///
    /// Signatures already verified by peers are unaffected; peers pick up
    /// the new key when their cached copy of the actor expires or when
    /// they refetch on an unknown key.
    pub async fn rotate(&self, actor_id: &str, bits: usize) -> Result<Arc<KeyPair>> {
        if !self.keys.read().await.contains_key(actor_id) {
            return Err(AppError::KeyNotFound(actor_id.to_string()));
        }
        let key_pair = self.generate(actor_id, bits).await?;
        tracing::info!(actor = %actor_id, "Rotated actor key pair");
        Ok(key_pair)
    }

    /// Key pair used to sign on behalf of an actor.
    ///
    /// # Errors
    /// `KeyNotFound` if the actor has no local key.
    pub async fn get_signing_key(&self, actor_id: &str) -> Result<Arc<KeyPair>> {
        self.keys
            .read()
            .await
            .get(actor_id)
            .cloned()
            .ok_or_else(|| AppError::KeyNotFound(actor_id.to_string()))
    }

    /// Public key of a local actor by key identifier.
    pub async fn get_public_key(&self, actor_id: &str, key_id: &str) -> Result<PublicKey> {
        let key_pair = self.get_signing_key(actor_id).await?;
        if key_pair.key_id != key_id {
            return Err(AppError::KeyNotFound(key_id.to_string()));
        }
        Ok(key_pair.public_key())
    }

    pub async fn remove(&self, actor_id: &str) -> Option<Arc<KeyPair>> {
        self.keys.write().await.remove(actor_id)
    }

    pub async fn contains(&self, actor_id: &str) -> bool {
        self.keys.read().await.contains_key(actor_id)
    }
}
