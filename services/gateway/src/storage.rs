//! Filesystem object store with signed, expiring URLs
//!
//! Objects are written under one root directory with a random key. A public
//! URL carries `expires` (unix seconds) and `signature`, where the signature
//! is the URL-safe base64 of SHA-256 over `secret:key:expires`. The admin
//! listener serves `/objects/{key}` after checking both.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use dispatch::{CollabError, CollabFuture, ObjectStore};
use sha2::{Digest, Sha256};
use tracing::debug;

pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
    secret: Secret<String>,
}

/// A stored object read back for serving.
#[derive(Debug)]
pub struct StoredObject {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl FsObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        secret: Secret<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            secret,
        }
    }

    fn digest(&self, key: &str, expires: u64) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.expose().as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(expires.to_string().as_bytes());
        hasher.finalize().to_vec()
    }

    fn sign(&self, key: &str, expires: u64) -> String {
        URL_SAFE_NO_PAD.encode(self.digest(key, expires))
    }

    /// Check a presented signature against `now` (unix seconds).
    pub fn verify(&self, key: &str, expires: u64, signature: &str, now: u64) -> bool {
        if expires < now {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        constant_time_eq(&self.digest(key, expires), &presented)
    }

    /// Read an object for a request already checked with `verify`.
    pub async fn read(&self, key: &str) -> Result<StoredObject, CollabError> {
        if !valid_key(key) {
            return Err(CollabError::NotFound(key.to_string()));
        }
        let bytes = match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollabError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(StoredObject {
            content_type: content_type_for(key),
            bytes,
        })
    }
}

impl ObjectStore for FsObjectStore {
    fn upload<'a>(&'a self, bytes: Vec<u8>, content_type: &'a str) -> CollabFuture<'a, String> {
        Box::pin(async move {
            let key = format!(
                "{}.{}",
                uuid::Uuid::new_v4().as_simple(),
                extension_for(content_type)
            );
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::write(self.root.join(&key), &bytes).await?;
            debug!(key = %key, bytes = bytes.len(), "object stored");
            Ok(key)
        })
    }

    fn signed_url<'a>(&'a self, key: &'a str, ttl: Duration) -> CollabFuture<'a, String> {
        Box::pin(async move {
            if !valid_key(key) || !tokio::fs::try_exists(self.root.join(key)).await? {
                return Err(CollabError::NotFound(key.to_string()));
            }
            let expires = unix_now().saturating_add(ttl.as_secs());
            Ok(format!(
                "{}/{key}?expires={expires}&signature={}",
                self.public_base_url,
                self.sign(key, expires)
            ))
        })
    }
}

/// Byte-wise comparison whose running time does not depend on where the
/// inputs differ.
fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Keys are generated here; anything else (path separators, dot-dot) is
/// never a stored object.
fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
