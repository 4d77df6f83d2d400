//! Suppliers and the credentials issued into rotation pools
//!
//! A `Supplier` is one upstream service (base URL + protocol quirks). It is
//! the unit of blacklisting: banning a supplier suppresses every credential
//! it owns. Credentials are immutable once built and cheap to clone; the
//! supplier is shared behind an `Arc`.

use std::sync::Arc;

use common::Secret;
use serde::Deserialize;

/// How a supplier expects image-edit request bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditBody {
    /// `multipart/form-data` with one `image` part per input image.
    #[default]
    Multipart,
    /// JSON body with input images inlined as base64 data URLs.
    JsonBase64,
}

/// One upstream generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplier {
    pub name: String,
    pub base_url: String,
    pub edit_body: EditBody,
}

impl Supplier {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            edit_body: EditBody::default(),
        }
    }

    pub fn with_edit_body(mut self, edit_body: EditBody) -> Self {
        self.edit_body = edit_body;
        self
    }

    /// Absolute URL for a provider path, tolerating slashes on either side.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Secret + human-readable descriptor + owning supplier.
#[derive(Debug, Clone)]
pub struct Credential {
    pub secret: Secret<String>,
    /// Safe to log; identifies the key without revealing it.
    pub descriptor: String,
    pub supplier: Arc<Supplier>,
}

/// A credential bound to the upstream model it may call.
#[derive(Debug, Clone)]
pub struct ModelCredential {
    pub credential: Credential,
    pub model: String,
}

impl ModelCredential {
    pub fn new(
        supplier: Arc<Supplier>,
        descriptor: impl Into<String>,
        secret: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            credential: Credential {
                secret: Secret::new(secret.into()),
                descriptor: descriptor.into(),
                supplier,
            },
            model: model.into(),
        }
    }

    pub fn supplier(&self) -> &Supplier {
        &self.credential.supplier
    }

    pub fn supplier_name(&self) -> &str {
        &self.credential.supplier.name
    }

    pub fn descriptor(&self) -> &str {
        &self.credential.descriptor
    }
}
