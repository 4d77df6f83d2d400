//! Input images attached to a job

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{DispatchError, Result};

/// An image supplied by the caller, kept as raw bytes and re-encoded per
/// provider dialect (multipart part, data URL, bare base64).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImage {
    pub mime: String,
    pub data: Arc<[u8]>,
}

impl InputImage {
    /// Wrap raw bytes, detecting the mime type from magic bytes (PNG when
    /// unknown).
    pub fn new(data: Vec<u8>) -> Self {
        let mime = sniff_mime(&data).to_string();
        Self {
            mime,
            data: data.into(),
        }
    }

    /// Parse `data:<mime>;base64,<payload>` or a bare base64 string.
    pub fn from_data_url(input: &str) -> Result<Self> {
        let input = input.trim();
        let (declared, payload) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest.split_once(',').ok_or_else(|| {
                    DispatchError::InvalidJob("data URL without payload".into())
                })?;
                let mime = meta.strip_suffix(";base64").ok_or_else(|| {
                    DispatchError::InvalidJob("data URL is not base64 encoded".into())
                })?;
                (Some(mime), payload)
            }
            None => (None, input),
        };

        let data = STANDARD
            .decode(payload)
            .map_err(|e| DispatchError::InvalidJob(format!("image is not valid base64: {e}")))?;
        if data.is_empty() {
            return Err(DispatchError::InvalidJob("image is empty".into()));
        }

        let mut image = Self::new(data);
        if let Some(mime) = declared.filter(|m| !m.is_empty()) {
            image.mime = mime.to_string();
        }
        Ok(image)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }

    /// File extension for multipart file names.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/png"
    }
}
