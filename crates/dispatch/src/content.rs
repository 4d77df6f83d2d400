//! Per-provider request shapes
//!
//! A `RequestContent` knows its HTTP method, its path relative to the
//! supplier base URL, and how to build a body for a given credential (the
//! model comes from the credential, the edit encoding from its supplier).
//! Bodies are built fresh per call: a multipart form cannot be reused.

use provider::{EditBody, ModelCredential};
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

use crate::error::{DispatchError, Result};
use crate::input::InputImage;

pub enum RequestBody {
    Json(Value),
    Multipart(Form),
    Empty,
}

impl RequestBody {
    pub fn label(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "json",
            RequestBody::Multipart(_) => "multipart",
            RequestBody::Empty => "empty",
        }
    }
}

pub trait RequestContent: Send + Sync {
    fn method(&self) -> Method {
        Method::POST
    }

    fn path(&self) -> String;

    fn body(&self, credential: &ModelCredential) -> Result<RequestBody>;
}

/// Chat completion with optional inline images.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub images: Vec<InputImage>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<InputImage>) -> Self {
        self.images = images;
        self
    }
}

impl RequestContent for ChatRequest {
    fn path(&self) -> String {
        "/v1/chat/completions".into()
    }

    fn body(&self, credential: &ModelCredential) -> Result<RequestBody> {
        let mut content = vec![json!({ "type": "text", "text": self.prompt })];
        content.extend(self.images.iter().map(|image| {
            json!({ "type": "image_url", "image_url": { "url": image.data_url() } })
        }));
        Ok(RequestBody::Json(json!({
            "model": credential.model,
            "messages": [{ "role": "user", "content": content }],
        })))
    }
}

/// Image edit, encoded per the supplier's `EditBody`.
#[derive(Debug, Clone)]
pub struct ImageEditRequest {
    pub prompt: String,
    pub images: Vec<InputImage>,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub n: u32,
}

impl ImageEditRequest {
    fn multipart(&self, model: &str) -> Result<Form> {
        // Several images go in as the array form `image[]`
        let field = if self.images.len() > 1 {
            "image[]"
        } else {
            "image"
        };
        let mut form = Form::new()
            .text("model", model.to_string())
            .text("prompt", self.prompt.clone())
            .text("n", self.n.to_string());
        for (i, image) in self.images.iter().enumerate() {
            let part = Part::bytes(image.data.to_vec())
                .file_name(format!("image-{i}.{}", image.extension()))
                .mime_str(&image.mime)
                .map_err(|e| DispatchError::Body(format!("invalid image mime: {e}")))?;
            form = form.part(field, part);
        }
        if let Some(quality) = &self.quality {
            form = form.text("quality", quality.clone());
        }
        if let Some(size) = &self.size {
            form = form.text("size", size.clone());
        }
        Ok(form)
    }

    fn json(&self, model: &str) -> Value {
        let images: Vec<String> = self.images.iter().map(InputImage::data_url).collect();
        let mut body = json!({
            "model": model,
            "prompt": self.prompt,
            "image": images,
            "n": self.n,
        });
        insert_opt(&mut body, "quality", &self.quality);
        insert_opt(&mut body, "size", &self.size);
        body
    }
}

impl RequestContent for ImageEditRequest {
    fn path(&self) -> String {
        "/v1/images/edits".into()
    }

    fn body(&self, credential: &ModelCredential) -> Result<RequestBody> {
        match credential.supplier().edit_body {
            EditBody::Multipart => Ok(RequestBody::Multipart(self.multipart(&credential.model)?)),
            EditBody::JsonBase64 => Ok(RequestBody::Json(self.json(&credential.model))),
        }
    }
}

/// OpenAI-style text-to-image generation.
#[derive(Debug, Clone)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub n: u32,
}

impl RequestContent for ImageGenerationRequest {
    fn path(&self) -> String {
        "/v1/images/generations".into()
    }

    fn body(&self, credential: &ModelCredential) -> Result<RequestBody> {
        let mut body = json!({
            "model": credential.model,
            "prompt": self.prompt,
            "n": self.n,
        });
        insert_opt(&mut body, "quality", &self.quality);
        insert_opt(&mut body, "size", &self.size);
        Ok(RequestBody::Json(body))
    }
}

/// Volcengine Ark image generation, optionally guided by reference images.
#[derive(Debug, Clone)]
pub struct VolcGenerationRequest {
    pub prompt: String,
    pub size: Option<String>,
    pub images: Vec<InputImage>,
}

impl RequestContent for VolcGenerationRequest {
    fn path(&self) -> String {
        "/api/v3/images/generations".into()
    }

    fn body(&self, credential: &ModelCredential) -> Result<RequestBody> {
        let mut body = json!({
            "model": credential.model,
            "prompt": self.prompt,
            "response_format": "url",
            "watermark": false,
        });
        insert_opt(&mut body, "size", &self.size);
        match self.images.as_slice() {
            [] => {}
            [single] => {
                body["image"] = Value::String(single.data_url());
            }
            many => {
                body["image"] = json!(many.iter().map(InputImage::data_url).collect::<Vec<_>>());
            }
        }
        Ok(RequestBody::Json(body))
    }
}

/// Midjourney-proxy imagine submit.
#[derive(Debug, Clone)]
pub struct MidjourneySubmit {
    pub prompt: String,
    pub images: Vec<InputImage>,
}

impl RequestContent for MidjourneySubmit {
    fn path(&self) -> String {
        "/mj/submit/imagine".into()
    }

    fn body(&self, _credential: &ModelCredential) -> Result<RequestBody> {
        let images: Vec<String> = self.images.iter().map(InputImage::data_url).collect();
        Ok(RequestBody::Json(json!({
            "prompt": self.prompt,
            "base64Array": images,
        })))
    }
}

/// Midjourney-proxy job fetch for one job id.
#[derive(Debug, Clone)]
pub struct MidjourneyFetch {
    pub job_id: String,
}

impl RequestContent for MidjourneyFetch {
    fn method(&self) -> Method {
        Method::GET
    }

    fn path(&self) -> String {
        format!("/mj/task/{}/fetch", self.job_id)
    }

    fn body(&self, _credential: &ModelCredential) -> Result<RequestBody> {
        Ok(RequestBody::Empty)
    }
}

fn insert_opt(body: &mut Value, key: &str, value: &Option<String>) {
    if let (Some(map), Some(value)) = (body.as_object_mut(), value) {
        map.insert(key.to_string(), Value::String(value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::Supplier;
    use std::sync::Arc;

    fn credential(edit_body: EditBody) -> ModelCredential {
        let supplier = Arc::new(Supplier::new("relay", "https://relay.test").with_edit_body(edit_body));
        ModelCredential::new(supplier, "relay-1", "sk-test", "gpt-image-1")
    }

    fn png() -> InputImage {
        InputImage::new(vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0])
    }

    fn json_body(content: &dyn RequestContent, credential: &ModelCredential) -> Value {
        match content.body(credential).unwrap() {
            RequestBody::Json(v) => v,
            other => panic!("expected json body, got {}", other.label()),
        }
    }

    #[test]
    fn chat_body_carries_model_text_and_images() {
        let request = ChatRequest::new("draw a cat").with_images(vec![png()]);
        let body = json_body(&request, &credential(EditBody::Multipart));
        assert_eq!(body["model"], "gpt-image-1");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], "draw a cat");
        assert!(
            content[1]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
        assert_eq!(request.path(), "/v1/chat/completions");
        assert_eq!(request.method(), Method::POST);
    }

    #[test]
    fn edit_body_follows_supplier_style() {
        let request = ImageEditRequest {
            prompt: "make it blue".into(),
            images: vec![png(), png()],
            size: Some("1024x1024".into()),
            quality: None,
            n: 1,
        };

        let body = json_body(&request, &credential(EditBody::JsonBase64));
        assert_eq!(body["image"].as_array().unwrap().len(), 2);
        assert_eq!(body["size"], "1024x1024");
        assert!(body.get("quality").is_none());

        let multipart = request.body(&credential(EditBody::Multipart)).unwrap();
        assert_eq!(multipart.label(), "multipart");
    }

    #[test]
    fn volc_single_reference_is_a_string() {
        let request = VolcGenerationRequest {
            prompt: "lake".into(),
            size: None,
            images: vec![png()],
        };
        let body = json_body(&request, &credential(EditBody::Multipart));
        assert!(body["image"].is_string());
        assert_eq!(body["response_format"], "url");
        assert_eq!(request.path(), "/api/v3/images/generations");
    }

    #[test]
    fn midjourney_fetch_path_threads_job_id() {
        let fetch = MidjourneyFetch {
            job_id: "42".into(),
        };
        assert_eq!(fetch.path(), "/mj/task/42/fetch");
        assert_eq!(fetch.method(), Method::GET);
        assert!(matches!(
            fetch.body(&credential(EditBody::Multipart)).unwrap(),
            RequestBody::Empty
        ));
    }

    #[test]
    fn midjourney_submit_body() {
        let submit = MidjourneySubmit {
            prompt: "castle --ar 16:9".into(),
            images: vec![],
        };
        let body = json_body(&submit, &credential(EditBody::Multipart));
        assert_eq!(body["prompt"], "castle --ar 16:9");
        assert_eq!(body["base64Array"], json!([]));
    }
}
