mod render;

pub use render::{render, strip_html, RenderError};

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::DeliveryError;

/// Template descriptor as returned by the template service. Never persisted
/// by the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDescriptor {
    #[allow(dead_code)]
    pub code: String,
    pub subject_or_title: String,
    pub body: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub declared_variables: Vec<String>,
    #[allow(dead_code)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateEnvelope {
    success: bool,
    data: Option<TemplateData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateData {
    code: String,
    subject: Option<String>,
    #[serde(default)]
    html_body: String,
    #[serde(default)]
    text_body: String,
    #[serde(default)]
    variables: Vec<String>,
    language: Option<String>,
}

/// HTTP client for the external template service.
pub struct TemplateClient {
    http: reqwest::Client,
    base_url: String,
}

impl TemplateClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("template client build");

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// `GET {template_service_url}/api/v1/templates/{code}`. HTTP non-2xx,
    /// `success=false`, or a missing `data` envelope all raise a fetchable
    /// failure that the caller counts against the template-service breaker.
    pub async fn fetch(&self, template_code: &str) -> Result<TemplateDescriptor, DeliveryError> {
        let url = format!("{}/api/v1/templates/{}", self.base_url, template_code);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("template fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Transient(format!(
                "template service returned {}",
                response.status()
            )));
        }

        let envelope: TemplateEnvelope = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transient(format!("invalid template response: {e}")))?;

        if !envelope.success {
            return Err(DeliveryError::Transient(
                envelope
                    .error
                    .unwrap_or_else(|| "template service reported failure".to_string()),
            ));
        }

        let data = envelope
            .data
            .ok_or_else(|| DeliveryError::Transient("template response missing data".to_string()))?;

        // Prefer the HTML body; fall back to text. For push, the chosen
        // body is HTML-stripped later by the renderer.
        let body = if !data.html_body.is_empty() {
            data.html_body
        } else {
            data.text_body
        };

        Ok(TemplateDescriptor {
            code: data.code,
            subject_or_title: data.subject.unwrap_or_default(),
            body,
            declared_variables: data.variables,
            language: data.language,
        })
    }
}

/// Render a descriptor's subject/title and body against job variables,
/// returning `(subject_or_title, body)`. Missing variables render as empty
/// strings and never raise; malformed template syntax is a terminal
/// `DeliveryError::Render`.
pub fn render_descriptor(
    descriptor: &TemplateDescriptor,
    variables: &std::collections::HashMap<String, Value>,
) -> Result<(String, String), DeliveryError> {
    let subject = render(&descriptor.subject_or_title, variables)
        .map_err(|e| DeliveryError::Render(e.to_string()))?;
    let body = render(&descriptor.body, variables).map_err(|e| DeliveryError::Render(e.to_string()))?;
    Ok((subject, body))
}
