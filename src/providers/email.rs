use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::EmailConfig;
use crate::domain::Platform;
use crate::error::DeliveryError;

use super::ProviderSender;

/// One of two deploy-time configurations, never switched per job (spec
/// §4.4, §9 "dual email senders").
pub enum EmailSender {
    Api(ApiEmailSender),
    Smtp(SmtpEmailSender),
}

impl EmailSender {
    pub fn from_config(config: &EmailConfig) -> Result<Self, DeliveryError> {
        match config.mode {
            crate::config::EmailProviderMode::Api => {
                let api_key = config.api_key.clone().ok_or_else(|| {
                    DeliveryError::NotConfigured("EMAIL_API_KEY not set for api mode".to_string())
                })?;
                let api_url = config.api_url.clone().ok_or_else(|| {
                    DeliveryError::NotConfigured("EMAIL_API_URL not set for api mode".to_string())
                })?;
                Ok(EmailSender::Api(ApiEmailSender::new(
                    api_url,
                    api_key,
                    config.from_address.clone(),
                )))
            }
            crate::config::EmailProviderMode::Smtp => {
                let host = config.smtp_host.clone().ok_or_else(|| {
                    DeliveryError::NotConfigured("SMTP_HOST not set for smtp mode".to_string())
                })?;
                Ok(EmailSender::Smtp(SmtpEmailSender::new(
                    host,
                    config.smtp_port.unwrap_or(587),
                    config.smtp_username.clone(),
                    config.smtp_password.clone(),
                    config.from_address.clone(),
                    config.from_name.clone(),
                )?))
            }
        }
    }
}

#[async_trait]
impl ProviderSender for EmailSender {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        variables: &HashMap<String, Value>,
        _platform: Option<Platform>,
    ) -> Result<(), DeliveryError> {
        match self {
            EmailSender::Api(sender) => sender.send(recipient, subject, body, variables).await,
            EmailSender::Smtp(sender) => sender.send(recipient, subject, body, variables).await,
        }
    }
}

/// Transactional email API mode: `POST {from, to[], subject, html}` with a
/// bearer API key.
pub struct ApiEmailSender {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from_address: String,
}

#[derive(Serialize)]
struct ApiEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

impl ApiEmailSender {
    pub fn new(api_url: String, api_key: String, from_address: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("email api client build");
        Self {
            http,
            api_url,
            api_key,
            from_address,
        }
    }

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        _variables: &HashMap<String, Value>,
    ) -> Result<(), DeliveryError> {
        let request = ApiEmailRequest {
            from: &self.from_address,
            to: vec![recipient],
            subject,
            html: body,
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("email api request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Transient(format!(
                "email api returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// SMTP mode: implicit TLS on port 465, STARTTLS otherwise. Anonymous send
/// when no credentials are configured (logged as a warning).
pub struct SmtpEmailSender {
    transport: SmtpTransport,
    from_address: String,
    from_name: String,
}

impl SmtpEmailSender {
    pub fn new(
        host: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        from_address: String,
        from_name: String,
    ) -> Result<Self, DeliveryError> {
        let mut builder = if port == 465 {
            SmtpTransport::relay(&host)
        } else {
            SmtpTransport::starttls_relay(&host)
        }
        .map_err(|e| DeliveryError::Validation(format!("invalid SMTP host {host}: {e}")))?
        .port(port);

        builder = match (username, password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user, pass)),
            _ => {
                warn!("sending SMTP mail without authentication (no credentials configured)");
                builder
            }
        };

        Ok(Self {
            transport: builder.build(),
            from_address,
            from_name,
        })
    }

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        _variables: &HashMap<String, Value>,
    ) -> Result<(), DeliveryError> {
        let from = format!("{} <{}>", self.from_name, self.from_address);
        let message = Message::builder()
            .from(from.parse().map_err(|e| {
                DeliveryError::Validation(format!("invalid from address: {e}"))
            })?)
            .to(recipient
                .parse()
                .map_err(|e| DeliveryError::Validation(format!("invalid recipient address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| DeliveryError::Validation(format!("failed to build message: {e}")))?;

        let transport = self.transport.clone();

        // lettre's SmtpTransport is blocking; offload it so the consumer's
        // cooperative scheduler is never stalled by SMTP I/O.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DeliveryError::Transient(format!("smtp task panicked: {e}")))?
            .map_err(|e| DeliveryError::Transient(format!("smtp send failed: {e}")))?;

        Ok(())
    }
}
