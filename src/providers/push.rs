use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::PushConfig;
use crate::domain::Platform;
use crate::error::DeliveryError;
use crate::template::strip_html;

use super::ProviderSender;

/// Dispatches to mobile-OS vendor push services by platform: vendor A for
/// Android-style tokens, vendor B for iOS-style tokens.
pub struct PushSender {
    http: reqwest::Client,
    android_server_key: Option<String>,
    android_endpoint: String,
    ios_server_key: Option<String>,
    ios_endpoint: String,
}

/// `platform` if explicitly set on the job, else a token-format heuristic:
/// a 64-hex-character token looks like an APNs device token (iOS),
/// anything else is treated as an Android (FCM-style) registration token.
pub fn resolve_platform(declared: Option<Platform>, token: &str) -> Platform {
    if let Some(platform) = declared {
        return platform;
    }
    let is_64_hex = token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit());
    if is_64_hex {
        Platform::Ios
    } else {
        Platform::Android
    }
}

impl PushSender {
    pub fn from_config(config: &PushConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("push client build");

        Self {
            http,
            android_server_key: config.android_server_key.clone(),
            android_endpoint: config.android_endpoint.clone(),
            ios_server_key: config.ios_server_key.clone(),
            ios_endpoint: config.ios_endpoint.clone(),
        }
    }

    async fn send_android(
        &self,
        token: &str,
        title: &str,
        body: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<(), DeliveryError> {
        let server_key = self.android_server_key.as_ref().ok_or_else(|| {
            DeliveryError::NotConfigured("push android server key not configured".to_string())
        })?;

        // Vendor A's data payload requires string values.
        let data: HashMap<String, String> = variables
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect();

        let payload = json!({
            "token": token,
            "notification": { "title": title, "body": body },
            "data": data,
            "android": {
                "priority": "high",
                "notification": { "sound": "default" }
            }
        });

        let response = self
            .http
            .post(&self.android_endpoint)
            .bearer_auth(server_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("android push request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Transient(format!(
                "android push vendor returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn send_ios(
        &self,
        token: &str,
        title: &str,
        body: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<(), DeliveryError> {
        let server_key = self.ios_server_key.as_ref().ok_or_else(|| {
            DeliveryError::NotConfigured("push ios server key not configured".to_string())
        })?;

        let mut payload = json!({
            "aps": {
                "alert": { "title": title, "body": body },
                "sound": "default",
                "badge": 1
            }
        });
        if let Value::Object(map) = &mut payload {
            for (k, v) in variables {
                map.insert(k.clone(), v.clone());
            }
        }

        let url = format!("{}/{}", self.ios_endpoint, token);
        let response = self
            .http
            .post(&url)
            .bearer_auth(server_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("ios push request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Transient(format!(
                "ios push vendor returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ProviderSender for PushSender {
    async fn send(
        &self,
        recipient: &str,
        title_or_subject: &str,
        body: &str,
        variables: &HashMap<String, Value>,
        platform: Option<Platform>,
    ) -> Result<(), DeliveryError> {
        let platform = resolve_platform(platform, recipient);
        let body = strip_html(body);
        match platform {
            Platform::Android => self.send_android(recipient, title_or_subject, &body, variables).await,
            Platform::Ios => self.send_ios(recipient, title_or_subject, &body, variables).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_strips_html_before_dispatching_to_android_vendor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "notification": { "title": "Hi", "body": "Hello Ada" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = PushSender {
            http: reqwest::Client::new(),
            android_server_key: Some("key".to_string()),
            android_endpoint: server.uri(),
            ios_server_key: None,
            ios_endpoint: String::new(),
        };

        let result = sender
            .send(
                "fcm-token",
                "Hi",
                "<p>Hello Ada</p>",
                &HashMap::new(),
                Some(Platform::Android),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn send_strips_html_before_dispatching_to_ios_vendor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(".*"))
            .and(body_partial_json(serde_json::json!({
                "aps": { "alert": { "title": "Hi", "body": "Hello Ada" } }
            })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = PushSender {
            http: reqwest::Client::new(),
            android_server_key: None,
            android_endpoint: String::new(),
            ios_server_key: Some("key".to_string()),
            ios_endpoint: server.uri(),
        };

        let token = "a".repeat(64);
        let result = sender
            .send(&token, "Hi", "<p>Hello Ada</p>", &HashMap::new(), Some(Platform::Ios))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn platform_heuristic_64_hex_is_ios() {
        let token = "a".repeat(64);
        assert_eq!(resolve_platform(None, &token), Platform::Ios);
    }

    #[test]
    fn platform_heuristic_other_token_is_android() {
        assert_eq!(resolve_platform(None, "fcm-registration-token-123"), Platform::Android);
    }

    #[test]
    fn explicit_platform_overrides_heuristic() {
        let token = "a".repeat(64);
        assert_eq!(resolve_platform(Some(Platform::Android), &token), Platform::Android);
    }
}
