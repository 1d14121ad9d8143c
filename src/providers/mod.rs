pub mod email;
pub mod push;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::Platform;
use crate::error::DeliveryError;

/// Per-channel dispatch to a third-party provider. `recipient` is an email
/// address for the email channel or a device token for push; `title_or_subject`
/// and `body` are the rendered template output; `variables` are the job's
/// raw variables, passed through for providers that echo them (push data
/// payloads). `platform` is only meaningful for the push provider (`None`
/// for email); it carries the job's declared platform so the push sender
/// doesn't have to re-derive it from the token shape.
#[async_trait]
pub trait ProviderSender: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        title_or_subject: &str,
        body: &str,
        variables: &HashMap<String, Value>,
        platform: Option<Platform>,
    ) -> Result<(), DeliveryError>;
}
