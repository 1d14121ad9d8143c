use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which transport class a job belongs to. Each worker binary only ever
/// handles one channel, but the type is shared so the delivery engine and
/// queue topology helpers can be generic over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn routing_key(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    pub fn queue_name(&self) -> &'static str {
        match self {
            Channel::Email => "email.queue",
            Channel::Push => "push.queue",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

/// Push platform, explicit on the job or inferred from token shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

/// One enqueued notification delivery request. Fields not relevant to a
/// channel are simply absent on the wire (`user_email` for push,
/// `push_token`/`platform` for email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub notification_id: String,
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,

    pub template_code: String,
    pub variables: HashMap<String, Value>,
    pub priority: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Job {
    /// The address the provider sends to: an email address for the email
    /// channel, a device token for push.
    pub fn recipient(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.user_email.as_deref(),
            Channel::Push => self.push_token.as_deref(),
        }
    }

    /// Correlation id used for log scoping: `request_id` when present,
    /// otherwise `notification_id` (spec: push jobs may omit `request_id`).
    pub fn correlation_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or(&self.notification_id)
    }

    /// A clone of this job with `retry_count` incremented, for republishing
    /// on the same routing key.
    pub fn with_incremented_retry(&self) -> Job {
        let mut next = self.clone();
        next.retry_count += 1;
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

/// Status record written to the key/value store at
/// `notification:status:{notification_id}` with a 24h TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub notification_id: String,
    pub status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
    pub service: String,
}

/// Record published to the `failed` routing key when a job exhausts both
/// the inner and outer retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub job: Job,
    pub final_error: String,
    pub failed_at: DateTime<Utc>,
}
