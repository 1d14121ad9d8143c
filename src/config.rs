use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub status_store: StatusStoreConfig,
    pub template_service: TemplateServiceConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub email: EmailConfig,
    pub push: PushConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub queue_prefetch_count: u16,
}

#[derive(Debug, Clone)]
pub struct StatusStoreConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct TemplateServiceConfig {
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retry_attempts: u32,
    pub retry_base_delay_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub recovery_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProviderMode {
    Api,
    Smtp,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub mode: EmailProviderMode,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub from_address: String,
    pub from_name: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub android_server_key: Option<String>,
    pub android_endpoint: String,
    pub ios_server_key: Option<String>,
    pub ios_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            broker: BrokerConfig {
                url: env::var("BROKER_URL")
                    .unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_string()),
                queue_prefetch_count: parse_env_or("QUEUE_PREFETCH_COUNT", 10u16),
            },
            status_store: StatusStoreConfig {
                url: env::var("STATUS_STORE_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            template_service: TemplateServiceConfig {
                base_url: env::var("TEMPLATE_SERVICE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            },
            retry: RetryConfig {
                max_retry_attempts: parse_env_or("MAX_RETRY_ATTEMPTS", 3u32),
                retry_base_delay_seconds: parse_env_or("RETRY_BASE_DELAY_SECONDS", 2u64),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_env_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5u32),
                timeout_seconds: parse_env_or("CIRCUIT_BREAKER_TIMEOUT_SECONDS", 60u64),
                recovery_timeout_seconds: parse_env_or(
                    "CIRCUIT_BREAKER_RECOVERY_TIMEOUT_SECONDS",
                    30u64,
                ),
            },
            email: EmailConfig {
                mode: match env::var("EMAIL_PROVIDER_MODE").as_deref() {
                    Ok("smtp") => EmailProviderMode::Smtp,
                    _ => EmailProviderMode::Api,
                },
                api_key: env::var("EMAIL_API_KEY").ok(),
                api_url: env::var("EMAIL_API_URL").ok(),
                from_address: env::var("EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "notifications@example.com".to_string()),
                from_name: env::var("EMAIL_FROM_NAME")
                    .unwrap_or_else(|_| "Notifications".to_string()),
                smtp_host: env::var("SMTP_HOST").ok(),
                smtp_port: env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
                smtp_username: env::var("SMTP_USERNAME").ok(),
                smtp_password: env::var("SMTP_PASSWORD").ok(),
            },
            push: PushConfig {
                android_server_key: env::var("PUSH_ANDROID_SERVER_KEY").ok(),
                android_endpoint: env::var("PUSH_ANDROID_ENDPOINT")
                    .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string()),
                ios_server_key: env::var("PUSH_IOS_SERVER_KEY").ok(),
                ios_endpoint: env::var("PUSH_IOS_ENDPOINT")
                    .unwrap_or_else(|_| "https://api.push.apple.com/3/device".to_string()),
            },
            admin: AdminConfig {
                host: env::var("ADMIN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("ADMIN_PORT", 8080u16),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            broker: BrokerConfig {
                url: "amqp://127.0.0.1:5672/%2f".to_string(),
                queue_prefetch_count: 10,
            },
            status_store: StatusStoreConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            template_service: TemplateServiceConfig {
                base_url: "http://127.0.0.1:9000".to_string(),
            },
            retry: RetryConfig {
                max_retry_attempts: 3,
                retry_base_delay_seconds: 2,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
                recovery_timeout_seconds: 30,
            },
            email: EmailConfig {
                mode: EmailProviderMode::Api,
                api_key: None,
                api_url: None,
                from_address: "notifications@example.com".to_string(),
                from_name: "Notifications".to_string(),
                smtp_host: None,
                smtp_port: None,
                smtp_username: None,
                smtp_password: None,
            },
            push: PushConfig {
                android_server_key: None,
                android_endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
                ios_server_key: None,
                ios_endpoint: "https://api.push.apple.com/3/device".to_string(),
            },
            admin: AdminConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
        }
    }
}
