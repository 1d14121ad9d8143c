use std::sync::Arc;

use delivery::admin::{self, AdminState};
use delivery::config::Config;
use delivery::delivery_engine::DeliveryEngine;
use delivery::domain::Channel;
use delivery::providers::push::PushSender;
use delivery::queue::Consumer;
use delivery::status_store::StatusStore;
use delivery::template::TemplateClient;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "push_worker=info,delivery=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting push delivery worker");

    let status_store = Arc::new(StatusStore::new(config.status_store.url.clone()));
    let template_client = Arc::new(TemplateClient::new(config.template_service.base_url.clone()));
    let provider = Arc::new(PushSender::from_config(&config.push));

    let engine = Arc::new(DeliveryEngine::new(
        template_client,
        provider,
        config.retry.clone(),
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.timeout_seconds,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    let consumer = Consumer::new(
        config.broker.url.clone(),
        Channel::Push,
        config.broker.queue_prefetch_count,
        status_store.clone(),
        engine.clone(),
        config.retry.max_retry_attempts,
    );

    let consumer_handle = tokio::spawn({
        let shutdown_rx = shutdown_tx.subscribe();
        async move { consumer.run(shutdown_rx).await }
    });

    let admin_state = AdminState {
        status_store,
        engine,
        service: "push",
    };
    let admin_router = admin::router(admin_state);
    let addr = format!("{}:{}", config.admin.host, config.admin.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "admin http surface listening");

    tokio::select! {
        res = axum::serve(listener, admin_router.into_make_service()) => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    consumer_handle.await??;
    Ok(())
}
