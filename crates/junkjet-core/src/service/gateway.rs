use std::sync::Arc;

use tracing::info;

use crate::chatbot::ChatbotService;
use crate::config::Config;
use crate::service::monitor::SessionMonitor;
use crate::session::{self, Clock, SessionStore, SystemClock};

/// Store, dispatcher and monitor wired together from configuration.
pub struct Components {
    pub store: Arc<dyn SessionStore>,
    pub chatbot: Arc<ChatbotService>,
    pub monitor: Arc<SessionMonitor>,
}

/// Connect the configured store, confirm it answers, and build the
/// dispatcher and monitor on top of it. The monitor is not started.
pub async fn build_components(config: &Config) -> anyhow::Result<Components> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = session::connect_store(&config.store, &config.session, clock.clone()).await?;
    store.ping().await?;
    info!("Session store ready ({})", store.backend_name());

    let chatbot = Arc::new(ChatbotService::new(
        store.clone(),
        clock.clone(),
        config.session.clone(),
        config.monitor.expiring_soon_window(),
    ));
    let monitor = Arc::new(SessionMonitor::from_config(
        store.clone(),
        clock,
        &config.monitor,
    ));

    Ok(Components {
        store,
        chatbot,
        monitor,
    })
}

/// Start the full junkjet server: store, monitor and HTTP API.
#[cfg(feature = "http-api")]
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    use crate::service::auth::AuthState;
    use crate::service::http::{self, AppState};

    config.validate()?;
    let components = build_components(&config).await?;

    if config.monitor.enabled {
        components.monitor.start();
    } else {
        tracing::warn!("Session monitor disabled by configuration");
    }

    let state = Arc::new(AppState::new(
        components.chatbot.clone(),
        AuthState::from_config(&config.auth),
    ));

    info!("junkjet server starting");
    let result = http::serve(&config.server.addr(), state, shutdown_signal()).await;

    components.monitor.stop().await;
    info!("junkjet server stopped");
    result
}

#[cfg(feature = "http-api")]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_components_memory() {
        let config = Config::default();
        let components = build_components(&config).await.unwrap();
        assert_eq!(components.store.backend_name(), "memory");
        assert!(!components.monitor.is_running());

        let reply = components
            .chatbot
            .send_message("alice", None, "Hello")
            .await
            .unwrap();
        assert_eq!(reply.session_info.message_count, 2);
    }
}
