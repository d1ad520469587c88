use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use chat_relay::client::BridgeConnector;
use chat_relay::config::Settings;
use chat_relay::database::{DbPool, Repository};
use chat_relay::handlers::build_router;
use chat_relay::services::{ContextStore, LlmService, MessageIngestor, ReplyDispatcher};
use chat_relay::state::AppState;
use chat_relay::utils::init_logger;
use chat_relay::worker::{BackoffPolicy, DashboardLauncher, ResilientLoop};

#[tokio::main]
async fn main() -> Result<()> {
    init_logger()?;

    info!("🚀 Starting chat relay...");

    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    let repository = Arc::new(Repository::new(db_pool));
    repository.init_schema().await?;
    info!("✅ Database ready");

    // History dashboard runs on its own task, independent of the relay loop
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(AppState {
        repository: repository.clone(),
    });
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Dashboard server stopped: {}", e);
        }
    });
    info!("🎯 Dashboard listening on {}", addr);

    let store = Arc::new(ContextStore::new(settings.context.window_size));
    let llm = Arc::new(LlmService::new(settings.llm.clone())?);
    let dispatcher = ReplyDispatcher::new(
        store,
        llm,
        settings.prompts.clone(),
        settings.context.prompt_turns,
    );

    let mut relay = ResilientLoop::new(
        Arc::new(BridgeConnector::new(settings.chat.clone())),
        MessageIngestor::new(settings.chat.sentinel.clone()),
        dispatcher,
        repository.clone(),
        BackoffPolicy::from_config(&settings.supervisor),
        settings.chat.listen_list.clone(),
        settings.supervisor.poll_interval(),
    );

    if settings.dashboard.auto_open {
        relay = relay.with_dashboard(DashboardLauncher::new(
            settings.server.dashboard_url(),
            Duration::from_secs(settings.dashboard.open_delay_seconds),
        ));
    }

    relay
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    repository.pool.close().await;
    info!("Chat relay terminated");
    Ok(())
}
