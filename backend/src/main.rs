use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taskflow_backend::{
    app,
    config::Config,
    database,
    jobs::{JobConfig, JobScheduler},
    services::{EmailSender, EmailService, LoggingMailer},
    store::PgStore,
    workflows::{Stores, WorkflowEngine},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let mailer: Arc<dyn EmailSender> = if config.smtp.is_configured() {
        Arc::new(EmailService::new(&config.smtp)?)
    } else {
        tracing::warn!("SMTP is not configured, workflow emails will only be logged");
        Arc::new(LoggingMailer)
    };

    let store = Arc::new(PgStore::new(db_pool.clone()));
    let engine = Arc::new(WorkflowEngine::new(
        Stores::from_shared(store),
        mailer,
        config.engine.clone(),
    ));

    let mut scheduler = JobScheduler::new(engine.clone(), JobConfig::from_env()).await?;
    scheduler.start().await?;

    let state = Arc::new(AppState::new(engine).with_pool(db_pool));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.shutdown().await?;

    Ok(())
}
