use ce_seminars::{
    config::{database, program},
    context::SeminarContext,
    core::{catalog, maintenance, report, waitlist},
    errors::Result,
    events::SeminarEvent,
};
use dotenvy::dotenv;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (non-fatal, env vars can be set externally)
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load program rules
    let config = program::load_default_config()
        .inspect_err(|e| error!("Critical error loading configuration: {}", e))?;
    info!("Program settings: {:?}", config.program);

    // 4. Initialize database
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    let ctx = SeminarContext::new(db, config.program);

    // 5. Log where every open seminar stands
    for seminar in catalog::list_seminars(&ctx.database).await? {
        if seminar.status.is_open() {
            let summary = report::seminar_summary(&ctx.database, seminar.id).await?;
            info!("{}", report::format_seminar_summary(&summary));
        }
    }

    // 6. React to events: log them and offer freed seats to the waitlist
    let listener = tokio::spawn(listen_for_events(ctx.clone()));

    // 7. Run maintenance until Ctrl-C
    let period = Duration::from_secs(ctx.settings.maintenance_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match maintenance::run_maintenance(&ctx).await {
                    Ok(summary) => info!("{}", maintenance::format_maintenance_summary(&summary)),
                    Err(e) => error!("Maintenance run failed: {}", e),
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down.");
                break;
            }
        }
    }

    listener.abort();
    Ok(())
}

async fn listen_for_events(ctx: SeminarContext) {
    let mut events = ctx.events.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => {
                info!(event = event.name(), "{:?}", event);
                if let SeminarEvent::RegistrationCancelled { seminar_id, .. } = event {
                    match waitlist::on_capacity_freed(&ctx, seminar_id).await {
                        Ok(Some(entry)) => {
                            info!("Offered freed seat in seminar {} to {}", seminar_id, entry.email);
                        }
                        Ok(None) => {}
                        Err(e) => error!("Waitlist promotion failed for seminar {}: {}", seminar_id, e),
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Event listener skipped {} event(s)", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
