use meridian::config::fetch_config;
use meridian::history::HistoryClient;
use meridian::{MeridianError, SyncEngine, ViewEvent};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), MeridianError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    let app_config = fetch_config()?;
    let history = HistoryClient::new(&app_config.history)?;

    let (engine, handle) = SyncEngine::new(&app_config, history);
    let engine_task = tokio::spawn(engine.run());

    for topic in app_config.topics.clone() {
        let mut view = handle.open_view(topic.clone()).await?;
        tokio::spawn(async move {
            while let Some(event) = view.events.recv().await {
                match event {
                    ViewEvent::Snapshot(snapshot) => {
                        let close = snapshot.latest_bar().map(|b| b.close);
                        let last = snapshot.tick.as_ref().map(|t| t.last);
                        info!(
                            topic = %snapshot.topic,
                            mode = ?snapshot.mode,
                            bars = snapshot.bars.len(),
                            logs = snapshot.logs.len(),
                            close = ?close,
                            last = ?last,
                            "Snapshot"
                        );
                    }
                    ViewEvent::Connection(state) => info!(%topic, state = ?state, "Connection"),
                    ViewEvent::FetchFailed { topic, message } => {
                        warn!(%topic, "Fetch failed: {message}");
                    }
                }
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
    handle.shutdown();
    let _ = engine_task.await;

    Ok(())
}
