mod config;
mod logging;

use std::sync::Arc;

use config::SmokeConfig;
use feed_client::{
    HttpNotificationApi, NotificationApi, NotificationFeed, WebSocketTransport, spawn_connection,
};
use feed_core::FeedEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };
    let api = match HttpNotificationApi::new(&config.feed) {
        Ok(api) => api,
        Err(err) => {
            error!(error = %err, "failed to build API client");
            std::process::exit(1);
        }
    };
    info!(
        api = %config.feed.api_base_url,
        live = %config.feed.live_url,
        page_size = config.feed.page_size,
        "starting notification feed smoke run"
    );

    let connection = spawn_connection(&config.feed, WebSocketTransport);
    let mut events = connection.subscribe();
    let feed = Arc::new(
        NotificationFeed::new(api, config.feed.page_size).with_connection(connection.clone()),
    );
    let ingest = feed.spawn_push_ingest(connection.subscribe());

    if let Some(count) = config.seed_count {
        match feed.generate_mock_data(count).await {
            Ok(outcome) => info!(count, ?outcome, "seeded demo notifications"),
            Err(err) => warn!(count, error = %err, "seeding demo notifications failed"),
        }
    } else {
        let outcome = feed.load_first_page().await;
        info!(?outcome, "first page loaded");
    }
    match feed.api().stats().await {
        Ok(stats) => info!(
            total = stats.total,
            read = stats.read,
            unread = stats.unread,
            "initial stats"
        ),
        Err(err) => warn!(error = %err, "initial stats request failed"),
    }

    let snapshot = feed.snapshot().await;
    let state = feed.display_state().await;
    info!(
        listed = snapshot.notifications.len(),
        page = snapshot.page,
        total_pages = snapshot.total_pages,
        has_more = snapshot.has_more,
        ?state,
        "feed ready, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(FeedEvent::PhaseChanged { phase }) => info!(?phase, "live channel"),
                Ok(FeedEvent::StatsUpdated(stats)) => {
                    info!(total = stats.total, read = stats.read, unread = stats.unread, "stats");
                }
                Ok(FeedEvent::NotificationPushed(notification)) => {
                    info!(id = %notification.id, title = %notification.title, "pushed");
                }
                Ok(FeedEvent::ReconnectScheduled { attempt, delay_ms }) => {
                    info!(attempt, delay_ms, "reconnect scheduled");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    connection.shutdown().await;
    ingest.abort();
    info!(
        listed = feed.snapshot().await.notifications.len(),
        "notification feed smoke run stopped"
    );
}
