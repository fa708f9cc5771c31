use actix::prelude::*;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod domain;
mod error;
mod event_sourcing;
mod messaging;
mod metrics;
mod utils;

use actors::{GetDeadLetterStats, UndeliverableActor};
use domain::site::{site_command, site_commands, Site, SiteDashboard};
use event_sourcing::core::{payload_from, Event, Payload, SeedContext, StateView};
use event_sourcing::store::{
    DeadLetterSink, EventStore, MemoryDeadLetterSink, MemoryEventStore, MemoryStateStore,
    ScyllaDeadLetterSink, ScyllaEventStore, ScyllaStateStore, StateStore,
};
use event_sourcing::{
    CurrentStateMaterializer, ProjectionEngine, Rehydrator, UndeliverableHandler,
};
use messaging::{EventConsumer, EventPublisher, KafkaEventPublisher, NullPublisher};

struct Backends {
    events: Arc<dyn EventStore>,
    state: Arc<dyn StateStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

/// Durable ScyllaDB backends when SCYLLA_NODE is set, in-memory otherwise.
async fn connect_backends() -> anyhow::Result<Backends> {
    let Ok(node) = std::env::var("SCYLLA_NODE") else {
        tracing::info!("SCYLLA_NODE not set, using in-memory backends");
        return Ok(Backends {
            events: Arc::new(MemoryEventStore::new()),
            state: Arc::new(MemoryStateStore::new()),
            dead_letters: Arc::new(MemoryDeadLetterSink::new()),
        });
    };

    tracing::info!(node = %node, "Connecting to ScyllaDB...");
    let session: Session = SessionBuilder::new().known_node(&node).build().await?;

    session
        .query_unpaged(
            "CREATE KEYSPACE IF NOT EXISTS statefold_ks WITH REPLICATION = \
             {'class': 'SimpleStrategy', 'replication_factor': 1}",
            &[],
        )
        .await?;
    session.use_keyspace("statefold_ks", false).await?;

    let session = Arc::new(session);

    let events = ScyllaEventStore::new(session.clone());
    events.prepare().await?;
    let state = ScyllaStateStore::new(session.clone());
    state.prepare().await?;
    let dead_letters = ScyllaDeadLetterSink::new(session);
    dead_letters.prepare().await?;

    Ok(Backends {
        events: Arc::new(events),
        state: Arc::new(state),
        dead_letters: Arc::new(dead_letters),
    })
}

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging with environment-based filtering; override with
    // RUST_LOG, e.g. RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,statefold=debug")),
        )
        .init();

    tracing::info!("🚀 Starting statefold - event-sourced state runtime");

    // === 1. Storage backends ===
    let backends = connect_backends().await?;

    // === 2. Prometheus metrics + scrape endpoint ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090);
    let metrics_registry = Arc::new(metrics.registry().clone());
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Metrics runtime error: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 3. Publisher (broker-backed when KAFKA_BROKERS is set) ===
    let publisher: Arc<dyn EventPublisher> = match std::env::var("KAFKA_BROKERS") {
        Ok(brokers) => {
            tracing::info!(brokers = %brokers, "Publishing events to the broker");
            Arc::new(KafkaEventPublisher::new(&brokers)?.with_metrics(metrics.clone()))
        }
        Err(_) => {
            tracing::info!("KAFKA_BROKERS not set, events stay store-only");
            Arc::new(NullPublisher)
        }
    };

    // === 4. Dead-letter channel ===
    let handler = Arc::new(
        UndeliverableHandler::new(backends.dead_letters.clone()).with_metrics(metrics.clone()),
    );
    let dlq_actor =
        UndeliverableActor::new(handler.clone(), backends.dead_letters.clone()).start();

    // === 5. Consumer: materializer + dashboard projection ===
    let tenant_id = uuid::Uuid::new_v4();
    let site_materializer = Arc::new(CurrentStateMaterializer::<Site>::new(
        backends.events.clone(),
        backends.state.clone(),
    ));
    let seed_ctx = SeedContext::new(backends.events.clone(), backends.state.clone(), tenant_id);
    let dashboard = Arc::new(ProjectionEngine::<SiteDashboard>::new(
        backends.state.clone(),
        seed_ctx,
    ));

    // Applier order matters for the demo: the Site row must exist before
    // the dashboard seed reads it.
    let consumer = Arc::new(
        EventConsumer::new(handler)
            .with_applier(site_materializer.clone())
            .with_applier(dashboard)
            .with_metrics(metrics.clone()),
    );

    // When a broker is configured, also drain its topics in the background.
    let cancel = CancellationToken::new();
    if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        let commands: Vec<String> = site_commands().names().map(String::from).collect();
        tokio::spawn(async move {
            let topics: Vec<&str> = commands.iter().map(String::as_str).collect();
            if let Err(e) =
                messaging::run_kafka_consumer(&brokers, "statefold", &topics, consumer, cancel)
                    .await
            {
                tracing::error!(error = %e, "broker consumer stopped");
            }
        });
    }

    // === 6. Site lifecycle: append → publish → consume ===
    tracing::info!("📝 Demonstrating the site lifecycle");
    let site_id = uuid::Uuid::new_v4();

    let lifecycle = vec![
        Event::new(
            site_id,
            tenant_id,
            site_command("Create_Site")?,
            payload_from(&[
                ("name", serde_json::json!("api.example.org")),
                ("region", serde_json::json!("eu-west")),
            ]),
        ),
        Event::new(
            site_id,
            tenant_id,
            site_command("Update_Site")?,
            payload_from(&[("name", serde_json::json!("api.example.com"))]),
        ),
        Event::new(site_id, tenant_id, site_command("Delete_Site")?, Payload::default()),
    ];

    let mut stamps = Vec::new();
    for event in lifecycle {
        let event = backends.events.append(event).await?;
        metrics.record_append(&event.command);
        stamps.push(event.timestamp);

        if let Err(e) = publisher.publish(&event).await {
            // The append already succeeded; delivery catches up later.
            tracing::warn!(event_id = %event.id, error = %e, "publish failed");
        }
        consumer.process(event).await;
    }
    tracing::info!("✅ Lifecycle consumed: created, renamed, deleted");

    // === 7. Point-in-time rehydration ===
    let rehydrator = Rehydrator::new(backends.events.clone());

    let as_created: Site = rehydrator
        .rehydrate(tenant_id, site_id, Some(stamps[0]))
        .await?;
    let as_renamed: Site = rehydrator
        .rehydrate(tenant_id, site_id, Some(stamps[1]))
        .await?;
    let now: Site = rehydrator.rehydrate(tenant_id, site_id, None).await?;
    tracing::info!(
        at_create = %as_created.name,
        at_update = %as_renamed.name,
        deleted_now = now.is_deleted,
        "🕰️ Rehydrated the site at three points in time"
    );

    // === 8. Poison message: dead-lettered, loop continues ===
    consumer.process_raw(b"{definitely not an event").await;

    // === 9. Full rebuild of the Site container ===
    let summary = site_materializer.rebuild(&cancel.child_token()).await?;
    metrics.record_rebuild(Site::aggregate_type(), summary.cancelled, summary.rebuilt);
    tracing::info!(
        rebuilt = summary.rebuilt,
        skipped_deleted = summary.skipped_deleted,
        "♻️ Rebuild complete"
    );

    // === 10. Operator view of the dead letters ===
    let stats = dlq_actor
        .send(GetDeadLetterStats)
        .await?
        .map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(total = stats.total, "💀 Dead letters recorded");

    cancel.cancel();
    tracing::info!("🎉 Demo complete!");
    Ok(())
}
