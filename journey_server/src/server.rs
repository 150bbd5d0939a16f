//! The application composition root.
//!
//! All dependencies are constructed and wired explicitly here: storage, the dedup service, the circuit breaker,
//! the pipeline and its worker, the journey tracker, the webhook receiver, and the background workers. There are
//! no global singletons; the receiver the routes see is exactly what this module built.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use actix_web::{http::KeepAlive, middleware::Logger, web, App, HttpServer};
use journey_engine::{
    breaker::CircuitBreaker,
    dedup::DeduplicationService,
    default_definitions,
    events::{EventHandlers, EventHooks, EventProducers},
    pipeline::{default_processors, EventPipeline, PipelineWorker},
    traits::JourneyManagement,
    JourneyTracker,
    SqliteDatabase,
};
use log::*;

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    receiver::WebhookReceiver,
    routes::{health, WebhookEventRoute},
    workers::{start_dedup_eviction_worker, start_sweep_worker},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    seed_builtin_definitions(&db).await?;

    let producers = start_event_hooks().await;
    let tracker = JourneyTracker::new(db.clone(), producers.clone());
    let pipeline = EventPipeline::new(db.clone(), tracker, producers, default_processors());
    let (pipeline_handle, worker) = PipelineWorker::new(pipeline, config.queue_buffer);
    tokio::spawn(worker.run());

    let dedup = Arc::new(DeduplicationService::new(db.clone(), config.dedup_window));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker_error_threshold, config.breaker_reset_timeout));
    let receiver = WebhookReceiver::new(
        db.clone(),
        Arc::clone(&dedup),
        Arc::clone(&breaker),
        pipeline_handle,
        config.webhook_secret.clone(),
        config.enforce_signatures,
    );

    start_sweep_worker(db.clone(), config.sweep_interval);
    start_dedup_eviction_worker(dedup, config.sweep_interval);

    let options = ServerOptions::from_config(&config);
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("jg::access_log"))
            .app_data(web::Data::new(receiver.clone()))
            .app_data(web::Data::new(options.clone()))
            .service(health)
            .service(WebhookEventRoute::<SqliteDatabase>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

async fn seed_builtin_definitions(db: &SqliteDatabase) -> Result<(), ServerError> {
    for definition in default_definitions() {
        let name = definition.name.clone();
        match db.seed_definition(definition).await {
            Ok(Some(stored)) => info!("🗂️ Seeded journey definition '{}' v{}", stored.name, stored.version),
            Ok(None) => debug!("🗂️ Journey definition '{name}' already published"),
            Err(e) => return Err(ServerError::InitializeError(format!("Could not seed definition '{name}': {e}"))),
        }
    }
    Ok(())
}

/// Registers the engine hooks this deployment cares about and starts their handlers. Quarantines are surfaced
/// loudly; journey completions at debug level for the analytics layer to pick up from the store.
async fn start_event_hooks() -> EventProducers {
    let mut hooks = EventHooks::default();
    hooks.on_event_quarantined(|ev| {
        Box::pin(async move {
            warn!("☣️ Event {} was quarantined: {}", ev.event_id, ev.reason);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_journey_completed(|ev| {
        Box::pin(async move {
            debug!(
                "🏁️ Journey instance #{} for resource {} completed in {} ms",
                ev.instance.id,
                ev.instance.resource_id,
                ev.instance.total_duration_ms.unwrap_or_default()
            );
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(16, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    producers
}
