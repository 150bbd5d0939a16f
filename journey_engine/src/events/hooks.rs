use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, EventQuarantinedEvent, Handler, JourneyCompletedEvent, JourneyFailedEvent};

/// The producer ends of every registered hook. Cloned into the pipeline and tracker; publishing to an empty
/// producer list is a no-op.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub journey_completed_producer: Vec<EventProducer<JourneyCompletedEvent>>,
    pub journey_failed_producer: Vec<EventProducer<JourneyFailedEvent>>,
    pub event_quarantined_producer: Vec<EventProducer<EventQuarantinedEvent>>,
}

pub struct EventHandlers {
    pub on_journey_completed: Option<EventHandler<JourneyCompletedEvent>>,
    pub on_journey_failed: Option<EventHandler<JourneyFailedEvent>>,
    pub on_event_quarantined: Option<EventHandler<EventQuarantinedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_journey_completed = hooks.on_journey_completed.map(|f| EventHandler::new(buffer_size, f));
        let on_journey_failed = hooks.on_journey_failed.map(|f| EventHandler::new(buffer_size, f));
        let on_event_quarantined = hooks.on_event_quarantined.map(|f| EventHandler::new(buffer_size, f));
        Self { on_journey_completed, on_journey_failed, on_event_quarantined }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_journey_completed {
            result.journey_completed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_journey_failed {
            result.journey_failed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_event_quarantined {
            result.event_quarantined_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_journey_completed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_journey_failed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_event_quarantined {
            tokio::spawn(handler.start_handler());
        }
    }
}

/// Hook registration, filled in by the application's composition root.
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_journey_completed: Option<Handler<JourneyCompletedEvent>>,
    pub on_journey_failed: Option<Handler<JourneyFailedEvent>>,
    pub on_event_quarantined: Option<Handler<EventQuarantinedEvent>>,
}

impl EventHooks {
    pub fn on_journey_completed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(JourneyCompletedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_journey_completed = Some(Arc::new(f));
        self
    }

    pub fn on_journey_failed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(JourneyFailedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_journey_failed = Some(Arc::new(f));
        self
    }

    pub fn on_event_quarantined<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EventQuarantinedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_event_quarantined = Some(Arc::new(f));
        self
    }
}
