//! Simple stateless pub-sub plumbing for journey lifecycle notifications.
//!
//! Components publish engine events (journey completed, event quarantined, …) to subscribers registered at
//! composition time. Handlers receive only the event itself and run concurrently; publishing is fire-and-forget so
//! the pipeline is never blocked on a slow consumer.

use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, listener) = mpsc::channel(buffer_size);
        Self { listener, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs until the last producer is dropped, then drains any in-flight handler tasks.
    pub async fn start_handler(mut self) {
        debug!("📬️ Starting event handler");
        // Dropping the internal sender lets the loop end once every subscriber is gone
        drop(self.sender);
        let mut jobs = JoinSet::new();
        loop {
            tokio::select! {
                event = self.listener.recv() => match event {
                    Some(event) => {
                        let handler = Arc::clone(&self.handler);
                        jobs.spawn(async move { (handler)(event).await });
                    },
                    None => break,
                },
                // Reap completed handler tasks as we go so the set stays small
                Some(result) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = result {
                        warn!("📬️ An event handler task panicked: {e}");
                    }
                },
            }
        }
        while let Some(result) = jobs.join_next().await {
            if let Err(e) = result {
                warn!("📬️ An event handler task panicked: {e}");
            }
        }
        debug!("📬️ Event handler has shut down");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to publish event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test]
    async fn all_published_events_are_handled() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicU64::new(0));
        let sum = Arc::clone(&total);
        let handler = Arc::new(move |v: u64| {
            let sum = Arc::clone(&sum);
            Box::pin(async move {
                sum.fetch_add(v, Ordering::SeqCst);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(4, handler);
        let producer = event_handler.subscribe();
        tokio::spawn(async move {
            for v in 1..=10u64 {
                producer.publish_event(v).await;
            }
        });
        event_handler.start_handler().await;
        assert_eq!(total.load(Ordering::SeqCst), 55);
    }
}
