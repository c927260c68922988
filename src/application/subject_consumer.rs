//! Subject consumer loop and subject publisher.
//!
//! The consumer feeds subject-ready events from the bus to the controller and
//! acknowledges each one only once it has been handled or judged unprocessable.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::BusError;
use crate::domain::models::{BusConfig, SubjectReadyEvent};
use crate::domain::ports::MessageBus;
use crate::services::Controller;

/// What happened to the message `process_one` looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Nothing was waiting.
    Idle,
    /// Handled and committed.
    Processed { dispatched: usize },
    /// Malformed; logged and committed without processing.
    Dropped,
    /// Processing failed. Retryable failures stay uncommitted for redelivery.
    Failed { retryable: bool },
}

pub struct SubjectConsumer {
    controller: Arc<Controller>,
    bus: Arc<dyn MessageBus>,
    topic: String,
    poll_interval: Duration,
}

impl SubjectConsumer {
    pub fn new(controller: Arc<Controller>, bus: Arc<dyn MessageBus>, config: &BusConfig) -> Self {
        Self {
            controller,
            bus,
            topic: config.subject_ready_topic.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    pub async fn subscribe(&self) -> Result<(), BusError> {
        self.bus.subscribe(std::slice::from_ref(&self.topic)).await
    }

    /// Take at most one message off the bus and handle it.
    #[instrument(skip(self))]
    pub async fn process_one(&self) -> Result<ConsumeOutcome, BusError> {
        let Some(message) = self.bus.consume_one().await? else {
            return Ok(ConsumeOutcome::Idle);
        };

        let event = match SubjectReadyEvent::parse(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(message_id = %message.message_id(), error = %e, "dropping malformed subject event");
                self.bus.commit(&message).await?;
                return Ok(ConsumeOutcome::Dropped);
            }
        };

        match self.controller.on_subject_ready(&event.subject).await {
            Ok(dispatched) => {
                self.bus.commit(&message).await?;
                debug!(subject = %event.subject, dispatched = dispatched.len(), "subject processed");
                Ok(ConsumeOutcome::Processed {
                    dispatched: dispatched.len(),
                })
            }
            Err(e) if e.is_retryable() => {
                warn!(subject = %event.subject, error = %e, "subject processing failed, will redeliver");
                Ok(ConsumeOutcome::Failed { retryable: true })
            }
            Err(e) => {
                error!(subject = %event.subject, error = %e, "subject processing failed");
                self.bus.commit(&message).await?;
                Ok(ConsumeOutcome::Failed { retryable: false })
            }
        }
    }

    /// Consume until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        self.subscribe().await?;
        info!(topic = %self.topic, "subject consumer started");

        let mut retry = ExponentialBackoff {
            initial_interval: self.poll_interval,
            max_interval: Duration::from_secs(30),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        while !*shutdown.borrow() {
            let wait = match self.process_one().await {
                Ok(ConsumeOutcome::Idle) => Some(self.poll_interval),
                Ok(ConsumeOutcome::Failed { retryable: true }) => retry.next_backoff(),
                Ok(_) => {
                    retry.reset();
                    None
                }
                Err(BusError::Closed) => break,
                Err(e) => {
                    error!(error = %e, "bus error");
                    retry.next_backoff()
                }
            };

            if let Some(wait) = wait {
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("subject consumer stopped");
        Ok(())
    }
}

/// Announces subjects on the subject-ready topic.
pub struct SubjectPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    source: String,
}

impl SubjectPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            source: source.into(),
        }
    }

    /// Publish a `new.subject` event for `subject`, returning it with its bus offset.
    pub async fn announce(&self, subject: &str) -> Result<(SubjectReadyEvent, i64), BusError> {
        let event = SubjectReadyEvent::new(subject, &self.source);
        let payload = serde_json::to_vec(&event)?;
        let offset = self.bus.publish(&self.topic, Some(subject), &payload).await?;
        info!(subject, offset, "subject announced");
        Ok((event, offset))
    }
}
