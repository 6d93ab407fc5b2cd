//! One pull cycle: decode, persist, classify, then acknowledge or release.
//!
//! Dispositions are decided per message, not per trait row. A message whose
//! payload does not decode, or whose trait rows could not all be written, is
//! released as a whole; rows already written for it stay, and the redelivery
//! rewrites them under the same keys. Every message in a batch ends up in
//! exactly one of the acknowledge or release sets, and each set is sent to the
//! broker in a single call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use nest_sync_event_store::EventStore;
use nest_sync_pubsub::{Broker, ReceivedMessage};
use tracing::{debug, error, info};

use crate::decoder::decode;
use crate::error::{Disposition, DispositionError, Error, FailedDisposition};

/// Tuning for [`BatchProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Messages of one batch processed concurrently
    pub max_concurrent_messages: usize,
    /// Upper bound for each acknowledge / release call
    pub disposition_timeout: Duration,
    /// Redelivery delay requested for released messages
    pub release_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: 1,
            disposition_timeout: Duration::from_secs(10),
            release_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub enum MessageOutcome {
    Succeeded,
    Failed(Error),
}

/// Result of processing a single pulled message.
#[derive(Debug)]
pub struct ProcessedMessage {
    pub ack_id: String,
    pub message_id: String,
    /// `eventId` from the payload, when it decoded
    pub event_id: Option<String>,
    /// Trait rows written for this message (possibly partial on failure)
    pub traits_written: usize,
    pub outcome: MessageOutcome,
}

impl ProcessedMessage {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, MessageOutcome::Succeeded)
    }
}

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Messages sent for acknowledgment, in batch order
    pub succeeded: Vec<ProcessedMessage>,
    /// Messages sent for release, in batch order
    pub failed: Vec<ProcessedMessage>,
    /// Set when the acknowledge and/or release call failed
    pub disposition_error: Option<DispositionError>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn traits_written(&self) -> usize {
        self.succeeded
            .iter()
            .chain(self.failed.iter())
            .map(|m| m.traits_written)
            .sum()
    }

    /// Messages the broker confirmed as acknowledged.
    pub fn acknowledged(&self) -> usize {
        if self.disposition_failed(Disposition::Acknowledge) {
            0
        } else {
            self.succeeded.len()
        }
    }

    /// Messages the broker confirmed as released.
    pub fn released(&self) -> usize {
        if self.disposition_failed(Disposition::Release) {
            0
        } else {
            self.failed.len()
        }
    }

    fn disposition_failed(&self, action: Disposition) -> bool {
        self.disposition_error
            .as_ref()
            .is_some_and(|e| e.failed(action))
    }

    /// Surface a failed disposition round-trip as an error.
    pub fn disposition_result(&self) -> Result<(), &DispositionError> {
        match &self.disposition_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Turns pulled batches into store writes plus broker dispositions.
///
/// The same processor drives the live subscriber and the in-memory broker.
pub struct BatchProcessor<B: ?Sized, S: ?Sized> {
    broker: Arc<B>,
    store: Arc<S>,
    config: ProcessorConfig,
}

impl<B, S> BatchProcessor<B, S>
where
    B: Broker + ?Sized,
    S: EventStore + ?Sized,
{
    pub fn new(broker: Arc<B>, store: Arc<S>, config: ProcessorConfig) -> Self {
        Self {
            broker,
            store,
            config,
        }
    }

    /// Process a whole batch and issue at most one acknowledge and one release call.
    pub async fn process_batch(&self, batch: Vec<ReceivedMessage>) -> BatchReport {
        let mut report = self.classify(&batch).await;
        report.disposition_error = self.dispose(&report).await.err();

        info!(
            "Batch done: {} acknowledged, {} released, {} trait rows written",
            report.succeeded.len(),
            report.failed.len(),
            report.traits_written()
        );
        report
    }

    /// Decode and persist every message, then split them by outcome.
    ///
    /// Messages run with bounded concurrency; results keep batch order.
    pub async fn classify(&self, batch: &[ReceivedMessage]) -> BatchReport {
        let concurrency = self.config.max_concurrent_messages.max(1);
        let processed: Vec<ProcessedMessage> = stream::iter(batch)
            .map(|message| self.process_message(message))
            .buffered(concurrency)
            .collect()
            .await;

        let (succeeded, failed): (Vec<_>, Vec<_>) =
            processed.into_iter().partition(ProcessedMessage::succeeded);
        BatchReport {
            succeeded,
            failed,
            disposition_error: None,
        }
    }

    /// Decode one message and upsert its trait events in order.
    pub async fn process_message(&self, message: &ReceivedMessage) -> ProcessedMessage {
        let mut processed = ProcessedMessage {
            ack_id: message.ack_id.clone(),
            message_id: message.message_id.clone(),
            event_id: None,
            traits_written: 0,
            outcome: MessageOutcome::Succeeded,
        };

        let decoded = match decode(&message.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    delivery_attempt = ?message.delivery_attempt,
                    "Failed to decode message, releasing it: {e}"
                );
                processed.outcome = MessageOutcome::Failed(e.into());
                return processed;
            }
        };
        processed.event_id = Some(decoded.event_id.clone());

        for event in decoded.into_trait_events() {
            if let Err(e) = self.store.upsert(&event).await {
                error!(
                    message_id = %message.message_id,
                    event_id = %event.event_id,
                    trait_name = %event.trait_name,
                    written = processed.traits_written,
                    "Failed to store trait, releasing message: {e}"
                );
                processed.outcome = MessageOutcome::Failed(e.into());
                return processed;
            }
            debug!(
                "Stored trait {} for event {}",
                event.trait_name, event.event_id
            );
            processed.traits_written += 1;
        }

        info!(
            message_id = %message.message_id,
            event_id = processed.event_id.as_deref().unwrap_or_default(),
            traits = processed.traits_written,
            "Processed message"
        );
        processed
    }

    /// Acknowledge the succeeded set and release the failed set.
    ///
    /// Both calls are attempted even when the first one fails; empty sets are skipped.
    pub async fn dispose(&self, report: &BatchReport) -> Result<(), DispositionError> {
        let ack_ids: Vec<String> = report.succeeded.iter().map(|m| m.ack_id.clone()).collect();
        let release_ids: Vec<String> = report.failed.iter().map(|m| m.ack_id.clone()).collect();

        let mut failures = Vec::new();

        if !ack_ids.is_empty() {
            let call = self.broker.acknowledge(&ack_ids);
            if let Some(failure) = self.bounded(Disposition::Acknowledge, &ack_ids, call).await {
                failures.push(failure);
            }
        }

        if !release_ids.is_empty() {
            let call = self.broker.release(&release_ids, self.config.release_delay);
            if let Some(failure) = self.bounded(Disposition::Release, &release_ids, call).await {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispositionError { failures })
        }
    }

    async fn bounded<F>(
        &self,
        action: Disposition,
        ack_ids: &[String],
        call: F,
    ) -> Option<FailedDisposition>
    where
        F: Future<Output = nest_sync_pubsub::Result<()>>,
    {
        let timeout = self.config.disposition_timeout;
        let source = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => {
                debug!("{action} of {} message(s) succeeded", ack_ids.len());
                return None;
            }
            Ok(Err(e)) => e,
            Err(_) => nest_sync_pubsub::Error::Timeout(timeout),
        };

        error!(
            "Failed to {action} {} message(s), they will be redelivered after their ack deadline: {source}",
            ack_ids.len()
        );
        Some(FailedDisposition {
            action,
            ack_ids: ack_ids.to_vec(),
            source,
        })
    }
}
