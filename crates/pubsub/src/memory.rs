//! In-memory broker with the same lease semantics as a pull subscription.
//!
//! Used by the test suites and by `nest-sync replay` to drive the exact same
//! processing path as a live subscription without network access.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::broker::{Broker, ReceivedMessage};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: String,
    data: Vec<u8>,
    attributes: HashMap<String, String>,
    publish_time: Option<String>,
    delivery_attempt: u32,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<QueuedMessage>,
    leased: HashMap<String, QueuedMessage>,
    ack_to_message: HashMap<String, String>,
    acknowledged: Vec<String>,
    dead_lettered: Vec<String>,
    acknowledge_calls: Vec<Vec<String>>,
    release_calls: Vec<Vec<String>>,
    pull_calls: usize,
    next_ack: u64,
    next_message: u64,
    fail_next_pull: Option<String>,
    fail_next_acknowledge: Option<String>,
    fail_next_release: Option<String>,
    closed: bool,
}

/// In-memory [`Broker`].
///
/// Every delivery gets a fresh ack id. Released messages go back to the front
/// of the queue with their delivery attempt incremented; the release delay is
/// not simulated. With [`MemoryBroker::without_redelivery`], released messages
/// are parked as dead letters instead, which keeps a finite replay finite.
pub struct MemoryBroker {
    state: Mutex<State>,
    available: Notify,
    redeliver_released: bool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Notify::new(),
            redeliver_released: true,
        }
    }

    /// A broker that never redelivers released messages.
    pub fn without_redelivery() -> Self {
        Self {
            redeliver_released: false,
            ..Self::new()
        }
    }

    /// Enqueue a message and return its message id.
    pub async fn publish(&self, data: impl Into<Vec<u8>>) -> String {
        self.publish_with_attributes(data, HashMap::new()).await
    }

    pub async fn publish_with_attributes(
        &self,
        data: impl Into<Vec<u8>>,
        attributes: HashMap<String, String>,
    ) -> String {
        let mut state = self.state.lock().await;
        state.next_message += 1;
        let message_id = format!("msg-{}", state.next_message);
        state.pending.push_back(QueuedMessage {
            message_id: message_id.clone(),
            data: data.into(),
            attributes,
            publish_time: None,
            delivery_attempt: 0,
        });
        drop(state);

        self.available.notify_one();
        message_id
    }

    /// Make the next `pull` fail with a transport-like error.
    pub async fn fail_next_pull(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_pull = Some(reason.into());
    }

    /// Make the next `acknowledge` fail; the leases stay outstanding.
    pub async fn fail_next_acknowledge(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_acknowledge = Some(reason.into());
    }

    /// Make the next `release` fail; the leases stay outstanding.
    pub async fn fail_next_release(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_release = Some(reason.into());
    }

    /// Message ids acknowledged so far, in acknowledgment order.
    pub async fn acknowledged(&self) -> Vec<String> {
        self.state.lock().await.acknowledged.clone()
    }

    /// Message ids released while redelivery was disabled.
    pub async fn dead_lettered(&self) -> Vec<String> {
        self.state.lock().await.dead_lettered.clone()
    }

    /// Message ids passed to each successful `acknowledge` call.
    pub async fn acknowledge_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().await.acknowledge_calls.clone()
    }

    /// Message ids passed to each successful `release` call.
    pub async fn release_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().await.release_calls.clone()
    }

    pub async fn pull_calls(&self) -> usize {
        self.state.lock().await.pull_calls
    }

    /// Messages waiting to be pulled.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Messages pulled but neither acknowledged nor released.
    pub async fn leased_len(&self) -> usize {
        self.state.lock().await.leased.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    fn lease(state: &mut State, max_messages: usize) -> Vec<ReceivedMessage> {
        let mut received = Vec::new();
        while received.len() < max_messages {
            let Some(mut queued) = state.pending.pop_front() else {
                break;
            };
            queued.delivery_attempt += 1;
            state.next_ack += 1;
            let ack_id = format!("ack-{}", state.next_ack);

            received.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: queued.message_id.clone(),
                data: queued.data.clone(),
                publish_time: queued.publish_time.clone(),
                delivery_attempt: Some(queued.delivery_attempt),
                attributes: queued.attributes.clone(),
            });
            state
                .ack_to_message
                .insert(ack_id.clone(), queued.message_id.clone());
            state.leased.insert(ack_id, queued);
        }
        received
    }

    fn message_ids(state: &State, ack_ids: &[String]) -> Vec<String> {
        ack_ids
            .iter()
            .map(|ack_id| {
                state
                    .ack_to_message
                    .get(ack_id)
                    .cloned()
                    .unwrap_or_else(|| ack_id.clone())
            })
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn pull(&self, max_messages: usize, timeout: Duration) -> Result<Vec<ReceivedMessage>> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(Error::Closed);
            }
            state.pull_calls += 1;
            if let Some(reason) = state.fail_next_pull.take() {
                return Err(Error::Injected(reason));
            }
            if !state.pending.is_empty() {
                return Ok(Self::lease(&mut state, max_messages));
            }
        }

        if tokio::time::timeout(timeout, self.available.notified())
            .await
            .is_err()
        {
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        Ok(Self::lease(&mut state, max_messages))
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(reason) = state.fail_next_acknowledge.take() {
            return Err(Error::Injected(reason));
        }

        let message_ids = Self::message_ids(&state, ack_ids);
        for ack_id in ack_ids {
            state.ack_to_message.remove(ack_id);
            match state.leased.remove(ack_id) {
                Some(queued) => state.acknowledged.push(queued.message_id),
                None => debug!("Ignoring acknowledge for unknown ack id {ack_id}"),
            }
        }
        state.acknowledge_calls.push(message_ids);
        Ok(())
    }

    async fn release(&self, ack_ids: &[String], _delay: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(reason) = state.fail_next_release.take() {
            return Err(Error::Injected(reason));
        }

        let message_ids = Self::message_ids(&state, ack_ids);
        // Reverse so the released messages keep their relative order at the queue front.
        for ack_id in ack_ids.iter().rev() {
            state.ack_to_message.remove(ack_id);
            match state.leased.remove(ack_id) {
                Some(queued) if self.redeliver_released => state.pending.push_front(queued),
                Some(queued) => state.dead_lettered.push(queued.message_id),
                None => debug!("Ignoring release for unknown ack id {ack_id}"),
            }
        }
        state.release_calls.push(message_ids);
        drop(state);

        if self.redeliver_released {
            self.available.notify_one();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.closed = true;
        self.available.notify_waiters();
        Ok(())
    }
}
