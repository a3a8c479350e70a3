//! An in-memory [`Transport`] for tests: inbound batches are queued by the
//! test harness via [`MockTransport::push_inbound`], outbound batches are
//! captured for later inspection via [`MockTransport::sent_batches`].

use crate::{BlockBatch, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::time::Duration;
use tokio::sync::Mutex;
use vg_error::{ErrorCode, VgError};

pub struct MockTransport {
    inbound: Mutex<VecDeque<BlockBatch>>,
    outbound: Mutex<Vec<BlockBatch>>,
    incoming_period: Duration,
    outgoing_period: Duration,
    forced_send_failures: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_periods(Duration::from_secs(2), Duration::from_millis(100))
    }

    pub fn with_periods(incoming_period: Duration, outgoing_period: Duration) -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(Vec::new()),
            incoming_period,
            outgoing_period,
            forced_send_failures: AtomicUsize::new(0),
        }
    }

    /// Queues a batch of inbound blocks for the next `get_updates` call.
    pub async fn push_inbound(&self, batch: BlockBatch) {
        self.inbound.lock().await.push_back(batch);
    }

    /// Returns every batch handed to `send_updates` so far, in call order.
    pub async fn sent_batches(&self) -> Vec<BlockBatch> {
        self.outbound.lock().await.clone()
    }

    /// Makes the next `n` calls to `send_updates` fail, to exercise the
    /// runtime's failure-muting behavior (spec §8 scenario 6).
    pub fn fail_next_sends(&self, n: usize) {
        self.forced_send_failures.store(n, SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn init(&self, _connection_name: &str) -> Result<(), VgError> {
        Ok(())
    }

    fn incoming_update_period(&self) -> Duration {
        self.incoming_period
    }

    fn outgoing_update_period(&self) -> Duration {
        self.outgoing_period
    }

    async fn get_updates(&self, wait: Duration) -> Result<Option<BlockBatch>, VgError> {
        if let Some(batch) = self.inbound.lock().await.pop_front() {
            return Ok(Some(batch));
        }
        tokio::time::sleep(wait.min(Duration::from_millis(20))).await;
        Ok(self.inbound.lock().await.pop_front())
    }

    async fn send_updates(&self, outgoing: BlockBatch) -> Result<(), VgError> {
        let mut remaining = self.forced_send_failures.load(SeqCst);
        if remaining > 0 {
            remaining -= 1;
            self.forced_send_failures.store(remaining, SeqCst);
            return Err(VgError::new(ErrorCode::ProgramRaised, "mock transport forced send failure"));
        }
        self.outbound.lock().await.push(outgoing);
        Ok(())
    }
}
