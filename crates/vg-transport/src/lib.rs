// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The transport contract (spec §6) and an in-memory mock implementation
//! used by tests. Real transports (stream broker, named pipes) are out of
//! scope; a production transport implements [`Transport`] outside this
//! workspace.

pub mod mock;

use async_trait::async_trait;
use std::time::Duration;
use vg_error::VgError;
use vg_protocol::OrderedBlocks;

/// Inbound or outbound payload: an insertion-ordered map of block name to
/// the block's JSON form.
pub type BlockBatch = OrderedBlocks<serde_json::Value>;

/// Collaborator the connection runtime drives INPUT/OUTPUT through.
///
/// `get_updates` is called only from the INPUT worker, `send_updates` only
/// from OUTPUT (spec §5) — implementations may assume single-caller access
/// to any internal buffering they do per direction.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Called once after the connection is constructed, before any worker
    /// starts polling it.
    async fn init(&self, connection_name: &str) -> Result<(), VgError>;

    /// How often INPUT should call [`get_updates`](Self::get_updates).
    /// Default per spec §6: 2 seconds.
    fn incoming_update_period(&self) -> Duration {
        Duration::from_secs(2)
    }

    /// How often OUTPUT should drain and call
    /// [`send_updates`](Self::send_updates) absent any monitor period
    /// override. Default per spec §6: 0.1 seconds.
    fn outgoing_update_period(&self) -> Duration {
        Duration::from_millis(100)
    }

    /// Poll for inbound blocks, waiting up to `wait` if none are
    /// immediately available. `None` means nothing arrived.
    async fn get_updates(&self, wait: Duration) -> Result<Option<BlockBatch>, VgError>;

    /// Publish the current outgoing batch. May block until acknowledged.
    async fn send_updates(&self, outgoing: BlockBatch) -> Result<(), VgError>;

    /// Whether `payload` is worth sending at all. Default: non-empty.
    fn has_updates(&self, payload: &BlockBatch) -> bool {
        !payload.is_empty()
    }
}
