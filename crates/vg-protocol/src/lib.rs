// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Block JSON schema, subscriber routing, and outgoing batch ordering for
//! the variable-graph runtime. Monitor state and the `data_blocks` dedup
//! cache live in `vg-runtime`, since they need a live `VarEnv`; this crate
//! only knows about blocks as data.

pub mod block;
pub mod evaluator;
pub mod ordered;
pub mod router;

pub use block::{Block, BlockType, DeleteSelector, COMMON_KEYS, MONITOR_RESERVED_KEYS};
pub use evaluator::Evaluator;
pub use ordered::OrderedBlocks;
pub use router::{is_routed_to, order_batch, Subscriber};
