// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The connection runtime: monitor bookkeeping, worker wiring, and the
//! block dispatch/refresh/publish cycle that drives a live `VarEnv` off a
//! `Transport`. `vg-protocol` knows about blocks as data; this crate is
//! where they meet a running variable graph.

pub mod accounting;
pub mod ambient;
pub mod config;
pub mod connection;
pub mod monitor;

pub use accounting::{RunningTaskRegistry, TaskId};
pub use ambient::{current_connection, scoped};
pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use connection::{Connection, WorkerKind};
pub use monitor::MonitorData;
