// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The single-writer actor/mailbox primitive every connection worker
//! (COMMAND, REFRESH, INPUT, OUTPUT, ACCOUNTING) is built from.

pub mod failure_muter;
pub mod worker;

pub use failure_muter::{FailureLogAction, FailureMuter};
pub use worker::{Worker, WorkerHandle, WorkerId};
