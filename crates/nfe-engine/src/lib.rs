//! # nfe-engine — Transmission and Distribution
//!
//! The two stateful workflows of the stack, built on the leaf crates:
//!
//! - [`transmission`]: access key, build, sign, submit, classify. Outcomes
//!   are [`TransmissionResult`] values.
//! - [`distribution`]: incremental pull of documents addressed to a tenant,
//!   reconciled idempotently into storage.
//! - [`status`]: the `cStat` taxonomy both workflows classify against.
//! - [`store`]: the record and tenant collaborators, with in-memory and
//!   filesystem implementations.
//! - [`jobs`]: follow-up job descriptions for the host's scheduler.
//!
//! ## Concurrency
//!
//! Every entry point is an async request/response round trip. Tenants are
//! independent; the only shared mutable state is the credential cache and
//! the collaborators, which handle their own synchronization. Cancelling a
//! call is dropping its future.

pub mod distribution;
pub mod error;
pub mod jobs;
pub mod status;
pub mod store;
pub mod transmission;

pub use distribution::{DistributionSync, SyncOutcome};
pub use error::{SyncError, TransmissionError};
pub use jobs::{FollowUp, Job, JobScheduler, RetryPolicy};
pub use status::{classify, StatusClass};
pub use store::{InvoiceRecord, InvoiceStatus, RecordStore, TenantDirectory, TenantProfile};
pub use transmission::{Orchestrator, ServiceStatus, TransmissionResult, TransportCause};
