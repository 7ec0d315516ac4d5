//! # Reposcan Core
//!
//! Orchestration library for asynchronous repository security scans.
//!
//! ## Overview
//!
//! A scan moves through three roles that only share the database and two
//! message topics:
//!
//! - **Trigger**: records a scan, publishes a request, and applies results
//!   as they come back ([`orchestration::ScanService`])
//! - **Dispatch**: turns each request into a durable job
//!   ([`orchestration::ScanDispatcher`])
//! - **Execution**: leases jobs, downloads and inspects the repository, and
//!   publishes progress ([`orchestration::ScanJobHandler`] on a
//!   [`queue::WorkerPool`])
//!
//! ## Architecture
//!
//! - [`store`]: repository and scan persistence ports, PostgreSQL and
//!   in-memory backends, migrations
//! - [`channel`]: request/result topics over Redis Streams
//! - [`queue`]: lease-based job queue and worker pool
//! - [`inspect`]: the Fetch & Inspect engine and its detection rules
//! - [`orchestration`]: the services that tie them together
//!
//! Every port has an in-memory implementation so the pipeline can be
//! exercised without external services.
#![allow(missing_docs)]

pub mod channel;
pub mod error;
pub mod inspect;
pub mod orchestration;
pub mod queue;
pub mod store;

pub use error::{Result, ScanError};
