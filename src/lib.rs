//! Catalog Operator - Kubernetes operator for Open Service Broker provisioning
//!
//! The operator watches `ServiceInstance` resources and drives their external
//! counterparts to the declared state by calling out to an Open Service Broker
//! over HTTP. Brokers may answer synchronously or accept an operation for
//! asynchronous completion; accepted operations are polled to a terminal state
//! on a dedicated queue so slow brokers never stall reconciliation.
//!
//! # Architecture
//!
//! - Watch events are reduced to namespace/name keys on a deduplicating work
//!   queue; handlers always re-read the authoritative object at dequeue time.
//! - A spec checksum short-circuits redundant passes when nothing relevant
//!   changed.
//! - A finalizer keeps an instance in the store until the broker confirms the
//!   external resource is gone.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (ServiceInstance, ServiceClass, ServiceBroker)
//! - [`controller`] - Reconciliation engine and async-operation poller
//! - [`broker`] - Open Service Broker client types and HTTP implementation
//! - [`checksum`] - Spec change detection
//! - [`queue`] - Deduplicating work queues with per-key backoff
//! - [`store`] - Control-plane store access
//! - [`recorder`] - Event recording
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod broker;
pub mod checksum;
pub mod controller;
pub mod crd;
pub mod error;
pub mod queue;
pub mod recorder;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these ensures consistency across CLI defaults and test fixtures.

/// Default number of worker tasks per work queue
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default request timeout for broker HTTP calls, in seconds
///
/// Brokers that cannot finish within this window are expected to return
/// 202 Accepted and complete the operation asynchronously.
pub const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 60;
