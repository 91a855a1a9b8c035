//! Controller implementations for catalog CRDs
//!
//! This module contains the reconciliation logic for ServiceInstance
//! resources: the reconciliation engine proper, the async-operation poller
//! that drives accepted broker operations to a terminal state, and the worker
//! loops that pump both work queues.

mod instance;
mod worker;

pub use instance::{
    instance_key, poll_instance_key, reconcile_instance, reconcile_instance_key, split_key,
    Context, ContextBuilder, ASYNC_DEPROVISIONING_REASON, ASYNC_PROVISIONING_REASON,
    ERROR_DEPROVISION_REASON, ERROR_POLL_STATE_REASON, ERROR_PROVISION_REASON,
    ERROR_REFERENCES_REASON, ERROR_WITH_PARAMETERS_REASON, READY_CONDITION,
    SUCCESS_DEPROVISION_REASON, SUCCESS_PROVISION_REASON,
};
pub use worker::{spawn_workers, watch_instances};
