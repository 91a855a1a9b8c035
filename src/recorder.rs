//! Event recording
//!
//! Every condition change is mirrored as a human-readable event so operators
//! see outcomes without reading controller logs. Recording is fire-and-forget:
//! a failed event write never fails a reconciliation pass.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::ServiceInstance;

/// Component name reported on emitted events
const REPORTER: &str = "catalog-controller";

/// Severity of a recorded event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    /// Informational outcome
    Normal,
    /// Something went wrong and will surface to the user
    Warning,
}

/// Trait abstracting event recording for instances
#[cfg_attr(test, automock)]
pub trait EventRecorder: Send + Sync {
    /// Record an event against the given instance
    fn event(&self, instance: &ServiceInstance, severity: EventSeverity, reason: &str, message: &str);
}

/// Event recorder backed by the Kubernetes Events API
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// Create a recorder publishing through the given client
    pub fn new(client: Client) -> Self {
        let reporter: Reporter = REPORTER.into();
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn event(
        &self,
        instance: &ServiceInstance,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) {
        let event = Event {
            type_: match severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        let reference = instance.object_ref(&());
        let recorder = self.recorder.clone();
        // fire-and-forget; a lost event is not worth failing the pass over
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(&event, &reference).await {
                warn!(error = %e, "failed to publish event");
            }
        });
    }
}

/// Recorder that only logs, for local runs and tests
#[derive(Default)]
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn event(
        &self,
        instance: &ServiceInstance,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) {
        let name = instance.meta().name.as_deref().unwrap_or("<unnamed>");
        match severity {
            EventSeverity::Normal => info!(instance = name, reason, message, "event"),
            EventSeverity::Warning => warn!(instance = name, reason, message, "event"),
        }
    }
}
