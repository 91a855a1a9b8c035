//! Worker loops and the instance watch adapter
//!
//! Watch events collapse into keys on the instance work queue; a pool of
//! workers drains both queues, forgetting keys on success and requeueing them
//! with backoff on failure. For the polling queue that failure-driven backoff
//! is also what paces in-flight operation polls.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::instance::{instance_key, poll_instance_key, reconcile_instance_key, Context};
use crate::crd::ServiceInstance;

/// Spawn `count` reconciliation workers and `count` polling workers.
pub fn spawn_workers(ctx: Arc<Context>, count: usize) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(count * 2);
    for _ in 0..count {
        let reconcile_ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            reconcile_worker(reconcile_ctx).await;
        }));
        let poll_ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            poll_worker(poll_ctx).await;
        }));
    }
    handles
}

async fn reconcile_worker(ctx: Arc<Context>) {
    loop {
        let key = ctx.instance_queue.next().await;
        match reconcile_instance_key(&ctx, &key).await {
            Ok(()) => ctx.instance_queue.forget(&key),
            Err(err) => {
                warn!(%key, error = %err, "reconciliation failed, requeueing with backoff");
                ctx.instance_queue.add_rate_limited(&key);
            }
        }
    }
}

async fn poll_worker(ctx: Arc<Context>) {
    loop {
        let key = ctx.polling_queue.next().await;
        match poll_instance_key(&ctx, &key).await {
            Ok(()) => ctx.polling_queue.forget(&key),
            Err(err) => {
                if err.is_operation_in_progress() {
                    debug!(%key, "operation still in progress, scheduling next poll");
                } else {
                    warn!(%key, error = %err, "poll failed, requeueing with backoff");
                }
                ctx.polling_queue.add_rate_limited(&key);
            }
        }
    }
}

/// Watch ServiceInstances across all namespaces and feed the instance queue.
///
/// Deletions need no queue entry: the finalizer guarantees a final
/// reconciliation happens through an update event before the resource is
/// actually removed.
pub async fn watch_instances(ctx: Arc<Context>, client: Client) {
    let api: Api<ServiceInstance> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default()).boxed();
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(instance)) | Ok(watcher::Event::InitApply(instance)) => {
                enqueue(&ctx, &instance);
            }
            Ok(watcher::Event::Delete(instance)) => {
                debug!(name = %instance.name_any(), "instance removed from the cluster");
            }
            Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
            Err(err) => {
                error!(error = %err, "instance watch failed, restarting");
            }
        }
    }
}

fn enqueue(ctx: &Context, instance: &ServiceInstance) {
    let Some(namespace) = instance.namespace() else {
        return;
    };
    let key = instance_key(&namespace, &instance.name_any());
    debug!(%key, "enqueueing instance");
    ctx.instance_queue.add(&key);
}

#[cfg(test)]
mod tests {
    use super::*;

    use kube::api::ObjectMeta;

    use crate::broker::MockBrokerClientFactory;
    use crate::crd::ServiceInstanceSpec;
    use crate::recorder::MockEventRecorder;
    use crate::store::MockStoreClient;

    fn test_ctx() -> Context {
        let mut recorder = MockEventRecorder::new();
        recorder.expect_event().return_const(());
        Context::for_testing(
            Arc::new(MockStoreClient::new()),
            Arc::new(MockBrokerClientFactory::new()),
            Arc::new(recorder),
        )
    }

    fn instance(namespace: &str, name: &str) -> ServiceInstance {
        ServiceInstance {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: ServiceInstanceSpec {
                class_name: "postgres".to_string(),
                plan_name: "small".to_string(),
                external_id: "inst-ext-1".to_string(),
                parameters: None,
            },
            status: None,
        }
    }

    /// Watch events for the same instance collapse into one queue entry.
    #[tokio::test]
    async fn story_repeated_events_collapse_on_the_queue() {
        let ctx = test_ctx();
        let resource = instance("default", "my-db");
        enqueue(&ctx, &resource);
        enqueue(&ctx, &resource);
        enqueue(&ctx, &instance("default", "other-db"));
        assert_eq!(ctx.instance_queue.len(), 2);
    }
}
