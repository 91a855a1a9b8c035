//! ServiceInstance reconciliation
//!
//! The reconciliation engine turns the declared state of a ServiceInstance
//! into calls against its Open Service Broker and records the outcome on the
//! instance's `Ready` condition. Synchronous broker responses complete in a
//! single pass; `202 Accepted` responses flip the instance into its
//! async-operation state and hand the key to the polling queue, whose retry
//! backoff doubles as the polling cadence.

use std::sync::Arc;

use kube::{Client, ResourceExt};
use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};

use crate::broker::{
    BrokerClient, BrokerClientFactory, CreateInstanceRequest, DeleteInstanceRequest,
    HttpBrokerClientFactory, LastOperationRequest, OperationState, OsbContext,
};
use crate::checksum::instance_spec_checksum;
use crate::crd::{
    Condition, ConditionStatus, ServiceClass, ServiceInstance, ServicePlan, FINALIZER_TOKEN,
};
use crate::queue::WorkQueue;
use crate::recorder::{EventRecorder, EventSeverity, KubeEventRecorder};
use crate::store::{KubeStore, StoreClient};
use crate::{Error, Result, DEFAULT_BROKER_TIMEOUT_SECS};

/// The condition type the controller manages on every ServiceInstance.
pub const READY_CONDITION: &str = "Ready";

/// Reason recorded when a provision completed successfully.
pub const SUCCESS_PROVISION_REASON: &str = "ProvisionedSuccessfully";
/// Reason recorded while an asynchronous provision is in flight.
pub const ASYNC_PROVISIONING_REASON: &str = "Provisioning";
/// Reason recorded when a provision call or operation failed.
pub const ERROR_PROVISION_REASON: &str = "ErrorProvisionCallFailed";
/// Reason recorded when a deprovision completed successfully.
pub const SUCCESS_DEPROVISION_REASON: &str = "DeprovisionedSuccessfully";
/// Reason recorded while an asynchronous deprovision is in flight.
pub const ASYNC_DEPROVISIONING_REASON: &str = "Deprovisioning";
/// Reason recorded when a deprovision call or operation failed.
pub const ERROR_DEPROVISION_REASON: &str = "ErrorDeprovisionCallFailed";
/// Reason recorded when the class, plan, or broker reference cannot resolve.
pub const ERROR_REFERENCES_REASON: &str = "ErrorResolvingReferences";
/// Reason recorded when spec parameters are not a JSON object.
pub const ERROR_WITH_PARAMETERS_REASON: &str = "ErrorWithParameters";
/// Reason recorded when the broker returns an unrecognized operation state.
pub const ERROR_POLL_STATE_REASON: &str = "ErrorPollingLastOperation";

const SUCCESS_PROVISION_MESSAGE: &str = "The instance was provisioned successfully";
const ASYNC_PROVISIONING_MESSAGE: &str = "The instance is being provisioned asynchronously";
const SUCCESS_DEPROVISION_MESSAGE: &str = "The instance was deprovisioned successfully";
const ASYNC_DEPROVISIONING_MESSAGE: &str = "The instance is being deprovisioned asynchronously";

/// Shared state handed to every reconciliation and poll invocation.
///
/// All collaborators sit behind traits so tests can substitute mocks for the
/// Kubernetes API and the broker transport.
pub struct Context {
    /// Access to catalog resources in the cluster.
    pub store: Arc<dyn StoreClient>,
    /// Produces broker clients from ServiceBroker resources.
    pub brokers: Arc<dyn BrokerClientFactory>,
    /// Publishes events describing reconciliation outcomes.
    pub recorder: Arc<dyn EventRecorder>,
    /// Queue of instance keys awaiting reconciliation.
    pub instance_queue: Arc<WorkQueue>,
    /// Queue of instance keys with an asynchronous operation to poll.
    pub polling_queue: Arc<WorkQueue>,
    /// Whether to send the OSB context object on provision requests.
    pub osb_context_profile: bool,
    /// Identity sent as the organization and space GUID on provisions.
    pub platform_identity: String,
}

impl Context {
    /// Start building a context backed by the real cluster and brokers.
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder {
            client,
            store: None,
            brokers: None,
            recorder: None,
            osb_context_profile: false,
            platform_identity: crate::broker::OSB_CONTEXT_PLATFORM.to_string(),
        }
    }

    /// Build a context around mock collaborators with fresh queues.
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn StoreClient>,
        brokers: Arc<dyn BrokerClientFactory>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            store,
            brokers,
            recorder,
            instance_queue: Arc::new(WorkQueue::new("test-instances")),
            polling_queue: Arc::new(WorkQueue::new("test-instance-polls")),
            osb_context_profile: false,
            platform_identity: crate::broker::OSB_CONTEXT_PLATFORM.to_string(),
        }
    }
}

/// Builds a [`Context`], defaulting each collaborator to its production
/// implementation when no override is supplied.
pub struct ContextBuilder {
    client: Client,
    store: Option<Arc<dyn StoreClient>>,
    brokers: Option<Arc<dyn BrokerClientFactory>>,
    recorder: Option<Arc<dyn EventRecorder>>,
    osb_context_profile: bool,
    platform_identity: String,
}

impl ContextBuilder {
    /// Override the store client.
    pub fn store(mut self, store: Arc<dyn StoreClient>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the broker client factory.
    pub fn brokers(mut self, brokers: Arc<dyn BrokerClientFactory>) -> Self {
        self.brokers = Some(brokers);
        self
    }

    /// Override the event recorder.
    pub fn recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Enable or disable the OSB context object on provision requests.
    pub fn osb_context_profile(mut self, enabled: bool) -> Self {
        self.osb_context_profile = enabled;
        self
    }

    /// Set the identity sent as organization and space GUID.
    pub fn platform_identity(mut self, identity: impl Into<String>) -> Self {
        self.platform_identity = identity.into();
        self
    }

    /// Finish building the context.
    pub fn build(self) -> Context {
        let client = self.client;
        Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeStore::new(client.clone()))),
            brokers: self.brokers.unwrap_or_else(|| {
                Arc::new(HttpBrokerClientFactory::new(std::time::Duration::from_secs(
                    DEFAULT_BROKER_TIMEOUT_SECS,
                )))
            }),
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(KubeEventRecorder::new(client))),
            instance_queue: Arc::new(WorkQueue::new("instances")),
            polling_queue: Arc::new(WorkQueue::new("instance-polls")),
            osb_context_profile: self.osb_context_profile,
            platform_identity: self.platform_identity,
        }
    }
}

/// Build the queue key for a namespaced instance.
pub fn instance_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Split a queue key back into its namespace and name.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Fetch the instance named by a queue key and reconcile it.
///
/// A key whose instance no longer exists is not an error: the resource was
/// deleted out from under the queue and there is nothing left to do.
#[instrument(skip(ctx))]
pub async fn reconcile_instance_key(ctx: &Context, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key)?;
    match ctx.store.get_instance(namespace, name).await? {
        Some(instance) => reconcile_instance(ctx, instance).await,
        None => {
            info!(key, "instance no longer exists");
            Ok(())
        }
    }
}

/// Reconcile a single ServiceInstance.
///
/// The pass is ordered so that exactly one broker-affecting action can happen
/// per invocation: the checksum no-op guard first, then the deletion path,
/// then polling when an asynchronous operation already owns the instance, and
/// only then a fresh provision call.
pub async fn reconcile_instance(ctx: &Context, instance: ServiceInstance) -> Result<()> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::validation("instance has no namespace"))?;
    let name = instance.name_any();

    // A stored checksum matching the current spec means the last observed
    // state was fully processed. Deletions and in-flight operations must
    // still proceed regardless.
    if !instance.async_op_in_progress() && !instance.is_deleting() {
        if let Some(stored) = instance.status.as_ref().and_then(|s| s.checksum.as_ref()) {
            let current = instance_spec_checksum(&instance.spec)?;
            if *stored == current {
                debug!(%namespace, %name, "spec unchanged since last reconciliation");
                return Ok(());
            }
        }
    }

    if instance.is_deleting() {
        return reconcile_instance_delete(ctx, instance).await;
    }

    let (class, plan, broker_name, broker) = match resolve_references(ctx, &instance).await {
        Ok(resolved) => resolved,
        Err(err) => {
            report_resolution_failure(ctx, &instance, &err).await;
            return Err(err);
        }
    };

    // An accepted operation owns the instance at the broker. Never issue a
    // second mutating call while one is in flight; poll it instead.
    if instance.async_op_in_progress() {
        return poll_instance(ctx, &class, &plan, &broker_name, broker, instance).await;
    }

    let parameters = match &instance.spec.parameters {
        None => None,
        Some(value @ serde_json::Value::Object(_)) => Some(value.clone()),
        Some(_) => {
            let message = format!(
                "Parameters for instance {namespace}/{name} must be a JSON object"
            );
            warn!(%namespace, %name, "rejecting non-object parameters");
            if let Err(update_err) = update_instance_condition(
                ctx,
                &instance,
                ConditionStatus::False,
                ERROR_WITH_PARAMETERS_REASON,
                &message,
            )
            .await
            {
                warn!(%namespace, %name, error = %update_err, "failed to record condition");
            }
            ctx.recorder.event(
                &instance,
                EventSeverity::Warning,
                ERROR_WITH_PARAMETERS_REASON,
                &message,
            );
            return Err(Error::validation(message));
        }
    };

    // The finalizer must be in place before the broker can be asked to
    // create anything, otherwise a deletion racing the provision could
    // orphan the external resource.
    let instance = ensure_finalizer(ctx, instance).await?;

    let request = CreateInstanceRequest {
        service_id: class.spec.external_id.clone(),
        plan_id: plan.external_id.clone(),
        parameters,
        organization_guid: ctx.platform_identity.clone(),
        space_guid: ctx.platform_identity.clone(),
        context: ctx
            .osb_context_profile
            .then(|| OsbContext::for_namespace(&namespace)),
        accepts_incomplete: true,
    };

    info!(
        %namespace,
        %name,
        class = %instance.spec.class_name,
        broker = %broker_name,
        "provisioning instance"
    );
    let response = match broker
        .create_instance(&instance.spec.external_id, &request)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            let message = format!(
                "Provision call failed for instance {namespace}/{name} of class {} at broker {broker_name}: {err}",
                instance.spec.class_name
            );
            warn!(%namespace, %name, error = %err, "provision call failed");
            if let Err(update_err) = update_instance_condition(
                ctx,
                &instance,
                ConditionStatus::False,
                ERROR_PROVISION_REASON,
                &message,
            )
            .await
            {
                warn!(%namespace, %name, error = %update_err, "failed to record condition");
            }
            ctx.recorder.event(
                &instance,
                EventSeverity::Warning,
                ERROR_PROVISION_REASON,
                &message,
            );
            return Err(err);
        }
    };

    let mut updated = instance.clone();
    let status = updated.status.get_or_insert_with(Default::default);
    if let Some(url) = &response.body.dashboard_url {
        status.dashboard_url = Some(url.clone());
    }
    status.checksum = Some(instance_spec_checksum(&updated.spec)?);

    if response.is_async() {
        if let Some(operation) = &response.body.operation {
            status.last_operation = Some(operation.clone());
        }
        status.async_op_in_progress = true;
        update_instance_condition(
            ctx,
            &updated,
            ConditionStatus::False,
            ASYNC_PROVISIONING_REASON,
            ASYNC_PROVISIONING_MESSAGE,
        )
        .await?;
        ctx.recorder.event(
            &updated,
            EventSeverity::Normal,
            ASYNC_PROVISIONING_REASON,
            ASYNC_PROVISIONING_MESSAGE,
        );
        ctx.polling_queue.add(&instance_key(&namespace, &name));
    } else {
        update_instance_condition(
            ctx,
            &updated,
            ConditionStatus::True,
            SUCCESS_PROVISION_REASON,
            SUCCESS_PROVISION_MESSAGE,
        )
        .await?;
        ctx.recorder.event(
            &updated,
            EventSeverity::Normal,
            SUCCESS_PROVISION_REASON,
            SUCCESS_PROVISION_MESSAGE,
        );
        info!(%namespace, %name, "instance provisioned");
    }
    Ok(())
}

/// Tear down an instance that is marked for deletion.
///
/// Removing the finalizer is always the last action of a successful
/// deprovision so that the resource cannot disappear while the external
/// service still exists.
async fn reconcile_instance_delete(ctx: &Context, instance: ServiceInstance) -> Result<()> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::validation("instance has no namespace"))?;
    let name = instance.name_any();

    if !instance.has_finalizer() {
        debug!(%namespace, %name, "deletion already handed off");
        return Ok(());
    }

    // No checksum and no operation in flight means the broker was never
    // asked to create anything; there is nothing external to tear down.
    let never_provisioned = !instance.async_op_in_progress()
        && instance
            .status
            .as_ref()
            .and_then(|s| s.checksum.as_ref())
            .is_none();
    if never_provisioned {
        info!(%namespace, %name, "releasing never-provisioned instance");
        return clear_finalizer(ctx, &instance).await;
    }

    let (class, plan, broker_name, broker) = match resolve_references(ctx, &instance).await {
        Ok(resolved) => resolved,
        Err(err) => {
            report_resolution_failure(ctx, &instance, &err).await;
            return Err(err);
        }
    };

    if instance.async_op_in_progress() {
        return poll_instance(ctx, &class, &plan, &broker_name, broker, instance).await;
    }

    let request = DeleteInstanceRequest {
        service_id: class.spec.external_id.clone(),
        plan_id: plan.external_id.clone(),
        accepts_incomplete: true,
    };

    info!(%namespace, %name, broker = %broker_name, "deprovisioning instance");
    let response = match broker
        .delete_instance(&instance.spec.external_id, &request)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            let message = format!(
                "Deprovision call failed for instance {namespace}/{name} at broker {broker_name}: {err}"
            );
            warn!(%namespace, %name, error = %err, "deprovision call failed");
            if let Err(update_err) = update_instance_condition(
                ctx,
                &instance,
                ConditionStatus::Unknown,
                ERROR_DEPROVISION_REASON,
                &message,
            )
            .await
            {
                warn!(%namespace, %name, error = %update_err, "failed to record condition");
            }
            ctx.recorder.event(
                &instance,
                EventSeverity::Warning,
                ERROR_DEPROVISION_REASON,
                &message,
            );
            return Err(err);
        }
    };

    let mut updated = instance.clone();
    let status = updated.status.get_or_insert_with(Default::default);

    if response.is_async() {
        if let Some(operation) = &response.body.operation {
            status.last_operation = Some(operation.clone());
        }
        status.async_op_in_progress = true;
        update_instance_condition(
            ctx,
            &updated,
            ConditionStatus::False,
            ASYNC_DEPROVISIONING_REASON,
            ASYNC_DEPROVISIONING_MESSAGE,
        )
        .await?;
        ctx.recorder.event(
            &updated,
            EventSeverity::Normal,
            ASYNC_DEPROVISIONING_REASON,
            ASYNC_DEPROVISIONING_MESSAGE,
        );
        ctx.polling_queue.add(&instance_key(&namespace, &name));
    } else {
        update_instance_condition(
            ctx,
            &updated,
            ConditionStatus::False,
            SUCCESS_DEPROVISION_REASON,
            SUCCESS_DEPROVISION_MESSAGE,
        )
        .await?;
        clear_finalizer(ctx, &updated).await?;
        ctx.recorder.event(
            &updated,
            EventSeverity::Normal,
            SUCCESS_DEPROVISION_REASON,
            SUCCESS_DEPROVISION_MESSAGE,
        );
        info!(%namespace, %name, "instance deprovisioned");
    }
    Ok(())
}

/// Fetch the instance named by a polling-queue key and poll its operation.
///
/// Keys for instances that vanished or whose operation already finished are
/// dropped silently; the polling queue routinely lags behind reality.
#[instrument(skip(ctx))]
pub async fn poll_instance_key(ctx: &Context, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key)?;
    let Some(instance) = ctx.store.get_instance(namespace, name).await? else {
        info!(key, "instance no longer exists, dropping poll");
        return Ok(());
    };
    if !instance.async_op_in_progress() {
        debug!(key, "no operation in flight, dropping poll");
        return Ok(());
    }
    let (class, plan, broker_name, broker) = match resolve_references(ctx, &instance).await {
        Ok(resolved) => resolved,
        Err(err) => {
            report_resolution_failure(ctx, &instance, &err).await;
            return Err(err);
        }
    };
    poll_instance(ctx, &class, &plan, &broker_name, broker, instance).await
}

/// Ask the broker for the state of the instance's in-flight operation and
/// finish the provision or deprovision it belongs to.
///
/// A still-running operation is reported as [`Error::OperationInProgress`] so
/// the queue's backoff schedules the next poll; this error is the polling
/// cadence, not a failure.
async fn poll_instance(
    ctx: &Context,
    class: &ServiceClass,
    plan: &ServicePlan,
    broker_name: &str,
    broker: Arc<dyn BrokerClient>,
    instance: ServiceInstance,
) -> Result<()> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::validation("instance has no namespace"))?;
    let name = instance.name_any();
    let deleting = instance.is_deleting();

    let request = LastOperationRequest {
        service_id: class.spec.external_id.clone(),
        plan_id: plan.external_id.clone(),
        operation: instance
            .status
            .as_ref()
            .and_then(|s| s.last_operation.clone())
            .filter(|op| !op.is_empty()),
    };

    let response = match broker
        .poll_last_operation(&instance.spec.external_id, &request)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(%namespace, %name, broker = %broker_name, error = %err, "last-operation poll failed");
            return Err(err);
        }
    };
    debug!(%namespace, %name, state = ?response.body.state, "broker reported operation state");

    // During deletion a Gone response means the broker already forgot the
    // instance, which is exactly the end state deprovisioning wants.
    if deleting && response.status == StatusCode::GONE {
        let mut updated = instance.clone();
        updated
            .status
            .get_or_insert_with(Default::default)
            .async_op_in_progress = false;
        update_instance_condition(
            ctx,
            &updated,
            ConditionStatus::False,
            SUCCESS_DEPROVISION_REASON,
            SUCCESS_DEPROVISION_MESSAGE,
        )
        .await?;
        clear_finalizer(ctx, &updated).await?;
        ctx.recorder.event(
            &updated,
            EventSeverity::Normal,
            SUCCESS_DEPROVISION_REASON,
            SUCCESS_DEPROVISION_MESSAGE,
        );
        info!(%namespace, %name, "instance gone at broker, deprovision complete");
        return Ok(());
    }

    match response.body.state {
        OperationState::InProgress => Err(Error::OperationInProgress { namespace, name }),
        OperationState::Succeeded => {
            let mut updated = instance.clone();
            updated
                .status
                .get_or_insert_with(Default::default)
                .async_op_in_progress = false;
            if deleting {
                update_instance_condition(
                    ctx,
                    &updated,
                    ConditionStatus::False,
                    SUCCESS_DEPROVISION_REASON,
                    SUCCESS_DEPROVISION_MESSAGE,
                )
                .await?;
                clear_finalizer(ctx, &updated).await?;
                ctx.recorder.event(
                    &updated,
                    EventSeverity::Normal,
                    SUCCESS_DEPROVISION_REASON,
                    SUCCESS_DEPROVISION_MESSAGE,
                );
                info!(%namespace, %name, "instance deprovisioned");
            } else {
                update_instance_condition(
                    ctx,
                    &updated,
                    ConditionStatus::True,
                    SUCCESS_PROVISION_REASON,
                    SUCCESS_PROVISION_MESSAGE,
                )
                .await?;
                ctx.recorder.event(
                    &updated,
                    EventSeverity::Normal,
                    SUCCESS_PROVISION_REASON,
                    SUCCESS_PROVISION_MESSAGE,
                );
                info!(%namespace, %name, "instance provisioned");
            }
            Ok(())
        }
        OperationState::Failed => {
            let description = response.body.description.unwrap_or_default();
            let mut updated = instance.clone();
            updated
                .status
                .get_or_insert_with(Default::default)
                .async_op_in_progress = false;
            let (condition, reason, message) = if deleting {
                (
                    ConditionStatus::Unknown,
                    ERROR_DEPROVISION_REASON,
                    format!(
                        "Deprovision operation for instance {namespace}/{name} failed: {description}"
                    ),
                )
            } else {
                (
                    ConditionStatus::False,
                    ERROR_PROVISION_REASON,
                    format!(
                        "Provision operation for instance {namespace}/{name} failed: {description}"
                    ),
                )
            };
            warn!(%namespace, %name, %description, "broker operation failed");
            update_instance_condition(ctx, &updated, condition, reason, &message).await?;
            ctx.recorder
                .event(&updated, EventSeverity::Warning, reason, &message);
            // Terminal for this operation; only a spec change restarts work.
            Ok(())
        }
        OperationState::Unrecognized => {
            let message = format!(
                "Broker reported an unrecognized last-operation state for instance {namespace}/{name}"
            );
            warn!(%namespace, %name, "unrecognized operation state, halting polls");
            update_instance_condition(
                ctx,
                &instance,
                ConditionStatus::Unknown,
                ERROR_POLL_STATE_REASON,
                &message,
            )
            .await?;
            ctx.recorder.event(
                &instance,
                EventSeverity::Warning,
                ERROR_POLL_STATE_REASON,
                &message,
            );
            Ok(())
        }
    }
}

/// Record a reference-resolution failure on the `Ready` condition and as a
/// warning event.
///
/// Every path that resolves references reports failures the same way, so a
/// deleting or polling instance whose class vanished is as visible to the
/// user as a provisioning one. A failed condition write is logged and
/// swallowed; the resolution error itself drives the requeue.
async fn report_resolution_failure(ctx: &Context, instance: &ServiceInstance, err: &Error) {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let message =
        format!("References for instance {namespace}/{name} could not be resolved: {err}");
    warn!(%namespace, %name, error = %err, "reference resolution failed");
    if let Err(update_err) = update_instance_condition(
        ctx,
        instance,
        ConditionStatus::False,
        ERROR_REFERENCES_REASON,
        &message,
    )
    .await
    {
        warn!(%namespace, %name, error = %update_err, "failed to record condition");
    }
    ctx.recorder.event(
        instance,
        EventSeverity::Warning,
        ERROR_REFERENCES_REASON,
        &message,
    );
}

/// Resolve the instance's class, plan, and broker references and build a
/// client for the broker.
async fn resolve_references(
    ctx: &Context,
    instance: &ServiceInstance,
) -> Result<(ServiceClass, ServicePlan, String, Arc<dyn BrokerClient>)> {
    let class = ctx
        .store
        .get_service_class(&instance.spec.class_name)
        .await?
        .ok_or_else(|| {
            Error::reference(format!(
                "ServiceClass {:?} does not exist",
                instance.spec.class_name
            ))
        })?;
    let plan = class
        .spec
        .plan(&instance.spec.plan_name)
        .cloned()
        .ok_or_else(|| {
            Error::reference(format!(
                "ServicePlan {:?} does not exist in ServiceClass {:?}",
                instance.spec.plan_name, instance.spec.class_name
            ))
        })?;
    let broker_name = class.spec.broker_name.clone();
    let broker_resource = ctx.store.get_broker(&broker_name).await?.ok_or_else(|| {
        Error::reference(format!("ServiceBroker {broker_name:?} does not exist"))
    })?;
    let client = ctx.brokers.client_for(&broker_resource)?;
    Ok((class, plan, broker_name, client))
}

/// Write the instance's status with the `Ready` condition set.
///
/// The caller passes the instance carrying whatever status fields the pass
/// has mutated; this writes them and the condition in a single status update.
async fn update_instance_condition(
    ctx: &Context,
    instance: &ServiceInstance,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Result<()> {
    let mut updated = instance.clone();
    let record = updated.status.get_or_insert_with(Default::default);
    let transitioned = record.set_condition(Condition::new(READY_CONDITION, status, reason, message));
    if transitioned {
        info!(
            namespace = %instance.namespace().unwrap_or_default(),
            name = %instance.name_any(),
            reason,
            "condition transitioned"
        );
    }
    ctx.store.update_instance_status(&updated).await?;
    Ok(())
}

/// Add the lifecycle finalizer if it is missing.
///
/// Returns the server's view of the instance so that a status write issued
/// afterwards carries the bumped resource version.
async fn ensure_finalizer(ctx: &Context, instance: ServiceInstance) -> Result<ServiceInstance> {
    if instance.has_finalizer() {
        return Ok(instance);
    }
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::validation("instance has no namespace"))?;
    let name = instance.name_any();
    let mut finalizers = instance.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER_TOKEN.to_string());
    debug!(%namespace, %name, "adding lifecycle finalizer");
    ctx.store
        .replace_instance_finalizers(&namespace, &name, finalizers)
        .await
}

/// Remove the lifecycle finalizer, preserving any foreign finalizers.
///
/// Operates on a fresh copy of the instance so the write never clobbers
/// finalizers added by other controllers since this pass began.
async fn clear_finalizer(ctx: &Context, instance: &ServiceInstance) -> Result<()> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::validation("instance has no namespace"))?;
    let name = instance.name_any();
    let Some(latest) = ctx.store.get_instance(&namespace, &name).await? else {
        return Ok(());
    };
    if !latest.has_finalizer() {
        return Ok(());
    }
    let remaining = latest.finalizers_without_token();
    ctx.store
        .replace_instance_finalizers(&namespace, &name, remaining)
        .await?;
    info!(%namespace, %name, "lifecycle finalizer removed");
    Ok(())
}
