//! # Instance Reconcile
//!
//! One pass over an `Instance`:
//!
//! 1. Resolve the admin endpoints of the database and the broker
//! 2. Provision credentials and persist the state
//! 3. Collect static clients: the services' own, AccessToken resources and the
//!    clients Secret
//! 4. Read integration Secrets, assemble values and render the chart
//! 5. Patch rendered objects and add the database upgrade Job
//! 6. Converge the children with the composite reconciler
//! 7. Report the outcome on the `Progressing` condition

use super::access_tokens::process_access_tokens;
use super::conditions::update_progressing;
use super::types::{Reconciler, ReconcilerError};
use crate::composite::{CompositeReconciler, ParentRef};
use crate::constants::{FIELD_MANAGER, UPGRADE_JOB_POLL_SECS};
use crate::controller::database_ref::{broker_credentials, database_endpoint, optional_secret_data};
use crate::controller::patches::patch_objects;
use crate::controller::upgrade::{UpgradeInputs, UpgradeJobState};
use crate::controller::values::{
    parse_providers, parse_static_clients, Integrations, ValuesBuilder,
};
use crate::crd::{Instance, InstanceSpec, LocalRef};
use crate::observability::metrics;
use crate::provisioner::{
    CredentialProvisioner, PostgresConnector, ProvisionerSettings, RabbitMqAdmin,
};
use crate::state::SecretStateStore;
use anyhow::Context;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// When the pass after a successful one is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPass {
    /// Regular resync
    Resync,
    /// The upgrade Job is running; check back soon
    UpgradePoll,
}

impl NextPass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NextPass::Resync => "resync",
            NextPass::UpgradePoll => "upgrade-poll",
        }
    }

    #[must_use]
    pub fn requeue_after(self, resync: Duration) -> Duration {
        match self {
            NextPass::Resync => resync,
            NextPass::UpgradePoll => Duration::from_secs(UPGRADE_JOB_POLL_SECS),
        }
    }
}

/// Fields an instance cannot be reconciled without.
pub fn validate_spec(spec: &InstanceSpec) -> Result<(), ReconcilerError> {
    let required = [
        ("rootUrl", spec.root_url.as_str()),
        ("pulse.host", spec.broker.host.as_str()),
        ("pulse.vhost", spec.broker.vhost.as_str()),
        ("postgresUserPrefix", spec.postgres_user_prefix.as_str()),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReconcilerError::InvalidInstance(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Reconcile one instance and report the outcome on its status.
pub async fn reconcile(
    instance: Arc<Instance>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = instance.name_any();
    let namespace = instance.namespace().unwrap_or_default();
    let span = info_span!(
        "instance.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.kind = "Instance",
        resource.generation = instance.metadata.generation.unwrap_or(0)
    );

    async {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = run_pass(&instance, &ctx).await;

        if let Err(e) = update_progressing(&ctx.client, &instance, result.as_ref().map(|_| ())).await
        {
            warn!("Failed to update status of {}/{}: {:#}", namespace, name, e);
        }
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        let next = result?;
        ctx.reset_backoff(&format!("{namespace}/{name}"));
        let requeue_after = next.requeue_after(ctx.config.resync_interval_duration());
        info!(
            "Reconciled {}/{} in {}ms, next pass in {}s ({})",
            namespace,
            name,
            start.elapsed().as_millis(),
            requeue_after.as_secs(),
            next.as_str()
        );
        metrics::increment_requeues(next.as_str());
        Ok::<_, ReconcilerError>(Action::requeue(requeue_after))
    }
    .instrument(span)
    .await
}

/// Run a pass and return when the next one is due.
async fn run_pass(instance: &Instance, ctx: &Reconciler) -> Result<NextPass, ReconcilerError> {
    let name = instance.name_any();
    let namespace = instance
        .namespace()
        .ok_or_else(|| ReconcilerError::InvalidInstance(format!("instance {name} has no namespace")))?;
    let spec = &instance.spec;
    validate_spec(spec)?;

    let database = database_endpoint(&ctx.client, &namespace, spec).await?;
    let broker_login = broker_credentials(&ctx.client, &namespace, spec).await?;

    let connector = PostgresConnector::new(database.clone(), ctx.config.use_public_ips);
    let broker = RabbitMqAdmin::new(
        &RabbitMqAdmin::endpoint_for_host(&spec.broker.host),
        &broker_login.username,
        &broker_login.password,
        ctx.config.broker_timeout_duration(),
    )?;
    let settings = ProvisionerSettings {
        role_prefix: spec.postgres_user_prefix.clone(),
        vhost: spec.broker.vhost.clone(),
        database_timeout: ctx.config.database_timeout_duration(),
        broker_timeout: ctx.config.broker_timeout_duration(),
    };
    let store = SecretStateStore::new(ctx.client.clone(), &namespace, &name);
    let mut state = CredentialProvisioner::new(settings, &connector, &broker)
        .provision(&store, &ctx.catalog)
        .await?;

    let mut static_clients = CredentialProvisioner::static_identities(&mut state, &ctx.catalog);
    static_clients.extend(process_access_tokens(&ctx.client, &namespace, &name).await?);
    let clients_data = optional_secret_data(
        &ctx.client,
        &namespace,
        secret_name(spec.access_tokens_secret_ref.as_ref()),
    )
    .await?;
    static_clients.extend(parse_static_clients(&clients_data)?);
    let providers_data = optional_secret_data(
        &ctx.client,
        &namespace,
        secret_name(spec.worker_manager_providers_secret_ref.as_ref()),
    )
    .await?;
    let providers = parse_providers(&providers_data)?;
    let integrations = load_integrations(ctx, &namespace, spec).await?;

    let values = ValuesBuilder::new(spec, &state, &database, &integrations)
        .build(static_clients, providers)?
        .to_value()?;
    let mut children = ctx
        .renderer
        .render(&values, &namespace)
        .await
        .map_err(ReconcilerError::Render)?;
    patch_objects(&mut children);

    let upgrade = UpgradeInputs {
        instance_name: name.clone(),
        namespace: namespace.clone(),
        image: spec.docker_image(),
        admin_db_url: database.connection_string(true, true)?,
        username_prefix: spec.postgres_user_prefix.clone(),
    };
    let upgrade_state = prepare_upgrade_job(ctx, &upgrade).await?;
    if upgrade_state == UpgradeJobState::RunningStale {
        return Ok(NextPass::UpgradePoll);
    }
    children.extend(upgrade.objects()?);

    let mut parent = ParentRef::from_resource(instance)?;
    let outcome = CompositeReconciler::new(ctx.cluster.as_ref())
        .reconcile(FIELD_MANAGER, &mut parent, children)
        .await?;
    metrics::record_composite_outcome(outcome.applied, outcome.pruned);

    Ok(if upgrade_state.needs_poll() {
        NextPass::UpgradePoll
    } else {
        NextPass::Resync
    })
}

fn secret_name(secret_ref: Option<&LocalRef>) -> Option<&str> {
    secret_ref.map(|r| r.name.as_str())
}

/// Read the AWS, Azure, GitHub and websocktunnel Secrets the instance references.
async fn load_integrations(
    ctx: &Reconciler,
    namespace: &str,
    spec: &InstanceSpec,
) -> Result<Integrations, ReconcilerError> {
    let client = &ctx.client;
    let aws = optional_secret_data(client, namespace, secret_name(spec.aws_secret_ref.as_ref()))
        .await?;
    let azure =
        optional_secret_data(client, namespace, secret_name(spec.azure_secret_ref.as_ref()))
            .await?;
    let github =
        optional_secret_data(client, namespace, secret_name(spec.github.secret_ref.as_ref()))
            .await?;
    let websocktunnel = optional_secret_data(
        client,
        namespace,
        secret_name(spec.web_sock_tunnel_secret_ref.as_ref()),
    )
    .await?;

    Ok(Integrations::from_secret_data(
        &aws,
        &azure,
        &github,
        &websocktunnel,
    ))
}

/// Classify the live upgrade Job and clear it out of the way when stale.
async fn prepare_upgrade_job(
    ctx: &Reconciler,
    upgrade: &UpgradeInputs,
) -> Result<UpgradeJobState, ReconcilerError> {
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &upgrade.namespace);
    let job_name = upgrade.job_name();
    let live = jobs
        .get_opt(&job_name)
        .await
        .with_context(|| format!("failed to get job {}/{}", upgrade.namespace, job_name))?;

    let state = UpgradeJobState::classify(live.as_ref(), &upgrade.hash());
    match state {
        UpgradeJobState::CompleteStale => {
            info!("Deleting finished stale upgrade job {}", job_name);
            jobs.delete(&job_name, &DeleteParams::background())
                .await
                .with_context(|| {
                    format!("failed to delete job {}/{}", upgrade.namespace, job_name)
                })?;
        }
        UpgradeJobState::RunningStale => {
            info!(
                "Upgrade job {} is still running with older inputs, waiting before applying",
                job_name
            );
        }
        UpgradeJobState::RunningCurrent => {
            info!("Upgrade job {} is running", job_name);
        }
        UpgradeJobState::Absent | UpgradeJobState::CompleteCurrent => {}
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BrokerSpec;

    fn spec() -> InstanceSpec {
        InstanceSpec {
            root_url: "https://tc.example.com".to_string(),
            broker: BrokerSpec {
                host: "pulse.example.com".to_string(),
                vhost: "prod".to_string(),
                admin_secret_ref: None,
            },
            postgres_user_prefix: "tc".to_string(),
            ..InstanceSpec::default()
        }
    }

    #[test]
    fn test_next_pass_interval() {
        let resync = Duration::from_secs(600);
        assert_eq!(NextPass::Resync.requeue_after(resync), resync);
        assert_eq!(
            NextPass::UpgradePoll.requeue_after(resync),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_validate_spec_accepts_complete_spec() {
        assert!(validate_spec(&spec()).is_ok());
    }

    #[test]
    fn test_validate_spec_lists_missing_fields() {
        let mut spec = spec();
        spec.broker.vhost = String::new();
        spec.postgres_user_prefix = "  ".to_string();

        let error = validate_spec(&spec).unwrap_err();
        assert!(error.is_permanent());
        let message = error.to_string();
        assert!(message.contains("pulse.vhost"));
        assert!(message.contains("postgresUserPrefix"));
        assert!(!message.contains("rootUrl"));
    }
}
