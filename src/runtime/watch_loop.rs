//! # Watch Loop
//!
//! Controller watch loop that monitors `Instance` resources, and the
//! `AccessToken` resources pointing at them, and triggers reconciliation
//! when changes are detected.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::{AccessToken, Instance};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// The instance an access token change should requeue.
#[must_use]
pub fn instance_for_token(token: &AccessToken) -> Option<ObjectRef<Instance>> {
    let (namespace, name) = token.instance_key();
    namespace.map(|ns| ObjectRef::new(&name).within(&ns))
}

/// Drive one controller until its stream ends.
async fn run_controller(
    instances: &Api<Instance>,
    reconciler: &Arc<Reconciler>,
    restart_delay: Duration,
) {
    info!("Starting controller watch loop...");
    let tokens: Api<AccessToken> = Api::all(reconciler.client.clone());
    Controller::new(instances.clone(), watcher::Config::default().any_semantic())
        .watches(tokens, watcher::Config::default(), |token| {
            instance_for_token(&token)
        })
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler.clone())
        .filter_map(|x| async move {
            match &x {
                Ok(_) => {
                    debug!("watch.event.success");
                    Some(x)
                }
                Err(e) => {
                    let error_string = format!("{e:?}");
                    handle_watch_stream_error(&error_string, restart_delay)
                        .await
                        .map(|()| x)
                }
            }
        })
        .for_each(|_| futures::future::ready(()))
        .await;
}

/// Run the controller watch loop
///
/// Restarts the controller when its stream ends and exits once a shutdown
/// signal has marked the server as not ready.
pub async fn run_watch_loop(
    instances: Api<Instance>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let restart_delay = reconciler.config.watch_restart_delay_duration();

    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");

        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        run_controller(&instances, &reconciler, restart_delay)
            .instrument(watch_span)
            .await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
