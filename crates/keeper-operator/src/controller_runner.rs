//! Controller runner - builds the Check and Backup controller futures

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use keeper_common::crd::{Backup, Check};
use keeper_common::{OperatorConfig, LABEL_TYPE};
use keeper_executor::client::OperationKubeClientImpl;
use keeper_executor::hooks::DeploymentHooks;
use keeper_executor::ExecutorContext;

use crate::controller::{error_policy, reconcile_backup, reconcile_check, Context};

/// Watcher timeout (seconds), kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Controller future returned to `main`
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the shared executor context from a client and configuration
pub fn build_context(client: Client, config: Arc<OperatorConfig>) -> Arc<Context> {
    let kube = Arc::new(OperationKubeClientImpl::new(client.clone(), &config));
    let hooks = Arc::new(DeploymentHooks::new(client));
    Arc::new(Context::new(Arc::new(ExecutorContext::new(
        kube, hooks, config,
    ))))
}

/// Build the Check and Backup controllers, each owning its jobs
pub fn build_controllers(client: Client, config: Arc<OperatorConfig>) -> Vec<ControllerFuture> {
    let ctx = build_context(client.clone(), config);

    let checks: Api<Check> = Api::all(client.clone());
    let backups: Api<Backup> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client);
    let job_watch = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS).labels(LABEL_TYPE);

    tracing::info!("- Check controller");
    tracing::info!("- Backup controller");

    vec![
        Box::pin(
            Controller::new(checks, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
                .owns(jobs.clone(), job_watch())
                .shutdown_on_signal()
                .run(reconcile_check, error_policy, ctx.clone())
                .for_each(log_reconcile_result("Check")),
        ),
        Box::pin(
            Controller::new(backups, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
                .owns(jobs, job_watch())
                .shutdown_on_signal()
                .run(reconcile_backup, error_policy, ctx)
                .for_each(log_reconcile_result("Backup")),
        ),
    ]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(object) => tracing::debug!(?object, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
