//! Pre-backup hooks: pause writer deployments around a backup
//!
//! Pausing scales the target deployment down to the hook's paused replica
//! count and records the original count in an annotation, along with the
//! backups holding the pause. A backup that finds a deployment already paused
//! joins the holder list. Releasing removes only the caller from that list and
//! the deployment is resumed once the last holder lets go, so both directions
//! are idempotent and one backup never resumes a pause another backup relies on.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use keeper_common::crd::{Backup, PreBackupHook};
use keeper_common::{Error, ANNOTATION_ORIGINAL_REPLICAS, ANNOTATION_PAUSED_BY, FIELD_MANAGER};

/// Outcome of asking the hooks for a backup to pause their targets
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookReadiness {
    /// Some targets are still scaling down
    NotReady { pending: Vec<String> },
    /// Every target is paused, or there are no hooks
    Ready,
    /// A target can never become ready
    Failed { reason: String },
}

/// Pre-backup hook coordination
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PreBackupHooks: Send + Sync {
    /// Pause every hook target for `backup` and report readiness
    async fn start(&self, backup: &Backup) -> Result<HookReadiness, Error>;

    /// Resume every target paused for `backup`
    async fn stop(&self, backup: &Backup) -> Result<(), Error>;
}

/// State of a single hook target
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetState {
    Missing,
    Pausing,
    Paused,
}

/// Replica count recorded before the deployment was paused
pub fn original_replicas(deployment: &Deployment) -> Option<i32> {
    deployment
        .annotations()
        .get(ANNOTATION_ORIGINAL_REPLICAS)
        .and_then(|v| v.parse().ok())
}

pub fn is_paused(deployment: &Deployment) -> bool {
    original_replicas(deployment).is_some()
}

/// Backups currently holding the deployment paused, sorted
pub fn holders(deployment: &Deployment) -> Vec<String> {
    let mut holders: Vec<String> = deployment
        .annotations()
        .get(ANNOTATION_PAUSED_BY)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    holders.sort();
    holders.dedup();
    holders
}

/// Merge patch scaling a deployment down while remembering `current` replicas
pub fn pause_patch(current: i32, paused: i32, holder: &str) -> Value {
    json!({
        "metadata": {
            "annotations": {
                ANNOTATION_ORIGINAL_REPLICAS: current.to_string(),
                ANNOTATION_PAUSED_BY: holder,
            }
        },
        "spec": { "replicas": paused }
    })
}

/// Merge patch restoring `original` replicas and dropping both annotations
pub fn resume_patch(original: i32) -> Value {
    json!({
        "metadata": {
            "annotations": {
                ANNOTATION_ORIGINAL_REPLICAS: null,
                ANNOTATION_PAUSED_BY: null,
            }
        },
        "spec": { "replicas": original }
    })
}

fn holders_patch(holders: &[String]) -> Value {
    json!({
        "metadata": {
            "annotations": { ANNOTATION_PAUSED_BY: holders.join(",") }
        }
    })
}

/// Patch making `backup` a holder of the deployment's pause
///
/// Returns `None` when `backup` already holds it.
pub fn acquire_patch(deployment: &Deployment, backup: &str, paused: i32) -> Option<Value> {
    if !is_paused(deployment) {
        let current = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        return Some(pause_patch(current, paused, backup));
    }
    let mut holders = holders(deployment);
    if holders.iter().any(|h| h == backup) {
        return None;
    }
    holders.push(backup.to_string());
    holders.sort();
    Some(holders_patch(&holders))
}

/// Patch dropping `backup` from the deployment's holders
///
/// Resumes the deployment when `backup` was the last holder. Returns `None`
/// when `backup` does not hold the pause.
pub fn release_patch(deployment: &Deployment, backup: &str) -> Option<Value> {
    let original = original_replicas(deployment)?;
    let mut holders = holders(deployment);
    let before = holders.len();
    holders.retain(|h| h != backup);
    if holders.len() == before {
        return None;
    }
    if holders.is_empty() {
        Some(resume_patch(original))
    } else {
        Some(holders_patch(&holders))
    }
}

pub fn target_state(deployment: Option<&Deployment>, paused_replicas: i32) -> TargetState {
    let Some(deployment) = deployment else {
        return TargetState::Missing;
    };
    let spec_replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let running = deployment
        .status
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    if is_paused(deployment) && spec_replicas <= paused_replicas && running <= paused_replicas {
        TargetState::Paused
    } else {
        TargetState::Pausing
    }
}

/// Fold per-target states into the backup's readiness
pub fn combine(states: &[(String, TargetState)]) -> HookReadiness {
    if let Some((name, _)) = states.iter().find(|(_, s)| *s == TargetState::Missing) {
        return HookReadiness::Failed {
            reason: format!("deployment '{}' does not exist", name),
        };
    }
    let pending: Vec<String> = states
        .iter()
        .filter(|(_, s)| *s == TargetState::Pausing)
        .map(|(name, _)| name.clone())
        .collect();
    if pending.is_empty() {
        HookReadiness::Ready
    } else {
        HookReadiness::NotReady { pending }
    }
}

/// Hooks backed by PreBackupHook resources and Deployment scaling
pub struct DeploymentHooks {
    client: Client,
}

impl DeploymentHooks {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn hooks(&self, namespace: &str) -> Result<Vec<PreBackupHook>, Error> {
        let api: Api<PreBackupHook> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[async_trait]
impl PreBackupHooks for DeploymentHooks {
    async fn start(&self, backup: &Backup) -> Result<HookReadiness, Error> {
        let namespace = backup
            .namespace()
            .ok_or_else(|| Error::validation_for(backup.name_any(), "backup has no namespace"))?;
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(FIELD_MANAGER);
        let name = backup.name_any();

        let mut states = Vec::new();
        for hook in self.hooks(&namespace).await? {
            let target = &hook.spec.deployment;
            let paused = hook.spec.paused_replicas;
            let mut deployment = deployments.get_opt(target).await?;

            let acquire = deployment
                .as_ref()
                .and_then(|d| acquire_patch(d, &name, paused));
            if let Some(patch) = acquire {
                info!(
                    backup = %name,
                    deployment = %target,
                    namespace = %namespace,
                    to = paused,
                    "pausing deployment for backup"
                );
                deployment = Some(
                    deployments
                        .patch(target, &params, &Patch::Merge(&patch))
                        .await?,
                );
            }

            states.push((target.clone(), target_state(deployment.as_ref(), paused)));
        }

        let readiness = combine(&states);
        debug!(backup = %name, readiness = ?readiness, "pre-backup hooks assessed");
        Ok(readiness)
    }

    async fn stop(&self, backup: &Backup) -> Result<(), Error> {
        let namespace = backup
            .namespace()
            .ok_or_else(|| Error::validation_for(backup.name_any(), "backup has no namespace"))?;
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(FIELD_MANAGER);
        let name = backup.name_any();

        for hook in self.hooks(&namespace).await? {
            let target = &hook.spec.deployment;
            let Some(deployment) = deployments.get_opt(target).await? else {
                warn!(deployment = %target, namespace = %namespace, "hook target vanished, nothing to resume");
                continue;
            };
            let Some(patch) = release_patch(&deployment, &name) else {
                continue;
            };
            info!(
                backup = %name,
                deployment = %target,
                namespace = %namespace,
                remaining = holders(&deployment).len().saturating_sub(1),
                "releasing deployment pause"
            );
            deployments
                .patch(target, &params, &Patch::Merge(&patch))
                .await?;
        }
        Ok(())
    }
}
