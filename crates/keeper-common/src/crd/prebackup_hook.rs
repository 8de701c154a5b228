//! PreBackupHook Custom Resource Definition
//!
//! Names a deployment that writes to backed-up volumes. Before a backup job
//! starts, the deployment is scaled to `pausedReplicas`; it is scaled back
//! once the backup reaches a terminal phase.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a PreBackupHook
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keeper.dev",
    version = "v1",
    kind = "PreBackupHook",
    plural = "prebackuphooks",
    namespaced,
    printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deployment"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PreBackupHookSpec {
    /// Deployment to pause, in the hook's namespace
    pub deployment: String,

    /// Replica count while the backup runs
    #[serde(default)]
    pub paused_replicas: i32,
}
