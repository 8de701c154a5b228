//! Backup Custom Resource Definition
//!
//! A Backup snapshots every eligible volume claim in its namespace. Dependent
//! writers declared through `PreBackupHook` resources are paused first.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::runnable::RunnableSpec;
use super::types::OperationStatus;

/// Specification for a Backup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keeper.dev",
    version = "v1",
    kind = "Backup",
    plural = "backups",
    namespaced,
    status = "OperationStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Backend, volumes, environment and retention settings
    #[serde(flatten)]
    pub runnable: RunnableSpec,

    /// Tags attached to the snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_spec_with_tags() {
        let spec: BackupSpec = serde_yaml::from_str(
            r#"
tags: [nightly, prod]
backend:
  local:
    mountPath: /repo
"#,
        )
        .unwrap();
        assert_eq!(spec.tags, vec!["nightly", "prod"]);
        assert_eq!(spec.runnable.backend.unwrap().repository(), "/repo");
    }
}
